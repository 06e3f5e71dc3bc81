//! Incremental smart-contract discovery.
//!
//! Scans blocks for contract deployments, resolves verified source (falling
//! back to bytecode) and upserts the result into SQLite. A JSON ledger of
//! covered block ranges makes runs resumable without re-scanning.

pub mod chain;
pub mod error;
pub mod rate_limit;
pub mod runtime;
pub mod scanner;
pub mod source_resolver;
pub mod storage;
pub mod sync;
pub mod utils;

pub use chain::{BlockTx, ChainBlock, ChainNode};
pub use error::{ConfigError, ResolveError, SyncError};
pub use source_resolver::{ResolvedSource, ResolverBackend, SourceResolver};
pub use storage::{ContractRecord, ContractStore, ContractsDb, CoveredRange, FailureLog, RangeLedger};
pub use sync::{AddressSyncReport, FailedBlockPolicy, RangeSyncReport, SyncSettings, Synchronizer};
