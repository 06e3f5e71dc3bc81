pub mod contracts_db;
pub mod covered_ranges;
pub mod failure_log;

use alloy::primitives::Address;
use anyhow::Context;
use async_trait::async_trait;

pub use contracts_db::{ContractRecord, ContractsDb};
pub use covered_ranges::{CoveredRange, RangeLedger};
pub use failure_log::FailureLog;

/// Durable contract persistence as seen by the sync pipeline.
#[async_trait]
pub trait ContractStore: Send + Sync {
    async fn exists(&self, address: Address) -> anyhow::Result<bool>;

    /// Insert or refresh. Must never regress `create_block` / `create_time`.
    async fn upsert(&self, record: ContractRecord) -> anyhow::Result<()>;

    /// 0 when nothing has been stored yet.
    async fn highest_create_block(&self) -> anyhow::Result<u64>;

    /// Whether some stored contract was created in `block`.
    async fn block_has_contract(&self, block: u64) -> anyhow::Result<bool>;
}

async fn run_blocking<T, F>(db: &ContractsDb, context: &'static str, op: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(ContractsDb) -> anyhow::Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || op(db))
        .await
        .with_context(|| format!("{context} task aborted"))?
}

#[async_trait]
impl ContractStore for ContractsDb {
    async fn exists(&self, address: Address) -> anyhow::Result<bool> {
        run_blocking(self, "contract_exists", move |db| db.contract_exists(&address)).await
    }

    async fn upsert(&self, record: ContractRecord) -> anyhow::Result<()> {
        run_blocking(self, "upsert_contract", move |db| db.upsert_contract(&record)).await
    }

    async fn highest_create_block(&self) -> anyhow::Result<u64> {
        run_blocking(self, "max_create_block", |db| db.max_create_block()).await
    }

    async fn block_has_contract(&self, block: u64) -> anyhow::Result<bool> {
        run_blocking(self, "has_contract_in_block", move |db| {
            db.has_contract_in_block(block)
        })
        .await
    }
}
