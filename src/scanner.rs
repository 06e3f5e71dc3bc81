//! Block-by-block discovery of contract deployments.

use crate::chain::ChainNode;
use crate::error::{ResolveError, SyncError};
use crate::source_resolver::{ResolvedSource, SourceResolver};
use crate::storage::{ContractRecord, ContractStore, FailureLog};
use crate::utils::cancel::{pause, with_cancel};
use crate::utils::error::compact_error_message;
use crate::utils::hex::{bytecode_hex, canonical_address, wei_to_ether_string};
use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SCAN_ERR_MAX_LEN: usize = 260;
const SKIP_PROGRESS_EVERY: u64 = 100;

/// Code, source status and balance for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContract {
    pub code: String,
    pub verified: bool,
    pub balance: String,
}

/// Why a single address could not be materialized.
#[derive(Debug)]
pub(crate) enum ItemFailure {
    Cancelled,
    /// Bytecode could not be fetched; the address is skipped.
    Code(String),
}

/// Fetches bytecode, asks `resolver` for verified source and reads the balance.
///
/// A resolver failure falls back to bytecode and appends `log_as` to
/// `fail_log`. A balance failure stores a zero balance.
pub(crate) async fn resolve_contract(
    node: &dyn ChainNode,
    resolver: &dyn SourceResolver,
    fail_log: &FailureLog,
    address: Address,
    log_as: &str,
    cancel: &CancellationToken,
) -> Result<ResolvedContract, ItemFailure> {
    let code = match with_cancel(cancel, node.code_at(address)).await {
        Err(_) => return Err(ItemFailure::Cancelled),
        Ok(Ok(code)) => code,
        Ok(Err(err)) => {
            return Err(ItemFailure::Code(compact_error_message(
                &format!("{err:#}"),
                SCAN_ERR_MAX_LEN,
            )))
        }
    };
    let bytecode = bytecode_hex(&code);

    let (code, verified) = match resolver.resolve(address, cancel).await {
        Ok(ResolvedSource::Verified(source)) => (source, true),
        Ok(ResolvedSource::Unverified) => (bytecode, false),
        Err(ResolveError::Cancelled) => return Err(ItemFailure::Cancelled),
        Err(err) => {
            tracing::warn!(
                "[VERIFY] Source lookup for {} via {} failed, storing bytecode: {}",
                log_as,
                resolver.name(),
                compact_error_message(&err.to_string(), SCAN_ERR_MAX_LEN)
            );
            fail_log.record(log_as);
            (bytecode, false)
        }
    };

    let balance = match with_cancel(cancel, node.balance_at(address)).await {
        Err(_) => return Err(ItemFailure::Cancelled),
        Ok(Ok(wei)) => wei,
        Ok(Err(err)) => {
            tracing::warn!(
                "[SCAN] Balance lookup for {} failed, storing 0: {}",
                log_as,
                compact_error_message(&format!("{err:#}"), SCAN_ERR_MAX_LEN)
            );
            U256::ZERO
        }
    };

    Ok(ResolvedContract {
        code,
        verified,
        balance: wei_to_ether_string(balance),
    })
}

/// What happened to one deployment candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    Stored,
    Known,
    /// A read failed; the block must not be recorded as covered.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub discovered: u64,
    pub skipped: u64,
    /// Blocks that were not fully processed, ascending.
    pub failed_blocks: Vec<u64>,
}

pub struct BlockScanner {
    node: Arc<dyn ChainNode>,
    store: Arc<dyn ContractStore>,
    resolver: Arc<dyn SourceResolver>,
    fail_log: FailureLog,
    block_delay: Duration,
}

impl BlockScanner {
    pub fn new(
        node: Arc<dyn ChainNode>,
        store: Arc<dyn ContractStore>,
        resolver: Arc<dyn SourceResolver>,
        fail_log: FailureLog,
        block_delay: Duration,
    ) -> Self {
        Self {
            node,
            store,
            resolver,
            fail_log,
            block_delay,
        }
    }

    /// Walks `[start, end]` in ascending order.
    ///
    /// Node and store read failures skip the affected block or candidate, and
    /// the block is reported in [`ScanOutcome::failed_blocks`]. Store writes and
    /// cancellation abort.
    pub async fn scan_range(
        &self,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, SyncError> {
        let mut outcome = ScanOutcome::default();
        if start > end {
            return Ok(outcome);
        }

        for number in start..=end {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match with_cancel(cancel, self.store.block_has_contract(number)).await? {
                Ok(true) => {
                    outcome.skipped += 1;
                    if outcome.skipped % SKIP_PROGRESS_EVERY == 0 {
                        tracing::info!(
                            "[SCAN] Skipped {} already-recorded block(s), at #{}",
                            outcome.skipped,
                            number
                        );
                    }
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        "[SCAN] Block #{} existence check failed: {:#}",
                        number,
                        err
                    );
                    outcome.failed_blocks.push(number);
                    continue;
                }
            }

            let block = match with_cancel(cancel, self.node.block_by_number(number)).await? {
                Ok(Some(block)) => block,
                Ok(None) => {
                    tracing::warn!("[SCAN] Block #{} not returned by node, skipping", number);
                    outcome.failed_blocks.push(number);
                    continue;
                }
                Err(err) => {
                    tracing::warn!(
                        "[SCAN] Fetching block #{} failed, skipping: {}",
                        number,
                        compact_error_message(&format!("{err:#}"), SCAN_ERR_MAX_LEN)
                    );
                    outcome.failed_blocks.push(number);
                    continue;
                }
            };

            let mut block_failed = false;
            for tx in block.creation_transactions() {
                let created =
                    match with_cancel(cancel, self.node.created_contract(tx.hash)).await? {
                        Ok(Some(address)) if address != Address::ZERO => address,
                        Ok(_) => continue,
                        Err(err) => {
                            tracing::warn!(
                                "[SCAN] Receipt for {} in block #{} unavailable: {}",
                                tx.hash,
                                number,
                                compact_error_message(&format!("{err:#}"), SCAN_ERR_MAX_LEN)
                            );
                            block_failed = true;
                            continue;
                        }
                    };
                match self
                    .process_candidate(created, block.number, block.timestamp, cancel)
                    .await?
                {
                    Candidate::Stored => outcome.discovered += 1,
                    Candidate::Known => {}
                    Candidate::Failed => block_failed = true,
                }
            }
            if block_failed {
                outcome.failed_blocks.push(number);
            }

            pause(cancel, self.block_delay).await?;
        }

        Ok(outcome)
    }

    /// Resolves and stores one deployment.
    async fn process_candidate(
        &self,
        address: Address,
        block_number: u64,
        block_timestamp: u64,
        cancel: &CancellationToken,
    ) -> Result<Candidate, SyncError> {
        let key = canonical_address(&address);
        match with_cancel(cancel, self.store.exists(address)).await? {
            Ok(true) => return Ok(Candidate::Known),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(
                    "[SCAN] Existence check for {} (block #{}) failed, skipping: {:#}",
                    key,
                    block_number,
                    err
                );
                return Ok(Candidate::Failed);
            }
        }

        let resolved = match resolve_contract(
            self.node.as_ref(),
            self.resolver.as_ref(),
            &self.fail_log,
            address,
            &key,
            cancel,
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(ItemFailure::Cancelled) => return Err(SyncError::Cancelled),
            Err(ItemFailure::Code(message)) => {
                tracing::warn!(
                    "[SCAN] Code fetch for {} (block #{}) failed, skipping: {}",
                    key,
                    block_number,
                    message
                );
                return Ok(Candidate::Failed);
            }
        };

        let created_at = i64::try_from(block_timestamp).unwrap_or(i64::MAX);
        let record = ContractRecord::discovered(
            &address,
            resolved.code,
            resolved.verified,
            resolved.balance,
            block_number,
            created_at,
        );
        with_cancel(cancel, self.store.upsert(record))
            .await?
            .map_err(|err| SyncError::store(format!("upsert {key} (block #{block_number})"), err))?;

        tracing::info!(
            "[SCAN] Stored {} from block #{} (verified={})",
            key,
            block_number,
            resolved.verified
        );
        Ok(Candidate::Stored)
    }
}
