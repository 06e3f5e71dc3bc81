//! Entry points that tie the range ledger, block scanner, resolver and store together.

use crate::chain::ChainNode;
use crate::error::{Result, SyncError};
use crate::scanner::{resolve_contract, BlockScanner, ItemFailure};
use crate::source_resolver::SourceResolver;
use crate::storage::contracts_db::now_unix_secs;
use crate::storage::{ContractRecord, ContractStore, CoveredRange, FailureLog, RangeLedger};
use crate::utils::cancel::{pause, with_cancel};
use crate::utils::error::compact_error_message;
use alloy::primitives::Address;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// What to record for a sub-interval in which some blocks could not be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedBlockPolicy {
    /// Leave failed blocks uncovered so a later run retries them.
    Exclude,
    /// Record the whole sub-interval regardless.
    MarkCovered,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// First block to scan when the store is empty.
    pub start_floor: u64,
    pub block_delay: Duration,
    pub address_delay: Duration,
    pub failed_block_policy: FailedBlockPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            start_floor: 0,
            block_delay: Duration::from_millis(50),
            address_delay: Duration::from_millis(100),
            failed_block_policy: FailedBlockPolicy::Exclude,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSyncReport {
    pub requested: Option<CoveredRange>,
    /// Sub-intervals that were not yet covered when the run started.
    pub uncovered: Vec<CoveredRange>,
    pub discovered: u64,
    pub skipped_blocks: u64,
    pub failed_blocks: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSyncReport {
    pub unique: usize,
    pub stored: usize,
    pub already_present: usize,
    pub failed: usize,
}

/// Scan window for a resume run, or `None` when there is nothing to do.
///
/// An empty store (`highest == 0`) starts at `floor`; otherwise scanning picks
/// up right after the newest recorded deployment, never below `floor`.
pub fn resume_window(highest: u64, head: u64, floor: u64) -> Option<(u64, u64)> {
    let start = if highest == 0 {
        floor
    } else {
        highest.saturating_add(1).max(floor)
    };
    (start <= head).then_some((start, head))
}

/// Ranges to record once `range` has been walked.
pub fn covered_after_scan(
    range: CoveredRange,
    failed_blocks: &[u64],
    policy: FailedBlockPolicy,
) -> Vec<CoveredRange> {
    if policy == FailedBlockPolicy::MarkCovered || failed_blocks.is_empty() {
        return vec![range];
    }
    let mut failed: Vec<u64> = failed_blocks
        .iter()
        .copied()
        .filter(|b| *b >= range.start && *b <= range.end)
        .collect();
    failed.sort_unstable();
    failed.dedup();

    let mut pieces = Vec::new();
    let mut cursor = Some(range.start);
    for block in failed {
        let Some(from) = cursor else { break };
        if block > from {
            pieces.push(CoveredRange::new(from, block - 1));
        }
        cursor = block.checked_add(1);
    }
    if let Some(from) = cursor.filter(|from| *from <= range.end) {
        pieces.push(CoveredRange::new(from, range.end));
    }
    pieces
}

/// Deduplicates case-insensitively, keeping first-seen order and spelling.
pub fn dedup_addresses(addresses: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    addresses
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .filter(|a| seen.insert(a.to_ascii_lowercase()))
        .map(str::to_string)
        .collect()
}

pub struct Synchronizer {
    node: Arc<dyn ChainNode>,
    store: Arc<dyn ContractStore>,
    resolver: Arc<dyn SourceResolver>,
    ledger: Mutex<RangeLedger>,
    scanner: BlockScanner,
    settings: SyncSettings,
}

impl Synchronizer {
    pub fn new(
        node: Arc<dyn ChainNode>,
        store: Arc<dyn ContractStore>,
        resolver: Arc<dyn SourceResolver>,
        ledger: RangeLedger,
        fail_log: FailureLog,
        settings: SyncSettings,
    ) -> Self {
        let scanner = BlockScanner::new(
            node.clone(),
            store.clone(),
            resolver.clone(),
            fail_log,
            settings.block_delay,
        );
        Self {
            node,
            store,
            resolver,
            ledger: Mutex::new(ledger),
            scanner,
            settings,
        }
    }

    pub async fn covered_ranges(&self) -> Vec<CoveredRange> {
        self.ledger.lock().await.covered().to_vec()
    }

    /// Scans every not-yet-covered part of `[start, end]`, recording each
    /// sub-interval once it has been walked end to end.
    pub async fn download_block_range(
        &self,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<RangeSyncReport> {
        let mut report = RangeSyncReport::default();
        if start > end {
            tracing::warn!("[SYNC] Ignoring inverted range {}-{}", start, end);
            return Ok(report);
        }
        report.requested = Some(CoveredRange::new(start, end));

        let uncovered = self.ledger.lock().await.uncovered(start, end);
        if uncovered.is_empty() {
            tracing::info!("[SYNC] Blocks {}-{} already covered", start, end);
            return Ok(report);
        }
        tracing::info!(
            "[SYNC] {} uncovered sub-range(s) in {}-{}",
            uncovered.len(),
            start,
            end
        );
        report.uncovered = uncovered.clone();

        for gap in uncovered {
            tracing::info!("[SYNC] Scanning blocks {}-{}", gap.start, gap.end);
            let outcome = self.scanner.scan_range(gap.start, gap.end, cancel).await?;

            let pieces =
                covered_after_scan(gap, &outcome.failed_blocks, self.settings.failed_block_policy);
            {
                let mut ledger = self.ledger.lock().await;
                for piece in pieces {
                    ledger
                        .record(piece)
                        .map_err(|err| SyncError::Ledger(format!("{err:#}")))?;
                }
            }

            if !outcome.failed_blocks.is_empty() {
                tracing::warn!(
                    "[SYNC] {} block(s) in {}-{} were not fully processed{}",
                    outcome.failed_blocks.len(),
                    gap.start,
                    gap.end,
                    match self.settings.failed_block_policy {
                        FailedBlockPolicy::Exclude => "; left uncovered for retry",
                        FailedBlockPolicy::MarkCovered => "; marked covered anyway",
                    }
                );
            }
            tracing::info!(
                "[SYNC] Finished blocks {}-{}: {} new contract(s), {} skipped block(s)",
                gap.start,
                gap.end,
                outcome.discovered,
                outcome.skipped
            );

            report.discovered += outcome.discovered;
            report.skipped_blocks += outcome.skipped;
            report.failed_blocks.extend(outcome.failed_blocks);
        }

        Ok(report)
    }

    /// Continues from the newest stored deployment up to the current head.
    /// Returns `None` when the store is already at the head.
    pub async fn download_from_last(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<RangeSyncReport>> {
        let highest = with_cancel(cancel, self.store.highest_create_block())
            .await?
            .map_err(|err| SyncError::store("resume point lookup", err))?;
        let head = with_cancel(cancel, self.node.current_block_number())
            .await?
            .map_err(|err| SyncError::Node {
                stage: "chain head lookup".to_string(),
                message: compact_error_message(&format!("{err:#}"), 260),
            })?;

        let Some((start, end)) = resume_window(highest, head, self.settings.start_floor) else {
            tracing::info!(
                "[SYNC] Nothing to do: last recorded block {} is at or past head {}",
                highest,
                head
            );
            return Ok(None);
        };
        tracing::info!("[SYNC] Resuming from block {} to head {}", start, end);
        self.download_block_range(start, end, cancel).await.map(Some)
    }

    /// Resolves an explicit list of addresses without scanning blocks.
    ///
    /// Every address that cannot be fully processed is appended, as spelled in
    /// `addresses`, to the failure log at `fail_log_path`. Only store writes and
    /// cancellation abort the run.
    ///
    /// An address whose source lookup failed is still stored as bytecode, so
    /// feeding the failure log back in skips it as already stored.
    pub async fn download_by_addresses(
        &self,
        addresses: &[String],
        fail_log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<AddressSyncReport> {
        let fail_log = FailureLog::new(fail_log_path);
        let unique = dedup_addresses(addresses);
        let mut report = AddressSyncReport {
            unique: unique.len(),
            ..AddressSyncReport::default()
        };
        tracing::info!(
            "[SYNC] Processing {} unique address(es) of {} supplied",
            unique.len(),
            addresses.len()
        );

        for (idx, raw) in unique.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if idx > 0 {
                pause(cancel, self.settings.address_delay).await?;
            }

            let address = match Address::from_str(raw) {
                Ok(address) => address,
                Err(err) => {
                    tracing::warn!("[SYNC] Skipping malformed address {}: {}", raw, err);
                    fail_log.record(raw);
                    report.failed += 1;
                    continue;
                }
            };

            match with_cancel(cancel, self.store.exists(address)).await? {
                Ok(true) => {
                    tracing::info!("[SYNC] {} already stored, skipping", raw);
                    report.already_present += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!("[SYNC] Existence check for {} failed: {:#}", raw, err);
                    fail_log.record(raw);
                    report.failed += 1;
                    continue;
                }
            }

            let resolved = match resolve_contract(
                self.node.as_ref(),
                self.resolver.as_ref(),
                &fail_log,
                address,
                raw,
                cancel,
            )
            .await
            {
                Ok(resolved) => resolved,
                Err(ItemFailure::Cancelled) => return Err(SyncError::Cancelled),
                Err(ItemFailure::Code(message)) => {
                    tracing::warn!("[SYNC] Code fetch for {} failed: {}", raw, message);
                    fail_log.record(raw);
                    report.failed += 1;
                    continue;
                }
            };

            let verified = resolved.verified;
            let record = ContractRecord::discovered(
                &address,
                resolved.code,
                verified,
                resolved.balance,
                0,
                now_unix_secs(),
            );
            with_cancel(cancel, self.store.upsert(record))
                .await?
                .map_err(|err| SyncError::store(format!("upsert {raw}"), err))?;
            report.stored += 1;
            tracing::info!("[SYNC] Stored {} (verified={})", raw, verified);
        }

        tracing::info!(
            "[SYNC] Address run finished: {} stored, {} already present, {} failed",
            report.stored,
            report.already_present,
            report.failed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: u64, end: u64) -> CoveredRange {
        CoveredRange::new(start, end)
    }

    #[test]
    fn test_resume_window_continues_after_highest_block() {
        assert_eq!(resume_window(999, 1_005, 0), Some((1_000, 1_005)));
    }

    #[test]
    fn test_resume_window_empty_store_uses_floor() {
        assert_eq!(resume_window(0, 1_005, 0), Some((0, 1_005)));
        assert_eq!(resume_window(0, 1_005, 900), Some((900, 1_005)));
    }

    #[test]
    fn test_resume_window_noop_when_caught_up() {
        assert_eq!(resume_window(1_005, 1_005, 0), None);
        assert_eq!(resume_window(0, 10, 11), None);
        assert_eq!(resume_window(u64::MAX, u64::MAX, 0), None);
    }

    #[test]
    fn test_resume_window_never_goes_below_floor() {
        assert_eq!(resume_window(10, 100, 50), Some((50, 100)));
    }

    #[test]
    fn test_covered_after_scan_excludes_failed_blocks() {
        assert_eq!(
            covered_after_scan(r(10, 20), &[12, 13, 20], FailedBlockPolicy::Exclude),
            vec![r(10, 11), r(14, 19)]
        );
        assert_eq!(
            covered_after_scan(r(10, 20), &[10], FailedBlockPolicy::Exclude),
            vec![r(11, 20)]
        );
        assert!(covered_after_scan(r(5, 5), &[5], FailedBlockPolicy::Exclude).is_empty());
    }

    #[test]
    fn test_covered_after_scan_mark_covered_keeps_whole_range() {
        assert_eq!(
            covered_after_scan(r(10, 20), &[12, 13], FailedBlockPolicy::MarkCovered),
            vec![r(10, 20)]
        );
        assert_eq!(
            covered_after_scan(r(10, 20), &[], FailedBlockPolicy::Exclude),
            vec![r(10, 20)]
        );
    }

    #[test]
    fn test_covered_after_scan_handles_u64_ceiling() {
        assert_eq!(
            covered_after_scan(r(u64::MAX - 2, u64::MAX), &[u64::MAX], FailedBlockPolicy::Exclude),
            vec![r(u64::MAX - 2, u64::MAX - 1)]
        );
    }

    #[test]
    fn test_dedup_addresses_is_case_insensitive() {
        let input = vec![
            "0xAA".to_string(),
            " 0xaa ".to_string(),
            "".to_string(),
            "0xBB".to_string(),
        ];
        assert_eq!(dedup_addresses(&input), vec!["0xAA", "0xBB"]);
    }
}
