//! Durable record of block intervals that have been fully scanned.
//!
//! The set is kept normalized: sorted by `start`, non-overlapping and with no
//! two ranges adjacent. It is the only state needed to resume a sync.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Inclusive block interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoveredRange {
    pub start: u64,
    pub end: u64,
}

impl CoveredRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Sorts and coalesces overlapping or adjacent ranges. Inverted ranges are dropped.
pub fn normalize(mut ranges: Vec<CoveredRange>) -> Vec<CoveredRange> {
    ranges.retain(|r| !r.is_empty());
    ranges.sort_by_key(|r| (r.start, r.end));

    let mut merged: Vec<CoveredRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(current) if range.start <= current.end.saturating_add(1) => {
                current.end = current.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Gaps inside `[start, end]` not covered by `covered`, in ascending order.
pub fn uncovered_ranges(covered: &[CoveredRange], start: u64, end: u64) -> Vec<CoveredRange> {
    if start > end {
        return Vec::new();
    }

    let mut gaps = Vec::new();
    let mut cursor = start;
    for range in normalize(covered.to_vec()) {
        if range.end < cursor {
            continue;
        }
        if range.start > end {
            break;
        }
        if range.start > cursor {
            gaps.push(CoveredRange::new(cursor, range.start - 1));
        }
        if range.end >= end {
            return gaps;
        }
        cursor = range.end + 1;
    }
    gaps.push(CoveredRange::new(cursor, end));
    gaps
}

/// Adds `new_range` and returns the normalized result.
pub fn record_covered(covered: &[CoveredRange], new_range: CoveredRange) -> Vec<CoveredRange> {
    let mut next = covered.to_vec();
    next.push(new_range);
    normalize(next)
}

/// File-backed covered-range set.
///
/// Writes go to a sibling temp file and are renamed into place so a crash
/// mid-write leaves the previous state intact.
#[derive(Debug)]
pub struct RangeLedger {
    path: PathBuf,
    ranges: Vec<CoveredRange>,
}

impl RangeLedger {
    /// Missing file loads as empty. An unreadable or unparseable file is an error.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ranges = match fs::read(&path) {
            Ok(raw) if raw.iter().all(|b| b.is_ascii_whitespace()) => Vec::new(),
            Ok(raw) => {
                let parsed: Vec<CoveredRange> = serde_json::from_slice(&raw).with_context(|| {
                    format!("covered-range file {} is not valid JSON", path.display())
                })?;
                normalize(parsed)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read covered-range file {}", path.display())
                })
            }
        };
        tracing::debug!(
            "[LEDGER] Loaded {} covered range(s) from {}",
            ranges.len(),
            path.display()
        );
        Ok(Self { path, ranges })
    }

    pub fn covered(&self) -> &[CoveredRange] {
        &self.ranges
    }

    pub fn uncovered(&self, start: u64, end: u64) -> Vec<CoveredRange> {
        uncovered_ranges(&self.ranges, start, end)
    }

    /// Merges `range` and persists the whole set. The in-memory set only changes
    /// once the write succeeded.
    pub fn record(&mut self, range: CoveredRange) -> anyhow::Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        let next = record_covered(&self.ranges, range);
        if next == self.ranges {
            return Ok(());
        }
        self.persist(&next)?;
        self.ranges = next;
        Ok(())
    }

    fn persist(&self, ranges: &[CoveredRange]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(ranges).context("failed to encode covered ranges")?;
        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "covered_ranges.json".into());
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);
        fs::write(&tmp_path, body)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "failed to move {} into {}",
                tmp_path.display(),
                self.path.display()
            )
        })
    }
}
