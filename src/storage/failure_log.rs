use anyhow::Context;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only list of addresses whose resolution failed, one per line.
#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn append(&self, address: &str) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open failure log {}", self.path.display()))?;
        writeln!(file, "{}", address.trim())
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }

    /// Like [`FailureLog::append`] but only logs write errors.
    pub fn record(&self, address: &str) {
        if let Err(err) = self.append(address) {
            tracing::warn!("[SYNC] Could not record failed address {}: {:#}", address, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FailureLog;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn test_failure_log_appends_trimmed_lines() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!("failure_log_{nanos}.txt"));
        let log = FailureLog::new(&path);

        log.append("  0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa ").expect("append");
        log.record("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        log.record("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");

        let content = std::fs::read_to_string(&path).expect("read");
        assert_eq!(
            content.lines().collect::<Vec<_>>(),
            vec![
                "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            ]
        );
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_failure_log_record_swallows_errors() {
        let log = FailureLog::new("/nonexistent-dir-for-contract-sync/failed.txt");
        log.record("0xcccccccccccccccccccccccccccccccccccccccc");
        assert!(log.append("0xcc").is_err());
    }
}
