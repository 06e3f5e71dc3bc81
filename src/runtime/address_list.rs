use crate::utils::hex::is_address_literal;
use anyhow::Context;
use std::path::Path;

/// Extracts addresses from a one-per-line list. Blank lines and `#` comments
/// are ignored; anything that is not a `0x` + 40 hex address is dropped with a warning.
pub fn parse_address_lines(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        if !is_address_literal(entry) {
            tracing::warn!("[SYNC] Ignoring invalid address on line {}: {}", idx + 1, entry);
            continue;
        }
        out.push(entry.to_string());
    }
    out
}

pub fn read_address_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read address file {}", path.display()))?;
    let addresses = parse_address_lines(&content);
    if addresses.is_empty() {
        return Err(anyhow::anyhow!(
            "address file {} contains no valid addresses",
            path.display()
        ));
    }
    Ok(addresses)
}
