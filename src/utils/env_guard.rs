use std::fs;
use std::path::Path;

/// Splits one `.env` line into a key and an unquoted value.
///
/// Blank lines, `#` comments and lines without `=` yield `None`. Trailing
/// `# comment` text after the value is dropped.
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let value_no_comment = value.split('#').next().unwrap_or("").trim();
    let parsed = if value_no_comment.len() >= 2
        && ((value_no_comment.starts_with('"') && value_no_comment.ends_with('"'))
            || (value_no_comment.starts_with('\'') && value_no_comment.ends_with('\'')))
    {
        &value_no_comment[1..value_no_comment.len() - 1]
    } else {
        value_no_comment
    };
    Some((key, parsed))
}

/// Loads `path` into the process environment without overriding variables
/// that are already set. Returns how many variables were applied.
pub fn load_env_file(path: &Path) -> usize {
    if !path.exists() {
        return 0;
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ENV] Failed to read {}: {}", path.display(), e);
            return 0;
        }
    };

    let mut applied = 0usize;
    for (key, value) in content.lines().filter_map(parse_env_line) {
        if std::env::var_os(key).is_some() {
            continue;
        }
        std::env::set_var(key, value);
        applied += 1;
    }
    applied
}

pub fn harden_env_setup() {
    load_env_file(Path::new(".env"));
    if std::env::var("ETH_RPC_URL").is_err() {
        eprintln!("[ENV] WARN: ETH_RPC_URL is not set");
    }
    if std::env::var("ETHERSCAN_API_KEY").is_err() {
        eprintln!("[ENV] WARN: ETHERSCAN_API_KEY is not set; contracts will be stored as bytecode");
    }
}
