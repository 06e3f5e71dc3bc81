use crate::error::ConfigError;
use crate::sync::{FailedBlockPolicy, SyncSettings};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

type Result<T> = std::result::Result<T, ConfigError>;

pub const DEFAULT_ETHERSCAN_BASE_URL: &str = "https://api.etherscan.io/v2";
const DEFAULT_ETHERSCAN_CHAIN_ID: u64 = 1;
const DEFAULT_CONTRACTS_DB_PATH: &str = "contracts.db";
const DEFAULT_COVERED_RANGES_PATH: &str = "covered_ranges.json";
const DEFAULT_FAIL_LOG_PATH: &str = "failed_addresses.txt";
const DEFAULT_VERIFY_REQUESTS_PER_SECOND: u32 = 5;
const DEFAULT_SCAN_BLOCK_DELAY_MS: u64 = 50;
const DEFAULT_ADDRESS_DELAY_MS: u64 = 100;
const DEFAULT_RPC_CALL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RPC_CALL_ATTEMPTS: u64 = 1;
const DEFAULT_VERIFY_HTTP_TIMEOUT_MS: u64 = 20_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub eth_rpc_url: String,
    pub etherscan_api_key: Option<String>,
    pub etherscan_base_url: String,
    pub etherscan_chain_id: u64,
    pub http_proxy_url: Option<String>,
    pub contracts_db_path: PathBuf,
    pub covered_ranges_path: PathBuf,
    pub fail_log_path: PathBuf,
    pub sync_start_block: u64,
    pub verify_requests_per_second: u32,
    pub scan_block_delay_ms: u64,
    pub address_delay_ms: u64,
    pub rpc_call_timeout_ms: u64,
    pub rpc_call_attempts: usize,
    pub verify_http_timeout_ms: u64,
    pub mark_failed_blocks_covered: bool,
}

pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn validate_http_url(name: &str, raw: &str) -> Result<()> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::Invalid(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))),
    }
}

/// Accepts `http`, `https` and `socks5` proxies with a non-empty host.
pub fn validate_proxy_url(raw: &str) -> Result<()> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::Invalid(format!("HTTP_PROXY_URL must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" | "socks5" => {}
        other => {
            return Err(ConfigError::Invalid(format!(
                "HTTP_PROXY_URL must use http, https or socks5, got `{other}`"
            )))
        }
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ConfigError::Invalid(format!(
            "HTTP_PROXY_URL must include a host, got `{raw}`"
        ))),
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_u64(name: &str, raw: Option<String>, default: u64) -> Result<u64> {
    match non_empty(raw) {
        None => Ok(default),
        Some(value) => value.parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!("{name} must be a valid u64, got `{value}`"))
        }),
    }
}

fn parse_bounded_u64(
    name: &str,
    raw: Option<String>,
    default: u64,
    bounds: RangeInclusive<u64>,
) -> Result<u64> {
    let value = parse_u64(name, raw, default)?;
    if bounds.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be within {}..={}, got {value}",
            bounds.start(),
            bounds.end()
        )))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source.
    ///
    /// Unparseable or out-of-range values are rejected. The verification rate is
    /// the exception: it is clamped to `1..=100`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let eth_rpc_url = non_empty(lookup("ETH_RPC_URL"))
            .ok_or_else(|| ConfigError::Missing("ETH_RPC_URL must be set".to_string()))?;
        validate_http_url("ETH_RPC_URL", &eth_rpc_url)?;

        let etherscan_api_key = non_empty(lookup("ETHERSCAN_API_KEY"));
        let etherscan_base_url = non_empty(lookup("ETHERSCAN_BASE_URL"))
            .unwrap_or_else(|| DEFAULT_ETHERSCAN_BASE_URL.to_string());
        validate_http_url("ETHERSCAN_BASE_URL", &etherscan_base_url)?;
        let etherscan_chain_id = parse_u64(
            "ETHERSCAN_CHAIN_ID",
            lookup("ETHERSCAN_CHAIN_ID"),
            DEFAULT_ETHERSCAN_CHAIN_ID,
        )?;

        let http_proxy_url = non_empty(lookup("HTTP_PROXY_URL"));
        if let Some(proxy) = http_proxy_url.as_deref() {
            validate_proxy_url(proxy)?;
        }

        let path_or = |name: &str, default: &str| {
            non_empty(lookup(name))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        };

        let sync_start_block = parse_u64("SYNC_START_BLOCK", lookup("SYNC_START_BLOCK"), 0)?;

        let verify_requests_per_second = parse_u64(
            "VERIFY_REQUESTS_PER_SECOND",
            lookup("VERIFY_REQUESTS_PER_SECOND"),
            u64::from(DEFAULT_VERIFY_REQUESTS_PER_SECOND),
        )?
        .clamp(1, 100) as u32;
        let scan_block_delay_ms = parse_bounded_u64(
            "SCAN_BLOCK_DELAY_MS",
            lookup("SCAN_BLOCK_DELAY_MS"),
            DEFAULT_SCAN_BLOCK_DELAY_MS,
            0..=60_000,
        )?;
        let address_delay_ms = parse_bounded_u64(
            "ADDRESS_DELAY_MS",
            lookup("ADDRESS_DELAY_MS"),
            DEFAULT_ADDRESS_DELAY_MS,
            0..=60_000,
        )?;
        let rpc_call_timeout_ms = parse_bounded_u64(
            "RPC_CALL_TIMEOUT_MS",
            lookup("RPC_CALL_TIMEOUT_MS"),
            DEFAULT_RPC_CALL_TIMEOUT_MS,
            250..=120_000,
        )?;
        let rpc_call_attempts = parse_bounded_u64(
            "RPC_CALL_ATTEMPTS",
            lookup("RPC_CALL_ATTEMPTS"),
            DEFAULT_RPC_CALL_ATTEMPTS,
            1..=10,
        )? as usize;
        let verify_http_timeout_ms = parse_bounded_u64(
            "VERIFY_HTTP_TIMEOUT_MS",
            lookup("VERIFY_HTTP_TIMEOUT_MS"),
            DEFAULT_VERIFY_HTTP_TIMEOUT_MS,
            1_000..=120_000,
        )?;
        let mark_failed_blocks_covered = match non_empty(lookup("SCAN_MARK_FAILED_BLOCKS_COVERED"))
        {
            None => false,
            Some(raw) => parse_bool_flag(&raw).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "SCAN_MARK_FAILED_BLOCKS_COVERED must be a boolean, got `{raw}`"
                ))
            })?,
        };

        Ok(Self {
            eth_rpc_url,
            etherscan_api_key,
            etherscan_base_url,
            etherscan_chain_id,
            http_proxy_url,
            contracts_db_path: path_or("CONTRACTS_DB_PATH", DEFAULT_CONTRACTS_DB_PATH),
            covered_ranges_path: path_or("COVERED_RANGES_PATH", DEFAULT_COVERED_RANGES_PATH),
            fail_log_path: path_or("FAIL_LOG_PATH", DEFAULT_FAIL_LOG_PATH),
            sync_start_block,
            verify_requests_per_second,
            scan_block_delay_ms,
            address_delay_ms,
            rpc_call_timeout_ms,
            rpc_call_attempts,
            verify_http_timeout_ms,
            mark_failed_blocks_covered,
        })
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            start_floor: self.sync_start_block,
            block_delay: Duration::from_millis(self.scan_block_delay_ms),
            address_delay: Duration::from_millis(self.address_delay_ms),
            failed_block_policy: if self.mark_failed_blocks_covered {
                FailedBlockPolicy::MarkCovered
            } else {
                FailedBlockPolicy::Exclude
            },
        }
    }
}
