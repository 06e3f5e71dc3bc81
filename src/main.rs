//! Contract synchronizer binary: resume, explicit range, or address-list retry.

use anyhow::Context;
use contract_sync::rate_limit::RateLimiter;
use contract_sync::runtime::{parse_runtime_args, read_address_file, RunMode, USAGE};
use contract_sync::utils::config::Config;
use contract_sync::utils::rpc::{build_http_client, AlloyChainNode, RetryPolicy};
use contract_sync::{
    ContractsDb, FailureLog, RangeLedger, ResolverBackend, SourceResolver, SyncError,
    Synchronizer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = parse_runtime_args()?;
    if mode == RunMode::Help {
        println!("{USAGE}");
        return Ok(());
    }

    contract_sync::utils::env_guard::harden_env_setup();

    // Default to `info` when `RUST_LOG` is unset or invalid to avoid silent startup.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    tracing::info!(
        "[CONFIG] db={} ledger={} fail_log={} floor={} verify_rps={} proxy={}",
        config.contracts_db_path.display(),
        config.covered_ranges_path.display(),
        config.fail_log_path.display(),
        config.sync_start_block,
        config.verify_requests_per_second,
        if config.http_proxy_url.is_some() { "on" } else { "off" }
    );

    let client = build_http_client(config.http_proxy_url.as_deref())?;
    let node = AlloyChainNode::connect(
        client.clone(),
        &config.eth_rpc_url,
        RetryPolicy::new(config.rpc_call_attempts, config.rpc_call_timeout_ms),
    )?;
    let store = ContractsDb::open(&config.contracts_db_path).with_context(|| {
        format!(
            "failed to open contract store {}",
            config.contracts_db_path.display()
        )
    })?;
    let limiter = Arc::new(RateLimiter::per_second(config.verify_requests_per_second));
    let resolver = ResolverBackend::from_config(&config, client, limiter);
    tracing::info!("[CONFIG] Source resolver: {}", resolver.name());
    let ledger = RangeLedger::load(&config.covered_ranges_path)?;

    let sync = Synchronizer::new(
        Arc::new(node),
        Arc::new(store),
        Arc::new(resolver),
        ledger,
        FailureLog::new(&config.fail_log_path),
        config.sync_settings(),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("[SYNC] Ctrl-C received; stopping after the current item");
            on_signal.cancel();
        }
    });

    let outcome = match mode {
        RunMode::ResumeFromLast => sync.download_from_last(&cancel).await.map(|report| {
            if let Some(report) = report {
                tracing::info!(
                    "[SYNC] Resume run done: {} new contract(s), {} failed block(s)",
                    report.discovered,
                    report.failed_blocks.len()
                );
            }
        }),
        RunMode::Range { start, end } => {
            sync.download_block_range(start, end, &cancel)
                .await
                .map(|report| {
                    tracing::info!(
                        "[SYNC] Range run done: {} new contract(s), {} failed block(s)",
                        report.discovered,
                        report.failed_blocks.len()
                    );
                })
        }
        RunMode::AddressFile(path) => {
            let addresses = read_address_file(&path)?;
            sync.download_by_addresses(&addresses, &config.fail_log_path, &cancel)
                .await
                .map(|_| ())
        }
        RunMode::Help => Ok(()),
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(SyncError::Cancelled) => {
            tracing::warn!("[SYNC] Cancelled; committed progress is kept");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
