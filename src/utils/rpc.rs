use crate::chain::{BlockTx, ChainBlock, ChainNode};
use alloy::consensus::Transaction; // Trait for .to()
use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::BlockTransactionsKind;
use alloy::transports::http::Http;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tokio::time::{sleep, timeout, Duration};

pub type HttpProvider = RootProvider<Http<Client>>;

pub const USER_AGENT: &str = concat!("contract_sync/", env!("CARGO_PKG_VERSION"));

const RPC_ERR_MAX_LEN: usize = 260;
const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: usize, call_timeout_ms: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            call_timeout: Duration::from_millis(call_timeout_ms),
        }
    }
}

fn retry_backoff_ms(attempt: usize) -> u64 {
    bounded_exponential_backoff_ms(100, attempt as u32, 1_800)
}

fn is_retryable_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    let non_retryable = [
        "method not found",
        "-32601",
        "invalid params",
        "-32602",
        "unknown variant",
        "did not match any variant",
        "parse error",
        "-32700",
    ];
    !non_retryable.iter().any(|needle| msg.contains(needle))
}

pub fn is_rate_limited_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("429")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("compute units per second")
        || msg.contains("throughput")
}

pub fn bounded_exponential_backoff_ms(base_ms: u64, streak: u32, cap_ms: u64) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    let clamped = streak.min(8);
    base_ms
        .saturating_mul(1u64 << clamped)
        .min(cap_ms.max(base_ms))
}

pub fn compact_rpc_error_message(message: &str) -> String {
    crate::utils::error::compact_error_message(message, RPC_ERR_MAX_LEN)
}

async fn run_with_retry<T, Op, Fut>(policy: RetryPolicy, context: &str, mut op: Op) -> anyhow::Result<T>
where
    Op: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.attempts.max(1);
    let timeout_ms = policy.call_timeout.as_millis();
    let mut last_message = String::new();

    for attempt in 1..=max_attempts {
        match timeout(policy.call_timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                let mut message = compact_rpc_error_message(&format!("{err:#}"));
                if is_rate_limited_rpc_error(&message) {
                    message.push_str(" (rate limited)");
                }
                let retryable = is_retryable_rpc_error(&message);
                last_message = message;
                if !retryable || attempt == max_attempts {
                    return Err(anyhow::anyhow!(
                        "{} failed on attempt {}/{}: {}",
                        context,
                        attempt,
                        max_attempts,
                        last_message
                    ));
                }
            }
            Err(_) => {
                last_message = format!("timed out after {}ms", timeout_ms);
                if attempt == max_attempts {
                    return Err(anyhow::anyhow!(
                        "{} failed on attempt {}/{}: {}",
                        context,
                        attempt,
                        max_attempts,
                        last_message
                    ));
                }
            }
        }
        sleep(Duration::from_millis(retry_backoff_ms(attempt))).await;
    }

    Err(anyhow::anyhow!(
        "{} failed after {} attempt(s): {}",
        context,
        max_attempts,
        last_message
    ))
}

/// Shared outbound HTTP client. The optional proxy applies to every service
/// the client is handed to.
pub fn build_http_client(proxy_url: Option<&str>) -> anyhow::Result<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS));
    if let Some(proxy) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy)
            .with_context(|| format!("invalid outbound proxy `{proxy}`"))?;
        builder = builder.proxy(proxy);
    }
    builder.build().context("failed to build HTTP client")
}

/// [`ChainNode`] backed by an alloy HTTP provider.
pub struct AlloyChainNode {
    provider: HttpProvider,
    policy: RetryPolicy,
}

impl AlloyChainNode {
    pub fn connect(client: Client, rpc_url: &str, policy: RetryPolicy) -> anyhow::Result<Self> {
        let url = rpc_url
            .parse::<reqwest::Url>()
            .with_context(|| format!("invalid chain node URL `{rpc_url}`"))?;
        let rpc_client = RpcClient::new(Http::with_client(client, url), false);
        let provider = ProviderBuilder::new().on_client(rpc_client);
        Ok(Self { provider, policy })
    }
}

#[async_trait]
impl ChainNode for AlloyChainNode {
    async fn current_block_number(&self) -> anyhow::Result<u64> {
        let provider = &self.provider;
        run_with_retry(self.policy, "get_block_number", || async move {
            provider
                .get_block_number()
                .await
                .map_err(anyhow::Error::from)
        })
        .await
    }

    async fn block_by_number(&self, number: u64) -> anyhow::Result<Option<ChainBlock>> {
        let provider = &self.provider;
        let block = run_with_retry(
            self.policy,
            &format!("get_block_by_number(#{number})"),
            || async move {
                provider
                    .get_block_by_number(
                        BlockNumberOrTag::Number(number),
                        BlockTransactionsKind::Full,
                    )
                    .await
                    .map_err(anyhow::Error::from)
            },
        )
        .await?;

        Ok(block.map(|block| {
            let number = block.header.number;
            let timestamp = block.header.timestamp;
            let transactions = block
                .transactions
                .into_transactions()
                .map(|tx| BlockTx {
                    hash: *tx.inner.tx_hash(),
                    to: tx.to(),
                })
                .collect();
            ChainBlock {
                number,
                timestamp,
                transactions,
            }
        }))
    }

    async fn created_contract(&self, tx_hash: B256) -> anyhow::Result<Option<Address>> {
        let provider = &self.provider;
        let receipt = run_with_retry(
            self.policy,
            &format!("get_transaction_receipt({tx_hash})"),
            || async move {
                provider
                    .get_transaction_receipt(tx_hash)
                    .await
                    .map_err(anyhow::Error::from)
            },
        )
        .await?;
        Ok(receipt.and_then(|r| r.contract_address))
    }

    async fn code_at(&self, address: Address) -> anyhow::Result<Bytes> {
        let provider = &self.provider;
        run_with_retry(
            self.policy,
            &format!("get_code_at({address})"),
            || async move {
                provider
                    .get_code_at(address)
                    .await
                    .map_err(anyhow::Error::from)
            },
        )
        .await
    }

    async fn balance_at(&self, address: Address) -> anyhow::Result<U256> {
        let provider = &self.provider;
        run_with_retry(
            self.policy,
            &format!("get_balance({address})"),
            || async move {
                provider
                    .get_balance(address)
                    .await
                    .map_err(anyhow::Error::from)
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_bounded_exponential_backoff_caps() {
        assert_eq!(bounded_exponential_backoff_ms(0, 5, 1_000), 0);
        assert_eq!(bounded_exponential_backoff_ms(100, 1, 1_800), 200);
        assert_eq!(bounded_exponential_backoff_ms(100, 3, 1_800), 800);
        assert_eq!(bounded_exponential_backoff_ms(100, 30, 1_800), 1_800);
    }

    #[test]
    fn test_rpc_error_classification() {
        assert!(is_rate_limited_rpc_error("HTTP error 429 Too Many Requests"));
        assert!(is_rate_limited_rpc_error("exceeded compute units per second"));
        assert!(!is_rate_limited_rpc_error("connection refused"));

        assert!(is_retryable_rpc_error("connection reset by peer"));
        assert!(!is_retryable_rpc_error("server returned an error response: error code -32601: method not found"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_run_with_retry_recovers_after_transient_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let out = run_with_retry(RetryPolicy::new(2, 1_000), "eth_chainId", move || {
            let seen = seen.clone();
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(anyhow::anyhow!("connection reset"))
                } else {
                    Ok(42u64)
                }
            }
        })
        .await
        .expect("second attempt succeeds");
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_run_with_retry_single_attempt_by_default() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let err = run_with_retry(RetryPolicy::new(0, 1_000), "eth_chainId", move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err::<u64, _>(anyhow::anyhow!("HTTP 429 too many requests"))
            }
        })
        .await
        .expect_err("single attempt fails");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let msg = err.to_string();
        assert!(msg.contains("eth_chainId failed on attempt 1/1"));
        assert!(msg.contains("(rate limited)"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_run_with_retry_stops_on_non_retryable_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let err = run_with_retry(RetryPolicy::new(3, 1_000), "eth_chainId", move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err::<u64, _>(anyhow::anyhow!("invalid params"))
            }
        })
        .await
        .expect_err("non-retryable");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("1/3"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_run_with_retry_reports_timeouts() {
        let policy = RetryPolicy {
            attempts: 1,
            call_timeout: Duration::from_millis(20),
        };
        let err = run_with_retry(policy, "slow", || async {
            sleep(Duration::from_secs(5)).await;
            Ok::<u64, anyhow::Error>(1)
        })
        .await
        .expect_err("times out");
        assert!(err.to_string().contains("timed out after 20ms"));
    }

    #[test]
    fn test_alloy_chain_node_rejects_bad_url() {
        let client = build_http_client(None).expect("client");
        assert!(AlloyChainNode::connect(client, "not a url", RetryPolicy::new(1, 1_000)).is_err());
    }

    #[test]
    fn test_build_http_client_accepts_socks_proxy() {
        assert!(build_http_client(Some("socks5://127.0.0.1:1080")).is_ok());
    }
}
