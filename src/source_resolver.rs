//! Verified-source lookup against an Etherscan-style explorer API.
//!
//! The backend is chosen once at startup; without an API key every contract is
//! stored as bytecode.

use crate::error::ResolveError;
use crate::rate_limit::RateLimiter;
use crate::utils::config::Config;
use crate::utils::error::{body_snippet, compact_error_message};
use crate::utils::hex::canonical_address;
use alloy::primitives::Address;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MAX_ATTEMPTS: u32 = 3;
const TRANSPORT_BACKOFF_STEP_MS: u64 = 500;
const DECODE_BACKOFF_STEP_MS: u64 = 300;
const BODY_SNIPPET_CHARS: usize = 1_024;
const ERR_MAX_LEN: usize = 260;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    Verified(String),
    Unverified,
}

/// Looks up verified source for a deployed contract.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(Unverified)` is a normal outcome. Errors mean the lookup itself failed
    /// and the caller should fall back to bytecode.
    async fn resolve(
        &self,
        address: Address,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, ResolveError>;
}

// ---------------------------------------------------------------------------
// Explorer API types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ExplorerResponse {
    status: String,
    #[allow(dead_code)]
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Deserialize)]
struct SourceCodeEntry {
    #[serde(rename = "SourceCode", default)]
    source_code: String,
}

/// Maps a `getsourcecode` response body onto a resolution outcome.
///
/// Anything other than `status == "1"` with a non-empty first `SourceCode` is
/// `Unverified`, including error strings delivered in `result`.
fn interpret_source_payload(body: &[u8]) -> Result<ResolvedSource, serde_json::Error> {
    let envelope: ExplorerResponse = serde_json::from_slice(body)?;
    if envelope.status != "1" {
        return Ok(ResolvedSource::Unverified);
    }
    let Some(first) = envelope.result.as_array().and_then(|rows| rows.first()) else {
        return Ok(ResolvedSource::Unverified);
    };
    let entry: SourceCodeEntry = serde_json::from_value(first.clone())?;
    if entry.source_code.trim().is_empty() {
        return Ok(ResolvedSource::Unverified);
    }
    Ok(ResolvedSource::Verified(entry.source_code))
}

fn is_transient_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

async fn backoff(cancel: &CancellationToken, delay_ms: u64) -> Result<(), ResolveError> {
    crate::utils::cancel::pause(cancel, Duration::from_millis(delay_ms))
        .await
        .map_err(|_| ResolveError::Cancelled)
}

/// Etherscan-compatible `module=contract&action=getsourcecode` client.
pub struct EtherscanResolver {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    chain_id: u64,
    request_timeout: Duration,
    limiter: Arc<RateLimiter>,
}

impl EtherscanResolver {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: impl Into<String>,
        chain_id: u64,
        request_timeout: Duration,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            endpoint: format!("{}/api", base_url.trim().trim_end_matches('/')),
            api_key: api_key.into(),
            chain_id,
            request_timeout,
            limiter,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch_source(
        &self,
        address: Address,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, ResolveError> {
        let address_param = canonical_address(&address);
        let chain_id = self.chain_id.to_string();
        let mut last_message = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            self.limiter
                .wait(cancel)
                .await
                .map_err(|_| ResolveError::Cancelled)?;

            let request = self
                .client
                .get(&self.endpoint)
                .query(&[
                    ("module", "contract"),
                    ("action", "getsourcecode"),
                    ("address", address_param.as_str()),
                    ("apikey", self.api_key.as_str()),
                    ("chainid", chain_id.as_str()),
                ])
                .header(reqwest::header::USER_AGENT, crate::utils::rpc::USER_AGENT)
                .timeout(self.request_timeout);

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                sent = request.send() => sent,
            };
            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    last_message = compact_error_message(&err.to_string(), ERR_MAX_LEN);
                    if !is_transient_transport_error(&err) {
                        return Err(ResolveError::Transport {
                            attempts: attempt,
                            message: last_message,
                        });
                    }
                    tracing::debug!(
                        "[VERIFY] {} request attempt {}/{} failed: {}",
                        address_param,
                        attempt,
                        MAX_ATTEMPTS,
                        last_message
                    );
                    if attempt < MAX_ATTEMPTS {
                        backoff(cancel, attempt as u64 * TRANSPORT_BACKOFF_STEP_MS).await?;
                    }
                    continue;
                }
            };

            let status = response.status();
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                body = response.bytes() => body,
            };
            let body = match body {
                Ok(body) => body,
                Err(err) => {
                    // Truncated stream: same treatment as a transport failure.
                    last_message = compact_error_message(&err.to_string(), ERR_MAX_LEN);
                    if attempt < MAX_ATTEMPTS {
                        backoff(cancel, attempt as u64 * TRANSPORT_BACKOFF_STEP_MS).await?;
                    }
                    continue;
                }
            };

            if !status.is_success() {
                return Err(ResolveError::HttpStatus {
                    status: status.as_u16(),
                    snippet: body_snippet(&body, BODY_SNIPPET_CHARS),
                });
            }

            match interpret_source_payload(&body) {
                Ok(resolved) => return Ok(resolved),
                Err(err) => {
                    let message = compact_error_message(&err.to_string(), ERR_MAX_LEN);
                    if attempt == MAX_ATTEMPTS {
                        return Err(ResolveError::Decode {
                            attempts: attempt,
                            message,
                        });
                    }
                    last_message = message;
                    backoff(cancel, attempt as u64 * DECODE_BACKOFF_STEP_MS).await?;
                }
            }
        }

        Err(ResolveError::Transport {
            attempts: MAX_ATTEMPTS,
            message: last_message,
        })
    }
}

/// The resolver chosen at startup.
pub enum ResolverBackend {
    Etherscan(EtherscanResolver),
    /// No verification service configured; every contract keeps its bytecode.
    BytecodeOnly,
}

impl ResolverBackend {
    pub fn from_config(config: &Config, client: reqwest::Client, limiter: Arc<RateLimiter>) -> Self {
        match config.etherscan_api_key.as_deref() {
            Some(api_key) => Self::Etherscan(EtherscanResolver::new(
                client,
                &config.etherscan_base_url,
                api_key,
                config.etherscan_chain_id,
                Duration::from_millis(config.verify_http_timeout_ms),
                limiter,
            )),
            None => Self::BytecodeOnly,
        }
    }
}

#[async_trait]
impl SourceResolver for ResolverBackend {
    fn name(&self) -> &str {
        match self {
            Self::Etherscan(_) => "etherscan",
            Self::BytecodeOnly => "bytecode-only",
        }
    }

    async fn resolve(
        &self,
        address: Address,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, ResolveError> {
        match self {
            Self::Etherscan(resolver) => resolver.fetch_source(address, cancel).await,
            Self::BytecodeOnly => Ok(ResolvedSource::Unverified),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TARGET: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

    fn target() -> Address {
        Address::from_str(TARGET).expect("address")
    }

    /// Serves the canned HTTP responses in order, one per connection.
    async fn serve_responses(responses: Vec<(u16, String)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 8_192];
                let mut read = 0usize;
                while let Ok(n) = socket.read(&mut buf[read..]).await {
                    if n == 0 {
                        break;
                    }
                    read += n;
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len() {
                        break;
                    }
                }
                let reply = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/v2"), hits)
    }

    fn resolver_for(base_url: &str) -> EtherscanResolver {
        EtherscanResolver::new(
            reqwest::Client::new(),
            base_url,
            "test-key",
            1,
            Duration::from_secs(5),
            Arc::new(RateLimiter::per_second(100)),
        )
    }

    #[test]
    fn test_interpret_source_payload_verified() {
        let body = br#"{"status":"1","message":"OK","result":[{"SourceCode":"contract A {}","ContractName":"A"}]}"#;
        assert_eq!(
            interpret_source_payload(body).expect("decode"),
            ResolvedSource::Verified("contract A {}".to_string())
        );
    }

    #[test]
    fn test_interpret_source_payload_unverified_cases() {
        let cases: [&[u8]; 4] = [
            br#"{"status":"1","message":"OK","result":[{"SourceCode":"","ABI":"Contract source code not verified"}]}"#,
            br#"{"status":"1","message":"OK","result":[{"SourceCode":"  \n "}]}"#,
            br#"{"status":"1","message":"OK","result":[]}"#,
            br#"{"status":"0","message":"NOTOK","result":"Invalid API Key"}"#,
        ];
        for body in cases {
            assert_eq!(
                interpret_source_payload(body).expect("decode"),
                ResolvedSource::Unverified
            );
        }
    }

    #[test]
    fn test_interpret_source_payload_rejects_garbage() {
        assert!(interpret_source_payload(b"<html>502 Bad Gateway</html>").is_err());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let resolver = resolver_for("https://api.etherscan.io/v2/");
        assert_eq!(resolver.endpoint(), "https://api.etherscan.io/v2/api");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_bytecode_only_backend_never_verifies() {
        let backend = ResolverBackend::BytecodeOnly;
        let cancel = CancellationToken::new();
        assert_eq!(backend.name(), "bytecode-only");
        assert_eq!(
            backend.resolve(target(), &cancel).await.expect("resolve"),
            ResolvedSource::Unverified
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_etherscan_resolver_returns_verified_source() {
        let body =
            r#"{"status":"1","message":"OK","result":[{"SourceCode":"pragma solidity ^0.8.0;"}]}"#;
        let (base, hits) = serve_responses(vec![(200, body.to_string())]).await;
        let resolver = resolver_for(&base);
        let cancel = CancellationToken::new();

        let resolved = resolver.fetch_source(target(), &cancel).await.expect("resolve");
        assert_eq!(
            resolved,
            ResolvedSource::Verified("pragma solidity ^0.8.0;".to_string())
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_etherscan_resolver_surfaces_http_status_without_retry() {
        let (base, hits) =
            serve_responses(vec![(503, "upstream unavailable".to_string())]).await;
        let resolver = resolver_for(&base);
        let cancel = CancellationToken::new();

        let err = resolver
            .fetch_source(target(), &cancel)
            .await
            .expect_err("503 is an error");
        match err {
            ResolveError::HttpStatus { status, snippet } => {
                assert_eq!(status, 503);
                assert_eq!(snippet, "upstream unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_etherscan_resolver_retries_undecodable_payload() {
        let good = r#"{"status":"1","message":"OK","result":[{"SourceCode":"contract B {}"}]}"#;
        let (base, hits) = serve_responses(vec![
            (200, "not json".to_string()),
            (200, good.to_string()),
        ])
        .await;
        let resolver = resolver_for(&base);
        let cancel = CancellationToken::new();

        let resolved = resolver.fetch_source(target(), &cancel).await.expect("resolve");
        assert_eq!(resolved, ResolvedSource::Verified("contract B {}".to_string()));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_etherscan_resolver_gives_up_after_three_decode_failures() {
        let (base, hits) = serve_responses(vec![
            (200, "garbage".to_string()),
            (200, "garbage".to_string()),
            (200, "garbage".to_string()),
        ])
        .await;
        let resolver = resolver_for(&base);
        let cancel = CancellationToken::new();

        let err = resolver
            .fetch_source(target(), &cancel)
            .await
            .expect_err("decode failure");
        assert!(matches!(err, ResolveError::Decode { attempts: 3, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_etherscan_resolver_honors_cancellation() {
        let resolver = resolver_for("http://127.0.0.1:9");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolver
            .fetch_source(target(), &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, ResolveError::Cancelled));
    }
}
