use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("contract store failed during {stage}: {source}")]
    Store {
        stage: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("covered-range ledger failed: {0}")]
    Ledger(String),
    #[error("chain node failed during {stage}: {message}")]
    Node { stage: String, message: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    pub fn store(stage: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Store {
            stage: stage.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures surfaced by a source resolver once its retry budget is spent.
///
/// A contract that simply has no verified source is not an error; see
/// [`crate::source_resolver::ResolvedSource::Unverified`].
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("verification request failed after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },
    #[error("verification service returned HTTP {status}: {snippet}")]
    HttpStatus { status: u16, snippet: String },
    #[error("verification payload undecodable after {attempts} attempt(s): {message}")]
    Decode { attempts: u32, message: String },
    #[error("invalid verification request: {0}")]
    InvalidRequest(String),
    #[error("verification lookup cancelled")]
    Cancelled,
}
