//! Error types for scholar-triage.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for a triage run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox session errors (auth, listing, fetching).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token expired or revoked")]
    AuthExpired,

    #[error("Token not found at {0}. Run the OAuth consent flow once to create it")]
    TokenNotFound(PathBuf),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid raw message encoding: {0}")]
    Decode(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl MailboxError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Failure to build one article record from an alert body.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("title anchor has no href")]
    MissingHref,

    #[error("title anchor is empty")]
    EmptyTitle,

    #[error("invalid selector {selector}: {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable sink errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workbook error writing {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("No free artifact name for {0} after {1} attempts")]
    NameExhausted(String, u32),
}

/// Per-message failures, isolated by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("fetch failed for message {id}: {source}")]
    Fetch {
        id: String,
        #[source]
        source: MailboxError,
    },

    #[error("message {id} could not be parsed: {reason}")]
    Parse { id: String, reason: String },

    #[error("classification failed for message {id}: {source}")]
    Classify {
        id: String,
        #[source]
        source: LlmError,
    },
}

impl PipelineError {
    /// Id of the message this failure belongs to.
    pub fn message_id(&self) -> &str {
        match self {
            Self::Fetch { id, .. } | Self::Parse { id, .. } | Self::Classify { id, .. } => id,
        }
    }
}

/// Result type alias for scholar-triage.
pub type Result<T> = std::result::Result<T, Error>;
