//! Configuration types.
//!
//! Everything is read from environment variables. Each `from_env()` delegates
//! to a `from_lookup()` taking a key lookup so tests never touch the process
//! environment.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Default result cap used by the binary.
pub const DEFAULT_MAX_RESULTS: usize = 400;

/// Default number of message ids requested per page.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Mailbox filter selecting unread alert mail.
pub const DEFAULT_QUERY: &str = "is:unread from:scholaralerts-noreply@google.com";

/// Label the listing is restricted to.
pub const DEFAULT_LABEL: &str = "INBOX";

/// Default chat model for relevance classification.
pub const DEFAULT_MODEL: &str = "accounts/fireworks/models/llama-v3p1-405b-instruct";

/// Parameters of a single triage run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Maximum number of messages processed across all pages.
    pub max_results: usize,
    /// Message ids requested per page.
    pub batch_size: usize,
    /// Mailbox search query.
    pub query: String,
    /// Mailbox label.
    pub label: String,
    /// Whether an empty page batch still produces a partial artifact.
    pub flush_empty_batches: bool,
    /// Retry policy for mailbox listing and fetching.
    pub retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            batch_size: DEFAULT_BATCH_SIZE,
            query: DEFAULT_QUERY.to_string(),
            label: DEFAULT_LABEL.to_string(),
            flush_empty_batches: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_results = parse_or(&lookup, "SCHOLAR_MAX_RESULTS", defaults.max_results)?;
        let batch_size = parse_or(&lookup, "SCHOLAR_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SCHOLAR_BATCH_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            max_results,
            batch_size,
            query: lookup("SCHOLAR_QUERY").unwrap_or(defaults.query),
            label: lookup("SCHOLAR_LABEL").unwrap_or(defaults.label),
            flush_empty_batches: parse_or(&lookup, "SCHOLAR_FLUSH_EMPTY", false)?,
            retry: defaults.retry,
        })
    }
}

/// Where artifacts, tokens and logs live.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub output_dir: PathBuf,
    pub token_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub criteria_file: Option<PathBuf>,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            output_dir: lookup("SCHOLAR_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            token_path: lookup("GMAIL_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("token.json")),
            log_dir: lookup("SCHOLAR_LOG_DIR").map(PathBuf::from),
            criteria_file: lookup("SCHOLAR_CRITERIA_FILE").map(PathBuf::from),
        }
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}

/// Fetch a required value or explain how to set it.
pub(crate) fn require(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    hint: &str,
) -> Result<String, ConfigError> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        })
}
