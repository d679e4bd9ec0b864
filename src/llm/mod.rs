//! LLM integration for scholar-triage.
//!
//! Classification talks to any OpenAI-compatible chat completions endpoint
//! through the `LlmProvider` trait, so tests and alternative backends can be
//! swapped in without touching the classifier.

pub mod openai;
pub mod provider;

pub use openai::OpenAiCompatProvider;
pub use provider::*;

use std::sync::Arc;

use secrecy::SecretString;

use crate::config::{DEFAULT_MODEL, require};
use crate::error::{ConfigError, LlmError};

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = require(
            &lookup,
            "LLM_API_KEY",
            "Get a key from an OpenAI-compatible platform (like Fireworks.ai) and \
             export LLM_API_KEY='your-key-here'",
        )?;
        let base_url = require(
            &lookup,
            "LLM_API_URL",
            "Set the API base URL, e.g. export LLM_API_URL='https://api.fireworks.ai/inference/v1'",
        )?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "LLM_API_URL".into(),
                message: format!("{base_url:?} is not an http(s) URL"),
            });
        }

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url,
            model: lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    tracing::info!("Using OpenAI-compatible endpoint {} (model: {})", config.base_url, config.model);
    Ok(Arc::new(OpenAiCompatProvider::new(
        config.base_url.clone(),
        config.api_key.clone(),
        config.model.clone(),
    )))
}
