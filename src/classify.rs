//! Relevance classification of articles against a research focus.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ConfigError, LlmError};
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::Relevance;

/// Research focus used when no criteria file is configured.
pub const DEFAULT_CRITERIA: &str = "Using remote sensing and machine learning to monitor or \
predict the impact of urbanization on air quality. Air quality can be assessed using various \
pollutants such as PM2.5, NOx, and O3. Any scientific articles that may provide information on \
dataset sources can be relevant.
Factors of impact on air quality:
- climate
- industrial activity
- transportation patterns
- green space distribution
- population density
Area of study: urban areas in temperate climates";

const PREFILL: &str = "Sure, I will answer with just Yes, No, or n.a. regarding the relevance \
of the article with your research focus. My answer is: ";

/// The reply is a handful of tokens.
const CLASSIFY_MAX_TOKENS: u32 = 16;

/// Maps an article to a relevance label.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, title: &str, abstract_text: &str) -> Result<Relevance, LlmError>;
}

/// Classifier backed by a chat model.
pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
    criteria: String,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self::with_criteria(llm, DEFAULT_CRITERIA)
    }

    pub fn with_criteria(llm: Arc<dyn LlmProvider>, criteria: impl Into<String>) -> Self {
        Self {
            llm,
            criteria: criteria.into(),
        }
    }

    /// Read the research focus from `path`.
    pub fn criteria_from_file(path: &Path) -> Result<String, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "SCHOLAR_CRITERIA_FILE".into(),
                message: format!("{} is empty", path.display()),
            });
        }
        Ok(text.to_string())
    }

    fn build_request(&self, title: &str, abstract_text: &str) -> CompletionRequest {
        let prompt = format!(
            "Determine if this academic article might be relevant based on the user's research \
             interests. Consider the title and abstract. Reply ONLY with:\n\
             - \"Yes\" if clearly relevant\n\
             - \"No\" if clearly irrelevant\n\
             - \"n.a.\" if cannot determine\n\n\
             User's research focus: {criteria}\n\n\
             Article Title: {title}\n\
             Abstract Excerpt: {abstract_text}\n",
            criteria = self.criteria,
        );

        CompletionRequest::new(vec![
            ChatMessage::system(""),
            ChatMessage::user(prompt),
            ChatMessage::assistant(PREFILL),
        ])
        .with_temperature(0.0)
        .with_max_tokens(CLASSIFY_MAX_TOKENS)
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, title: &str, abstract_text: &str) -> Result<Relevance, LlmError> {
        debug!(title = %truncate(title, 80), "Classifying");
        let response = self.llm.complete(self.build_request(title, abstract_text)).await?;
        let label = parse_label(&response.content);
        if label.is_none() {
            warn!(
                reply = %response.content.trim(),
                title = %truncate(title, 80),
                "Unexpected classifier reply, recording n.a."
            );
        }
        Ok(label.unwrap_or(Relevance::NotAssessed))
    }
}

/// Map a model reply onto the tri-state. Only the exact labels count,
/// surrounding whitespace aside; `None` for anything else.
pub fn parse_label(reply: &str) -> Option<Relevance> {
    match reply.trim() {
        "Yes" => Some(Relevance::Yes),
        "No" => Some(Relevance::No),
        "n.a." => Some(Relevance::NotAssessed),
        _ => None,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max_chars).collect();
    short.push('…');
    short
}
