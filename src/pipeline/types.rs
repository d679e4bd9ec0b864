//! Shared types for the alert ingestion pipeline.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Article records ─────────────────────────────────────────────────

/// One article summary lifted out of an alert email body.
///
/// Records have no identity beyond their position in the email; the same
/// paper announced by two alerts yields two records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub title: String,
    /// Destination URL with the scheme stripped.
    pub url: String,
    /// Author line, possibly empty.
    pub authors: String,
    /// Snippet text, possibly empty.
    #[serde(rename = "abstract")]
    pub abstract_text: String,
}

/// Relevance label returned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relevance {
    #[serde(rename = "Yes")]
    Yes,
    #[serde(rename = "No")]
    No,
    /// Classifier could not decide, or replied outside the tri-state.
    #[serde(rename = "n.a.")]
    NotAssessed,
}

impl Relevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "Yes",
            Self::No => "No",
            Self::NotAssessed => "n.a.",
        }
    }
}

impl fmt::Display for Relevance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An article together with the email it came from and its relevance.
///
/// Built once per successful classification and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub email_date: String,
    pub email_subject: String,
    pub article: ArticleRecord,
    pub relevance: Relevance,
}

impl ClassifiedRecord {
    pub fn new(
        email_date: impl Into<String>,
        email_subject: impl Into<String>,
        article: ArticleRecord,
        relevance: Relevance,
    ) -> Self {
        Self {
            email_date: email_date.into(),
            email_subject: email_subject.into(),
            article,
            relevance,
        }
    }

    /// Value of an output column, `None` when the record has no such field.
    pub fn column(&self, name: &str) -> Option<&str> {
        let value = match name {
            "email_date" => &self.email_date,
            "email_subject" => &self.email_subject,
            "article_url" => &self.article.url,
            "article_title" => &self.article.title,
            "article_author" => &self.article.authors,
            "article_abstract" => &self.article.abstract_text,
            "relevance" => return Some(self.relevance.as_str()),
            _ => return None,
        };
        Some(value.as_str())
    }
}

// ── Flushes ─────────────────────────────────────────────────────────

/// Which kind of persistence event produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushKind {
    /// After one page of messages.
    Partial,
    /// End of run, or just before an abort propagates.
    Final,
}

impl FlushKind {
    /// Filename prefix for artifacts of this kind.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Partial => "partial",
            Self::Final => "final",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final)
    }
}

// ── Run state ───────────────────────────────────────────────────────

/// Mutable state of one run. Owned and mutated only by the orchestrator.
#[derive(Debug, Default)]
pub struct RunState {
    /// Messages consumed so far; never exceeds the result cap.
    pub processed_count: usize,
    /// Continuation cursor for the next listing call.
    pub page_token: Option<String>,
    /// Every record classified during the run, in processing order.
    pub all_records: Vec<ClassifiedRecord>,
    /// Pages listed so far.
    pub pages: usize,
    /// Messages skipped because of a per-message failure.
    pub failed_messages: usize,
    /// Artifacts written so far, in write order.
    pub artifacts: Vec<PathBuf>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many more messages the cap allows.
    pub fn remaining(&self, cap: usize) -> usize {
        cap.saturating_sub(self.processed_count)
    }
}

/// What a finished run reports back.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub processed_count: usize,
    pub pages: usize,
    pub records: usize,
    pub failed_messages: usize,
    pub artifacts: Vec<PathBuf>,
}

impl RunSummary {
    pub(crate) fn from_state(run_id: Uuid, state: &RunState) -> Self {
        Self {
            run_id,
            processed_count: state.processed_count,
            pages: state.pages,
            records: state.all_records.len(),
            failed_messages: state.failed_messages,
            artifacts: state.artifacts.clone(),
        }
    }
}
