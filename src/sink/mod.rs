//! Durable sink: every flush becomes one new, independent artifact.

pub mod xlsx;

pub use xlsx::XlsxSink;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::pipeline::types::{ClassifiedRecord, FlushKind};

/// Output columns, in artifact order.
pub const COLUMNS: [&str; 7] = [
    "email_date",
    "email_subject",
    "article_url",
    "article_title",
    "article_author",
    "article_abstract",
    "relevance",
];

/// Persists batches of classified records.
#[async_trait]
pub trait DurableSink: Send + Sync {
    /// Write `records` to a new artifact and return its path. Never
    /// overwrites or appends to an existing artifact.
    async fn persist(
        &self,
        records: &[ClassifiedRecord],
        kind: FlushKind,
    ) -> Result<PathBuf, SinkError>;
}

/// The allow-listed columns of `record`, in order. Columns the record has no
/// value for are left out.
pub fn select_columns(record: &ClassifiedRecord) -> Vec<(&'static str, &str)> {
    COLUMNS
        .iter()
        .filter_map(|name| record.column(name).map(|value| (*name, value)))
        .collect()
}
