//! Scholar Triage: Google Scholar alert ingestion and relevance triage.

pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
pub mod retry;
pub mod sink;
