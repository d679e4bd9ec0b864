//! Alert ingestion pipeline.
//!
//! Every run flows through:
//! 1. `MailboxSession::list_unread()`: one page of unread alert ids
//! 2. `MailboxSession::fetch_raw()` + `AlertEmail::parse()`: per message
//! 3. `ArticleExtractor::extract()`: article records from the HTML body
//! 4. `Classifier::classify()`: one relevance label per article
//! 5. `DurableSink::persist()`: a partial artifact per page, a final one per run
//!
//! **Nothing collected is dropped on abort.** A failing run writes a final
//! artifact with what it has before returning the error.

pub mod orchestrator;
pub mod types;

pub use orchestrator::Orchestrator;
pub use types::{ArticleRecord, ClassifiedRecord, FlushKind, Relevance, RunState, RunSummary};
