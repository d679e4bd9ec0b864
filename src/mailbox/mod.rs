//! Mailbox boundary: paged listing of unread alert mail and raw fetches.
//!
//! The orchestrator only sees the `MailboxSession` trait. `GmailSession` is
//! the production implementation; tests drive the pipeline with in-memory
//! sessions.

pub mod gmail;
pub mod message;
pub mod token;

pub use gmail::GmailSession;
pub use message::AlertEmail;

use async_trait::async_trait;

use crate::error::MailboxError;

/// One page of a listing: message ids plus the cursor for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub message_ids: Vec<String>,
    /// `None` when the mailbox has no further pages.
    pub next_cursor: Option<String>,
}

/// What a listing call asks for.
#[derive(Debug, Clone, Copy)]
pub struct ListRequest<'a> {
    pub query: &'a str,
    pub label: &'a str,
    pub page_size: usize,
    pub cursor: Option<&'a str>,
}

/// Authenticated access to a mailbox.
#[async_trait]
pub trait MailboxSession: Send + Sync {
    /// List unread message ids matching the request's query.
    async fn list_unread(&self, request: ListRequest<'_>) -> Result<MessagePage, MailboxError>;

    /// Fetch the raw RFC 822 bytes of one message.
    async fn fetch_raw(&self, message_id: &str) -> Result<Vec<u8>, MailboxError>;
}
