//! Alert email parsing: headers and the HTML body out of raw RFC 822 bytes.

use mail_parser::{HeaderName, MessageParser, PartType};

use crate::error::PipelineError;

/// The parts of an alert email the pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEmail {
    /// Mailbox message id.
    pub id: String,
    pub sender: String,
    /// Subject line, empty when absent.
    pub subject: String,
    /// `Date` header as sent, empty when absent.
    pub date: String,
    /// First `text/html` part, decoded.
    pub html_body: Option<String>,
}

impl AlertEmail {
    /// Parse raw message bytes fetched for `id`.
    pub fn parse(id: &str, raw: &[u8]) -> Result<Self, PipelineError> {
        if raw.is_empty() {
            return Err(PipelineError::Parse {
                id: id.to_string(),
                reason: "empty message".into(),
            });
        }

        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| PipelineError::Parse {
                id: id.to_string(),
                reason: "not an RFC 822 message".into(),
            })?;

        Ok(Self {
            id: id.to_string(),
            sender: extract_sender(&parsed),
            subject: parsed.subject().unwrap_or_default().to_string(),
            date: extract_date(&parsed),
            html_body: extract_html(&parsed),
        })
    }
}

/// Extract the sender address from a parsed email.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// The raw `Date` header, unfolded. The parsed date is only a fallback.
fn extract_date(parsed: &mail_parser::Message) -> String {
    parsed
        .header_raw(HeaderName::Date)
        .map(|raw| raw.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|raw| !raw.is_empty())
        .or_else(|| parsed.date().map(|d| d.to_rfc822()))
        .unwrap_or_default()
}

/// First genuine `text/html` part. Plain-text bodies are not converted.
fn extract_html(parsed: &mail_parser::Message) -> Option<String> {
    parsed.parts.iter().find_map(|part| match &part.body {
        PartType::Html(html) => Some(html.to_string()),
        _ => None,
    })
}
