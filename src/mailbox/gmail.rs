//! Gmail API v1 mailbox session.
//!
//! Lists message ids with `users.messages.list` and fetches raw RFC 822
//! bytes with `users.messages.get?format=raw`. An expired access token is
//! refreshed once per 401 and written back to the token file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::token::GoogleToken;
use super::{ListRequest, MailboxSession, MessagePage};
use crate::error::MailboxError;
use crate::retry::{RetryPolicy, retry_async};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail emits URL-safe base64 with or without padding.
const RAW_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ── API response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawMessageResponse {
    #[serde(default)]
    raw: String,
}

// ── Session ─────────────────────────────────────────────────────────

/// Authenticated Gmail mailbox.
pub struct GmailSession {
    client: reqwest::Client,
    token: Mutex<GoogleToken>,
    token_path: PathBuf,
    api_base: String,
}

impl GmailSession {
    /// Load the token file and make sure the access token is usable,
    /// retrying transient refresh failures under `policy`.
    pub async fn connect(token_path: &Path, policy: &RetryPolicy) -> Result<Self, MailboxError> {
        let client = reqwest::Client::new();
        let token = retry_async(
            policy,
            "mailbox_connect",
            MailboxError::is_transient,
            || load_fresh_token(&client, token_path),
        )
        .await?;

        Ok(Self {
            client,
            token: Mutex::new(token),
            token_path: token_path.to_path_buf(),
            api_base: GMAIL_API_BASE.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, MailboxError> {
        let mut refreshed = false;
        loop {
            let access = self.token.lock().await.access_token();
            let resp = self
                .client
                .get(url)
                .bearer_auth(access.expose_secret())
                .query(query)
                .send()
                .await?;

            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(MailboxError::AuthExpired);
                }
                self.refresh_token().await?;
                refreshed = true;
                continue;
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(MailboxError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }
            return Ok(resp.json().await?);
        }
    }

    async fn refresh_token(&self) -> Result<(), MailboxError> {
        let mut token = self.token.lock().await;
        token.refresh(&self.client).await?;
        if let Err(e) = token.save(&self.token_path) {
            warn!(path = %self.token_path.display(), error = %e, "Could not persist refreshed token");
        }
        Ok(())
    }
}

async fn load_fresh_token(
    client: &reqwest::Client,
    path: &Path,
) -> Result<GoogleToken, MailboxError> {
    let mut token = GoogleToken::load(path)?;
    if token.is_expired_at(Utc::now()) {
        debug!("Access token expired, refreshing");
        token.refresh(client).await?;
        token.save(path)?;
    }
    Ok(token)
}

#[async_trait]
impl MailboxSession for GmailSession {
    async fn list_unread(&self, request: ListRequest<'_>) -> Result<MessagePage, MailboxError> {
        let mut query = vec![
            ("labelIds", request.label.to_string()),
            ("q", request.query.to_string()),
            ("maxResults", request.page_size.to_string()),
        ];
        if let Some(cursor) = request.cursor {
            query.push(("pageToken", cursor.to_string()));
        }

        let url = format!("{}/messages", self.api_base);
        let list: MessageListResponse = self.get_json(&url, &query).await?;
        Ok(into_page(list))
    }

    async fn fetch_raw(&self, message_id: &str) -> Result<Vec<u8>, MailboxError> {
        let url = format!("{}/messages/{}", self.api_base, message_id);
        let detail: RawMessageResponse = self
            .get_json(&url, &[("format", "raw".to_string())])
            .await?;
        decode_raw(&detail.raw)
    }
}

fn into_page(list: MessageListResponse) -> MessagePage {
    MessagePage {
        message_ids: list.messages.into_iter().map(|m| m.id).collect(),
        next_cursor: list.next_page_token.filter(|t| !t.is_empty()),
    }
}

/// Decode the `raw` field of a `format=raw` message.
pub fn decode_raw(raw: &str) -> Result<Vec<u8>, MailboxError> {
    if raw.is_empty() {
        return Err(MailboxError::Decode("message has no raw content".into()));
    }
    RAW_ENGINE
        .decode(raw.trim())
        .map_err(|e| MailboxError::Decode(e.to_string()))
}
