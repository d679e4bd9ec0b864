//! OAuth token file handling for the Gmail session.
//!
//! The file format is the one Python's google-auth library writes
//! (`Credentials.to_json()`), so an existing `token.json` keeps working.
//! Only refresh is supported here; the initial consent flow is not.

use std::path::Path;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::MailboxError;

/// Refresh this long before the recorded expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Persisted OAuth2 token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    /// The access token (google-auth writes this as "token").
    #[serde(alias = "access_token")]
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// ISO 8601 expiry, with or without an offset.
    #[serde(default)]
    pub expiry: Option<String>,
    /// Fields this crate does not use (`universe_domain`, `account`, …),
    /// written back unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl GoogleToken {
    pub fn load(path: &Path) -> Result<Self, MailboxError> {
        if !path.exists() {
            return Err(MailboxError::TokenNotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write through a temp file and rename, so the token file is never
    /// left half written.
    pub fn save(&self, path: &Path) -> Result<(), MailboxError> {
        let temp_path = path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(&temp_path, raw)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Parsed expiry, if recorded and readable.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.expiry.as_deref()?;
        if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
            return Some(with_offset.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Whether the access token is expired (or about to be) at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at()
            .is_some_and(|expiry| now + Duration::seconds(EXPIRY_SKEW_SECS) >= expiry)
    }

    pub fn access_token(&self) -> SecretString {
        SecretString::from(self.token.clone())
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&mut self, client: &reqwest::Client) -> Result<(), MailboxError> {
        let refresh_token = self
            .refresh_token
            .clone()
            .map(SecretString::from)
            .ok_or_else(|| MailboxError::RefreshFailed("token has no refresh_token".into()))?;

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.expose_secret().to_string()),
            ("client_id", self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let resp = client.post(&self.token_uri).form(&form).send().await?;
        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MailboxError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            // 4xx here means the grant was revoked; retrying will not help.
            return Err(MailboxError::AuthExpired);
        }

        let body: RefreshResponse = resp.json().await?;
        self.token = body.access_token;
        self.expiry = body
            .expires_in
            .map(|secs| (Utc::now() + Duration::seconds(secs)).to_rfc3339());
        info!("Refreshed mailbox access token");
        Ok(())
    }
}
