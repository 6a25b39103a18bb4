//! Gmail extractor.
//!
//! Handles web-interface URLs of the form
//! `https://mail.google.com/mail/u/0/#inbox/<message_id>` and fetches the
//! message through the Gmail REST API (`messages.get`). The reference
//! only ever yields a message id — all content comes from the API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::Platform;
use crate::error::ExtractionError;
use crate::extract::{EmailContent, Extractor};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";

pub struct GmailExtractor {
    http: reqwest::Client,
    token: Option<SecretString>,
}

impl GmailExtractor {
    /// `token` is the provider credential for the structured API; without
    /// it every extract fails and the registry downgrades to scraping.
    pub fn new(http: reqwest::Client, token: Option<SecretString>) -> Self {
        Self { http, token }
    }
}

#[async_trait]
impl Extractor for GmailExtractor {
    fn platform(&self) -> Platform {
        Platform::Gmail
    }

    fn detect(&self, reference: &str) -> bool {
        let lower = reference.to_lowercase();
        lower.contains("mail.google.com") || lower.contains("gmail.com")
    }

    async fn extract(&self, reference: &str) -> Result<EmailContent, ExtractionError> {
        let message_id = parse_message_id(reference).ok_or_else(|| {
            ExtractionError::InvalidReference {
                platform: Platform::Gmail,
                reason: format!("no message id in {reference}"),
            }
        })?;

        let token = self
            .token
            .as_ref()
            .ok_or_else(|| ExtractionError::FetchFailed {
                platform: Platform::Gmail,
                reason: "no Gmail credential available for structured fetch".to_string(),
            })?;

        let url = format!("{GMAIL_API_BASE}/{message_id}?format=full");
        let response = self
            .http
            .get(&url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| ExtractionError::FetchFailed {
                platform: Platform::Gmail,
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ExtractionError::FetchFailed {
                platform: Platform::Gmail,
                reason: format!("Gmail API returned {}", response.status()),
            });
        }

        let message: GmailMessage =
            response
                .json()
                .await
                .map_err(|e| ExtractionError::FetchFailed {
                    platform: Platform::Gmail,
                    reason: format!("unreadable Gmail API response: {e}"),
                })?;

        Ok(message.into_content())
    }
}

/// Pull a message id out of a Gmail web URL.
///
/// Gmail puts the id in the URL fragment: `.../#inbox/<id>` or
/// `.../#label/Work/<id>`. The last fragment segment is the id.
pub(crate) fn parse_message_id(reference: &str) -> Option<String> {
    let fragment = reference.split('#').nth(1)?;
    let id = fragment.rsplit('/').next()?.trim();
    if id.is_empty() || id.contains('?') {
        return None;
    }
    // Ids are opaque alphanumeric tokens; a bare label like "inbox" with
    // no trailing segment is not one.
    if !fragment.contains('/') {
        return None;
    }
    Some(id.to_string())
}

// ── Wire shapes (messages.get) ──────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GmailMessage {
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: GmailPayload,
}

#[derive(Debug, Default, Deserialize)]
struct GmailPayload {
    #[serde(default)]
    headers: Vec<GmailHeader>,
    #[serde(default)]
    parts: Vec<GmailPart>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct GmailPart {
    #[serde(default)]
    filename: String,
}

impl GmailMessage {
    fn header(&self, name: &str) -> String {
        self.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    }

    fn into_content(self) -> EmailContent {
        let from = self.header("From");
        let (sender, sender_email) = split_address(&from);
        EmailContent {
            subject: self.header("Subject"),
            body: self.snippet.clone(),
            sender,
            sender_email,
            date: self.header("Date"),
            attachments: self
                .payload
                .parts
                .iter()
                .filter(|p| !p.filename.is_empty())
                .map(|p| p.filename.clone())
                .collect(),
            source_platform: Platform::Gmail,
        }
    }
}

/// Split `Display Name <addr@host>` into (name, address); either part
/// may come back empty.
pub(crate) fn split_address(from: &str) -> (String, String) {
    if let Some(open) = from.find('<') {
        let name = from[..open].trim().trim_matches('"').to_string();
        let email = from[open + 1..]
            .trim_end()
            .trim_end_matches('>')
            .trim()
            .to_string();
        (name, email)
    } else if from.contains('@') {
        (String::new(), from.trim().to_string())
    } else {
        (from.trim().to_string(), String::new())
    }
}
