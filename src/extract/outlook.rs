//! Outlook extractor.
//!
//! Handles Outlook web URLs (`outlook.office.com`, `outlook.live.com`)
//! and fetches the message through the Microsoft Graph API. Outlook URL
//! layouts vary; the message id is the path segment following `/id/`,
//! falling back to the last path segment.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::Platform;
use crate::error::ExtractionError;
use crate::extract::scrape::html_to_text;
use crate::extract::{EmailContent, Extractor};

const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0/me/messages";

pub struct OutlookExtractor {
    http: reqwest::Client,
    token: Option<SecretString>,
}

impl OutlookExtractor {
    pub fn new(http: reqwest::Client, token: Option<SecretString>) -> Self {
        Self { http, token }
    }
}

#[async_trait]
impl Extractor for OutlookExtractor {
    fn platform(&self) -> Platform {
        Platform::Outlook
    }

    fn detect(&self, reference: &str) -> bool {
        let lower = reference.to_lowercase();
        lower.contains("outlook.office.com")
            || lower.contains("outlook.live.com")
            || lower.contains("outlook.com")
    }

    async fn extract(&self, reference: &str) -> Result<EmailContent, ExtractionError> {
        let message_id = parse_message_id(reference).ok_or_else(|| {
            ExtractionError::InvalidReference {
                platform: Platform::Outlook,
                reason: format!("no message id in {reference}"),
            }
        })?;

        let token = self
            .token
            .as_ref()
            .ok_or_else(|| ExtractionError::FetchFailed {
                platform: Platform::Outlook,
                reason: "no Outlook credential available for structured fetch".to_string(),
            })?;

        let url = format!(
            "{GRAPH_API_BASE}/{message_id}?$select=subject,from,receivedDateTime,body,attachments"
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| ExtractionError::FetchFailed {
                platform: Platform::Outlook,
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ExtractionError::FetchFailed {
                platform: Platform::Outlook,
                reason: format!("Graph API returned {}", response.status()),
            });
        }

        let message: GraphMessage =
            response
                .json()
                .await
                .map_err(|e| ExtractionError::FetchFailed {
                    platform: Platform::Outlook,
                    reason: format!("unreadable Graph API response: {e}"),
                })?;

        Ok(message.into_content())
    }
}

/// Pull a message id out of an Outlook web URL.
pub(crate) fn parse_message_id(reference: &str) -> Option<String> {
    let path = reference.split(['?', '#']).next()?;
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // Preferred layout: .../mail/inbox/id/<encoded-id>
    if let Some(pos) = segments.iter().position(|s| *s == "id") {
        if let Some(id) = segments.get(pos + 1) {
            return Some(id.to_string());
        }
    }

    // Otherwise the last segment, provided it follows a mail path and is
    // not a folder keyword.
    if !segments.iter().any(|s| *s == "mail") {
        return None;
    }
    let last = segments.last()?;
    const FOLDERS: &[&str] = &["mail", "inbox", "archive", "sentitems", "drafts", "junkemail"];
    if FOLDERS.contains(&last.to_lowercase().as_str()) {
        return None;
    }
    Some(last.to_string())
}

// ── Wire shapes (Graph message) ─────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    from: Option<GraphRecipient>,
    #[serde(default)]
    received_date_time: String,
    #[serde(default)]
    body: GraphBody,
    #[serde(default)]
    attachments: Vec<GraphAttachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    #[serde(default)]
    email_address: GraphAddress,
}

#[derive(Debug, Default, Deserialize)]
struct GraphAddress {
    #[serde(default)]
    name: String,
    #[serde(default)]
    address: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct GraphAttachment {
    #[serde(default)]
    name: String,
}

impl GraphMessage {
    fn into_content(self) -> EmailContent {
        let body = if self.body.content_type.eq_ignore_ascii_case("html") {
            html_to_text(&self.body.content)
        } else {
            self.body.content.clone()
        };
        let address = self.from.map(|f| f.email_address).unwrap_or_default();
        EmailContent {
            subject: self.subject,
            body,
            sender: address.name,
            sender_email: address.address,
            date: self.received_date_time,
            attachments: self
                .attachments
                .iter()
                .filter(|a| !a.name.is_empty())
                .map(|a| a.name.clone())
                .collect(),
            source_platform: Platform::Outlook,
        }
    }
}
