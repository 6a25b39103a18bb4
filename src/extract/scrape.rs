//! Scrape fallback: unauthenticated retrieval of the rendered message
//! page when the structured API path fails, or when no platform
//! extractor recognizes the reference at all.
//!
//! Best-effort by design. Whatever the page yields becomes the content —
//! empty subject or body is a valid degraded result, and malformed
//! encodings are replaced during decoding rather than raised.

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;

use crate::config::Platform;
use crate::error::ExtractionError;
use crate::extract::{EmailContent, Extractor};

pub struct ScrapeExtractor {
    http: reqwest::Client,
}

impl ScrapeExtractor {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Extractor for ScrapeExtractor {
    fn platform(&self) -> Platform {
        Platform::Generic
    }

    /// Any fetchable web reference can be scraped.
    fn detect(&self, reference: &str) -> bool {
        reference.starts_with("http://") || reference.starts_with("https://")
    }

    /// Fetch the rendered page and pull out subject/body/sender.
    async fn extract(&self, reference: &str) -> Result<EmailContent, ExtractionError> {
        debug!(reference, "scraping rendered message page");

        let response = self.http.get(reference).send().await.map_err(|e| {
            ExtractionError::FetchFailed {
                platform: Platform::Generic,
                reason: format!("scrape fetch failed: {e}"),
            }
        })?;

        if !response.status().is_success() {
            return Err(ExtractionError::FetchFailed {
                platform: Platform::Generic,
                reason: format!("scrape fetch returned {}", response.status()),
            });
        }

        // reqwest::Response::text replaces malformed sequences rather
        // than failing, which matches the decoding contract here.
        let html = response
            .text()
            .await
            .map_err(|e| ExtractionError::FetchFailed {
                platform: Platform::Generic,
                reason: format!("scrape body unreadable: {e}"),
            })?;

        Ok(parse_page(&html, Platform::Generic))
    }
}

/// Extract normalized content from a rendered message page.
pub(crate) fn parse_page(html: &str, platform: Platform) -> EmailContent {
    let document = Html::parse_document(html);

    let subject = select_text(&document, &["h1", "h2.subject", "title"]).unwrap_or_default();
    let sender_email = select_attr(&document, "a[href^='mailto:']", "href")
        .map(|href| href.trim_start_matches("mailto:").to_string())
        .unwrap_or_default();
    let sender = select_attr(&document, "meta[name='author']", "content")
        .or_else(|| select_text(&document, &[".sender", ".from"]))
        .unwrap_or_default();
    let date = select_attr(&document, "time", "datetime")
        .or_else(|| select_text(&document, &["time", ".date"]))
        .unwrap_or_default();
    let body =
        select_text(&document, &["article", "main", ".message-body", "pre", "body"])
            .unwrap_or_default();

    EmailContent {
        subject,
        body,
        sender,
        sender_email,
        date,
        attachments: Vec::new(),
        source_platform: platform,
    }
}

/// First non-empty text match, trying selectors in priority order.
fn select_text(document: &Html, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        let found = document
            .select(&selector)
            .map(|el| {
                el.text()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .find(|text| !text.is_empty());
        if found.is_some() {
            return found;
        }
    }
    None
}

/// First non-empty attribute value among matches.
fn select_attr(document: &Html, selectors: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selectors).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Flatten a markup fragment to whitespace-normalized text.
pub(crate) fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
