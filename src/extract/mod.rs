//! Email content extraction.
//!
//! An [`Extractor`] per platform implements `{detect, extract}`; the
//! [`ExtractorRegistry`] picks one by explicit override or first-match
//! detection, runs the platform-native structured fetch, and downgrades
//! to the unauthenticated scrape fallback once on failure. References no
//! platform extractor recognizes (including an explicit GENERIC
//! override) go straight to the fallback.

mod gmail;
mod outlook;
mod scrape;

pub use gmail::GmailExtractor;
pub use outlook::OutlookExtractor;
pub use scrape::ScrapeExtractor;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Platform;
use crate::error::ExtractionError;

/// Normalized email content, produced once per run, read-only afterward.
///
/// `subject` and `body` are always present — an absent value is an empty
/// string, never a missing field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailContent {
    pub subject: String,
    pub body: String,
    pub sender: String,
    pub sender_email: String,
    pub date: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub source_platform: Platform,
}

/// One platform's extraction strategy.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Platform this extractor serves.
    fn platform(&self) -> Platform;

    /// Whether the reference shape belongs to this platform.
    fn detect(&self, reference: &str) -> bool;

    /// Structured fetch of the referenced message.
    async fn extract(&self, reference: &str) -> Result<EmailContent, ExtractionError>;
}

impl std::fmt::Debug for dyn Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("platform", &self.platform())
            .finish()
    }
}

/// Ordered extractor registry with scrape fallback.
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
    fallback: Option<Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// Registry with the stock platform extractors and scrape fallback.
    pub fn new(http: reqwest::Client, gmail: GmailExtractor, outlook: OutlookExtractor) -> Self {
        Self {
            extractors: vec![Arc::new(gmail), Arc::new(outlook)],
            fallback: Some(Arc::new(ScrapeExtractor::new(http))),
        }
    }

    /// Registry over caller-supplied extractors (hosts, tests).
    pub fn with_extractors(
        extractors: Vec<Arc<dyn Extractor>>,
        fallback: Option<Arc<dyn Extractor>>,
    ) -> Self {
        Self {
            extractors,
            fallback,
        }
    }

    /// Pick the extractor for a reference.
    ///
    /// An explicit override always wins. Otherwise detection runs over
    /// registered extractors in order; when more than one matches this is
    /// a configuration conflict — logged, first-registered wins.
    pub fn select(
        &self,
        reference: &str,
        platform_override: Option<Platform>,
    ) -> Result<&Arc<dyn Extractor>, ExtractionError> {
        if let Some(platform) = platform_override {
            return self
                .extractors
                .iter()
                .find(|e| e.platform() == platform)
                .ok_or(ExtractionError::UnsupportedPlatform { platform });
        }

        let matches: Vec<&Arc<dyn Extractor>> = self
            .extractors
            .iter()
            .filter(|e| e.detect(reference))
            .collect();

        match matches.as_slice() {
            [] => Err(ExtractionError::UnknownPlatform {
                reference: reference.to_string(),
            }),
            [single] => Ok(single),
            [first, rest @ ..] => {
                warn!(
                    winner = %first.platform(),
                    also = ?rest.iter().map(|e| e.platform().to_string()).collect::<Vec<_>>(),
                    "reference matched multiple platforms, configuration conflict; first registered wins"
                );
                Ok(first)
            }
        }
    }

    /// Extract content for a reference: platform-native fetch first, one
    /// fallback attempt on failure when enabled. References no platform
    /// extractor serves run the fallback as their only strategy.
    pub async fn extract(
        &self,
        reference: &str,
        platform_override: Option<Platform>,
        allow_fallback: bool,
    ) -> Result<EmailContent, ExtractionError> {
        let fallback = self.fallback.as_ref().filter(|_| allow_fallback);

        let extractor = match self.select(reference, platform_override) {
            Ok(extractor) => extractor,
            Err(select_err) => {
                let Some(fallback) = fallback.filter(|f| f.detect(reference)) else {
                    return Err(select_err);
                };
                debug!(reference, "no platform extractor applies, using fallback directly");
                return fallback.extract(reference).await;
            }
        };

        let platform = extractor.platform();
        debug!(%platform, reference, "extracting email content");

        match extractor.extract(reference).await {
            Ok(content) => Ok(content),
            Err(primary_err) => {
                let Some(fallback) = fallback else {
                    return Err(primary_err);
                };
                warn!(
                    %platform,
                    error = %primary_err,
                    "structured fetch failed, downgrading to scrape fallback"
                );
                fallback.extract(reference).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    pub(crate) struct StubExtractor {
        pub platform: Platform,
        pub pattern: &'static str,
        pub result: std::result::Result<EmailContent, &'static str>,
    }

    #[async_trait]
    impl Extractor for StubExtractor {
        fn platform(&self) -> Platform {
            self.platform
        }

        fn detect(&self, reference: &str) -> bool {
            reference.contains(self.pattern)
        }

        async fn extract(&self, _reference: &str) -> Result<EmailContent, ExtractionError> {
            match &self.result {
                Ok(content) => Ok(content.clone()),
                Err(reason) => Err(ExtractionError::FetchFailed {
                    platform: self.platform,
                    reason: reason.to_string(),
                }),
            }
        }
    }

    pub(crate) fn content(platform: Platform) -> EmailContent {
        EmailContent {
            subject: "Quarterly review".to_string(),
            body: "Please review the attached numbers.".to_string(),
            sender: "Alice".to_string(),
            sender_email: "alice@example.com".to_string(),
            date: "2026-08-01".to_string(),
            attachments: vec![],
            source_platform: platform,
        }
    }

    #[test]
    fn select_detects_by_reference_shape() {
        let registry = ExtractorRegistry::with_extractors(
            vec![
                Arc::new(StubExtractor {
                    platform: Platform::Gmail,
                    pattern: "mail.google.com",
                    result: Ok(content(Platform::Gmail)),
                }),
                Arc::new(StubExtractor {
                    platform: Platform::Outlook,
                    pattern: "outlook",
                    result: Ok(content(Platform::Outlook)),
                }),
            ],
            None,
        );
        let picked = registry
            .select("https://mail.google.com/mail/u/0/#inbox/abc", None)
            .unwrap();
        assert_eq!(picked.platform(), Platform::Gmail);
    }

    #[test]
    fn select_honors_explicit_override() {
        let registry = ExtractorRegistry::with_extractors(
            vec![
                Arc::new(StubExtractor {
                    platform: Platform::Gmail,
                    pattern: "example.com",
                    result: Ok(content(Platform::Gmail)),
                }),
                Arc::new(StubExtractor {
                    platform: Platform::Outlook,
                    pattern: "example.com",
                    result: Ok(content(Platform::Outlook)),
                }),
            ],
            None,
        );
        let picked = registry
            .select("https://example.com/msg/1", Some(Platform::Outlook))
            .unwrap();
        assert_eq!(picked.platform(), Platform::Outlook);
    }

    #[test]
    fn select_conflicting_matches_first_registered_wins() {
        let registry = ExtractorRegistry::with_extractors(
            vec![
                Arc::new(StubExtractor {
                    platform: Platform::Outlook,
                    pattern: "example.com",
                    result: Ok(content(Platform::Outlook)),
                }),
                Arc::new(StubExtractor {
                    platform: Platform::Gmail,
                    pattern: "example.com",
                    result: Ok(content(Platform::Gmail)),
                }),
            ],
            None,
        );
        let picked = registry.select("https://example.com/msg/1", None).unwrap();
        assert_eq!(picked.platform(), Platform::Outlook);
    }

    #[test]
    fn select_unknown_reference_fails() {
        let registry = ExtractorRegistry::with_extractors(vec![], None);
        let err = registry.select("https://nowhere.test/x", None).unwrap_err();
        assert!(matches!(err, ExtractionError::UnknownPlatform { .. }));
    }

    #[tokio::test]
    async fn primary_failure_without_fallback_propagates() {
        let registry = ExtractorRegistry::with_extractors(
            vec![Arc::new(StubExtractor {
                platform: Platform::Gmail,
                pattern: "mail.google.com",
                result: Err("boom"),
            })],
            None,
        );
        let err = registry
            .extract("https://mail.google.com/mail/u/0/#inbox/abc", None, true)
            .await
            .unwrap_err();
        assert_eq!(err.platform(), Some(Platform::Gmail));
        assert!(matches!(err, ExtractionError::FetchFailed { .. }));
    }

    struct CountingFallback {
        calls: Arc<AtomicUsize>,
        result: std::result::Result<EmailContent, &'static str>,
    }

    #[async_trait]
    impl Extractor for CountingFallback {
        fn platform(&self) -> Platform {
            Platform::Generic
        }

        fn detect(&self, reference: &str) -> bool {
            reference.starts_with("http")
        }

        async fn extract(&self, _reference: &str) -> Result<EmailContent, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(content) => Ok(content.clone()),
                Err(reason) => Err(ExtractionError::FetchFailed {
                    platform: Platform::Generic,
                    reason: reason.to_string(),
                }),
            }
        }
    }

    fn registry_with_fallback(
        primary_result: std::result::Result<EmailContent, &'static str>,
        fallback_result: std::result::Result<EmailContent, &'static str>,
    ) -> (ExtractorRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ExtractorRegistry::with_extractors(
            vec![Arc::new(StubExtractor {
                platform: Platform::Gmail,
                pattern: "mail.google.com",
                result: primary_result,
            })],
            Some(Arc::new(CountingFallback {
                calls: calls.clone(),
                result: fallback_result,
            })),
        );
        (registry, calls)
    }

    #[tokio::test]
    async fn fallback_runs_exactly_once_after_primary_failure() {
        let (registry, calls) =
            registry_with_fallback(Err("boom"), Ok(content(Platform::Generic)));
        let content = registry
            .extract("https://mail.google.com/mail/u/0/#inbox/abc", None, true)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(content.source_platform, Platform::Generic);
    }

    #[tokio::test]
    async fn failing_fallback_runs_once_and_propagates() {
        let (registry, calls) = registry_with_fallback(Err("boom"), Err("scrape down"));
        let err = registry
            .extract("https://mail.google.com/mail/u/0/#inbox/abc", None, true)
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ExtractionError::FetchFailed { .. }));
    }

    #[tokio::test]
    async fn generic_override_uses_fallback_directly() {
        let (registry, calls) = registry_with_fallback(
            Ok(content(Platform::Gmail)),
            Ok(content(Platform::Generic)),
        );
        let content = registry
            .extract("https://example.com/msg/1", Some(Platform::Generic), true)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(content.source_platform, Platform::Generic);
    }

    #[tokio::test]
    async fn undetected_reference_uses_fallback() {
        let (registry, calls) = registry_with_fallback(
            Ok(content(Platform::Gmail)),
            Ok(content(Platform::Generic)),
        );
        let content = registry
            .extract("https://mail.example.com/msg/123", None, true)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(content.source_platform, Platform::Generic);
    }

    #[tokio::test]
    async fn undetected_reference_with_fallback_disabled_fails() {
        let (registry, calls) = registry_with_fallback(
            Ok(content(Platform::Gmail)),
            Ok(content(Platform::Generic)),
        );
        let err = registry
            .extract("https://mail.example.com/msg/123", None, false)
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(err, ExtractionError::UnknownPlatform { .. }));
    }
}
