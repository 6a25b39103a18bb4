//! AI email analysis.
//!
//! The summarizer embeds extracted content in a fixed instruction
//! template, asks a completion provider for strict JSON, and parses the
//! result into [`EmailAnalysis`]. Failure policy:
//! - rate limits: retried up to 3 total attempts, waiting the server
//!   hint when given, exponential backoff otherwise;
//! - everything else (auth, network, malformed response): no retry, one
//!   local heuristic fallback;
//! - AI disabled entirely: `None`, no provider call.
//!
//! No analysis error ever escapes this module.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AnalysisError;
use crate::extract::EmailContent;
use crate::retry::{BackoffPolicy, retry_rate_limited};

/// Confidence below this marks the analysis as a hint rather than an
/// authoritative value. It is still usable either way.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

const MAX_TITLE_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 200;

// ── Analysis model ──────────────────────────────────────────────────

/// Task priority, as the analysis and the task service understand it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Lenient parse; anything unrecognized is Normal.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => Priority::Normal,
        }
    }

    /// Task service wire code (1 = urgent … 4 = low).
    pub fn wire_code(&self) -> u8 {
        match self {
            Priority::Urgent => 1,
            Priority::High => 2,
            Priority::Normal => 3,
            Priority::Low => 4,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "Low",
            Priority::Normal => "Normal",
            Priority::High => "High",
            Priority::Urgent => "Urgent",
        };
        f.write_str(s)
    }
}

/// Structured analysis derived from one email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAnalysis {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub key_points: Vec<String>,
    /// 0.0–1.0; values under [`CONFIDENCE_THRESHOLD`] are hints.
    pub confidence: f32,
}

impl EmailAnalysis {
    pub fn is_authoritative(&self) -> bool {
        self.confidence >= CONFIDENCE_THRESHOLD
    }
}

// ── Provider seam ───────────────────────────────────────────────────

/// One text-completion call per analysis attempt.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AnalysisError>;

    fn name(&self) -> &str;
}

/// Google Gemini `generateContent` provider.
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl GeminiProvider {
    pub fn new(http: reqwest::Client, api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            http,
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn complete(&self, prompt: &str) -> Result<String, AnalysisError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let header_hint = retry_after_header(&response);
            let text = response.text().await.unwrap_or_default();
            let retry_after = header_hint.or_else(|| parse_retry_hint(&text));
            return Err(AnalysisError::RateLimited { retry_after });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AnalysisError::AuthFailed);
        }
        if !status.is_success() {
            return Err(AnalysisError::RequestFailed {
                reason: format!("Gemini returned {status}"),
            });
        }

        #[derive(Deserialize)]
        struct GeminiResponse {
            #[serde(default)]
            candidates: Vec<Candidate>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            #[serde(default)]
            content: Content,
        }
        #[derive(Default, Deserialize)]
        struct Content {
            #[serde(default)]
            parts: Vec<Part>,
        }
        #[derive(Deserialize)]
        struct Part {
            #[serde(default)]
            text: String,
        }

        let parsed: GeminiResponse =
            response
                .json()
                .await
                .map_err(|e| AnalysisError::InvalidResponse {
                    reason: format!("unreadable Gemini response: {e}"),
                })?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| AnalysisError::InvalidResponse {
                reason: "no candidates in Gemini response".to_string(),
            })
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Pull a "retry in N seconds"-style hint out of an error body.
pub(crate) fn parse_retry_hint(text: &str) -> Option<Duration> {
    let re = Regex::new(r"(?i)retry\D{0,20}?(\d+)").ok()?;
    re.captures(text)?
        .get(1)?
        .as_str()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ── Summarizer ──────────────────────────────────────────────────────

/// Summarizer tuning.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub enabled: bool,
    pub heuristic_fallback: bool,
    pub policy: BackoffPolicy,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heuristic_fallback: true,
            policy: BackoffPolicy::default(),
        }
    }
}

/// Derives an [`EmailAnalysis`] from extracted content, degrading
/// gracefully instead of failing.
pub struct Summarizer {
    provider: Option<Box<dyn CompletionProvider>>,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(provider: Option<Box<dyn CompletionProvider>>, config: SummarizerConfig) -> Self {
        Self { provider, config }
    }

    /// A summarizer that always answers `None`.
    pub fn disabled() -> Self {
        Self {
            provider: None,
            config: SummarizerConfig {
                enabled: false,
                ..SummarizerConfig::default()
            },
        }
    }

    /// Analyze content. `None` means AI is disabled (or unavailable with
    /// the heuristic fallback turned off) — never an error.
    pub async fn analyze(&self, content: &EmailContent) -> Option<EmailAnalysis> {
        if !self.config.enabled {
            debug!("AI analysis disabled, skipping");
            return None;
        }
        let provider = match &self.provider {
            Some(provider) => provider,
            None => {
                debug!("no completion provider configured, skipping analysis");
                return None;
            }
        };

        let prompt = build_prompt(content);
        let result = retry_rate_limited(&self.config.policy, "ai-analysis", || async {
            let text = provider.complete(&prompt).await?;
            parse_response(&text)
        })
        .await;

        match result {
            Ok(analysis) => {
                info!(
                    provider = provider.name(),
                    confidence = analysis.confidence,
                    authoritative = analysis.is_authoritative(),
                    "email analysis completed"
                );
                Some(analysis)
            }
            Err(err) if self.config.heuristic_fallback => {
                warn!(error = %err, "AI analysis failed, using heuristic fallback");
                Some(heuristic_analysis(content))
            }
            Err(err) => {
                warn!(error = %err, "AI analysis failed and fallback is disabled");
                None
            }
        }
    }
}

/// Fixed instruction template embedding the extracted content.
pub(crate) fn build_prompt(content: &EmailContent) -> String {
    format!(
        "Analyze this email and extract task information.\n\n\
         Email Subject: {subject}\n\
         Email From: {sender}\n\
         Email Date: {date}\n\
         Email Body:\n{body}\n\n\
         Please extract:\n\
         1. A concise task title (5-10 words)\n\
         2. Task description (1-2 sentences summarizing the action needed)\n\
         3. Priority level (Low, Normal, High, or Urgent)\n\
         4. Due date (if mentioned in the email, format as YYYY-MM-DD)\n\
         5. Key action items or points (3-5 bullet points)\n\n\
         Return ONLY valid JSON in this exact format:\n\
         {{\n\
           \"title\": \"Task title here\",\n\
           \"description\": \"Brief description here\",\n\
           \"priority\": \"Normal\",\n\
           \"due_date\": \"2026-01-01\",\n\
           \"key_points\": [\"Point 1\", \"Point 2\"],\n\
           \"confidence\": 0.85\n\
         }}",
        subject = content.subject,
        sender = content.sender,
        date = content.date,
        body = content.body,
    )
}

/// Parse the provider's response into an analysis.
///
/// Tolerates markdown code fences around the JSON and coerces missing
/// optional keys to defaults (`confidence` → 0.0, unknown priority →
/// Normal, unparseable due date → null).
pub(crate) fn parse_response(text: &str) -> Result<EmailAnalysis, AnalysisError> {
    #[derive(Deserialize)]
    struct RawAnalysis {
        #[serde(default)]
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        priority: String,
        #[serde(default)]
        due_date: Option<String>,
        #[serde(default)]
        key_points: Vec<String>,
        #[serde(default)]
        confidence: f32,
    }

    let json = strip_code_fences(text);
    let raw: RawAnalysis =
        serde_json::from_str(json).map_err(|e| AnalysisError::InvalidResponse {
            reason: format!("response is not the expected JSON shape: {e}"),
        })?;

    Ok(EmailAnalysis {
        title: if raw.title.is_empty() {
            "Email Task".to_string()
        } else {
            raw.title
        },
        description: raw.description,
        priority: Priority::parse_lenient(&raw.priority),
        due_date: raw
            .due_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        key_points: raw.key_points,
        confidence: raw.confidence.clamp(0.0, 1.0),
    })
}

/// Drop a surrounding ```json … ``` (or plain ```) fence, if present.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

/// Deterministic local fallback: title from the subject, description from
/// the leading body lines, everything else neutral defaults.
pub(crate) fn heuristic_analysis(content: &EmailContent) -> EmailAnalysis {
    let title = if content.subject.is_empty() {
        "Email Task".to_string()
    } else {
        truncate(&content.subject, MAX_TITLE_LEN)
    };

    let description_joined = content
        .body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(3)
        .collect::<Vec<_>>()
        .join(" ");
    let description = if description_joined.chars().count() > MAX_DESCRIPTION_LEN {
        let head: String = description_joined
            .chars()
            .take(MAX_DESCRIPTION_LEN - 3)
            .collect();
        format!("{head}...")
    } else {
        description_joined
    };

    EmailAnalysis {
        title,
        description,
        priority: Priority::Normal,
        due_date: None,
        key_points: Vec::new(),
        confidence: 0.0,
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::config::Platform;

    fn content() -> EmailContent {
        EmailContent {
            subject: "Quarterly review prep".to_string(),
            body: "Hi team,\n\nPlease prepare the numbers.\nDeadline is Friday.\n\nThanks"
                .to_string(),
            sender: "Alice".to_string(),
            sender_email: "alice@example.com".to_string(),
            date: "2026-08-01".to_string(),
            attachments: vec![],
            source_platform: Platform::Gmail,
        }
    }

    const GOOD_JSON: &str = r#"{
        "title": "Prepare quarterly numbers",
        "description": "Collect and review the Q3 figures before Friday.",
        "priority": "High",
        "due_date": "2026-08-07",
        "key_points": ["Collect figures", "Review with team"],
        "confidence": 0.9
    }"#;

    struct ScriptedProvider {
        calls: Arc<AtomicU32>,
        script: Vec<Result<String, AnalysisError>>,
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, AnalysisError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.script.get(n) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(AnalysisError::RateLimited { retry_after })) => {
                    Err(AnalysisError::RateLimited {
                        retry_after: *retry_after,
                    })
                }
                Some(Err(AnalysisError::AuthFailed)) => Err(AnalysisError::AuthFailed),
                Some(Err(AnalysisError::InvalidResponse { reason })) => {
                    Err(AnalysisError::InvalidResponse {
                        reason: reason.clone(),
                    })
                }
                _ => Err(AnalysisError::RequestFailed {
                    reason: "script exhausted".to_string(),
                }),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn summarizer(
        script: Vec<Result<String, AnalysisError>>,
        heuristic_fallback: bool,
    ) -> (Summarizer, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let provider = ScriptedProvider {
            calls: calls.clone(),
            script,
        };
        let summarizer = Summarizer::new(
            Some(Box::new(provider)),
            SummarizerConfig {
                enabled: true,
                heuristic_fallback,
                policy: BackoffPolicy::default(),
            },
        );
        (summarizer, calls)
    }

    #[test]
    fn parse_plain_json() {
        let analysis = parse_response(GOOD_JSON).unwrap();
        assert_eq!(analysis.title, "Prepare quarterly numbers");
        assert_eq!(analysis.priority, Priority::High);
        assert_eq!(
            analysis.due_date,
            Some(NaiveDate::from_ymd_opt(2026, 8, 7).unwrap())
        );
        assert!(analysis.is_authoritative());
    }

    #[test]
    fn parse_fenced_json() {
        let fenced = format!("```json\n{GOOD_JSON}\n```");
        let analysis = parse_response(&fenced).unwrap();
        assert_eq!(analysis.title, "Prepare quarterly numbers");

        let plain_fence = format!("```\n{GOOD_JSON}\n```");
        assert!(parse_response(&plain_fence).is_ok());
    }

    #[test]
    fn parse_defaults_missing_optional_fields() {
        let analysis = parse_response(r#"{"title": "T", "description": "D"}"#).unwrap();
        assert_eq!(analysis.confidence, 0.0);
        assert_eq!(analysis.priority, Priority::Normal);
        assert!(analysis.due_date.is_none());
        assert!(analysis.key_points.is_empty());
        assert!(!analysis.is_authoritative());
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(parse_response("I could not analyze this email.").is_err());
    }

    #[test]
    fn unknown_priority_becomes_normal() {
        assert_eq!(Priority::parse_lenient("critical"), Priority::Normal);
        assert_eq!(Priority::parse_lenient("URGENT"), Priority::Urgent);
        assert_eq!(Priority::parse_lenient(" low "), Priority::Low);
    }

    #[test]
    fn retry_hint_parses_from_error_body() {
        assert_eq!(
            parse_retry_hint("Rate limit exceeded. Retry after 30 seconds"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_hint(r#"{"retryDelay": "12s"}"#),
            Some(Duration::from_secs(12))
        );
        assert_eq!(parse_retry_hint("unknown error"), None);
    }

    #[test]
    fn heuristic_truncates_and_defaults() {
        let analysis = heuristic_analysis(&content());
        assert_eq!(analysis.title, "Quarterly review prep");
        assert_eq!(
            analysis.description,
            "Hi team, Please prepare the numbers. Deadline is Friday."
        );
        assert_eq!(analysis.priority, Priority::Normal);
        assert_eq!(analysis.confidence, 0.0);
        assert!(analysis.due_date.is_none());
    }

    #[test]
    fn heuristic_empty_subject_gets_placeholder_title() {
        let mut c = content();
        c.subject = String::new();
        assert_eq!(heuristic_analysis(&c).title, "Email Task");
    }

    #[tokio::test]
    async fn disabled_summarizer_returns_none_without_calls() {
        let (summarizer, calls) = summarizer(vec![Ok(GOOD_JSON.to_string())], true);
        let disabled = Summarizer {
            config: SummarizerConfig {
                enabled: false,
                ..SummarizerConfig::default()
            },
            ..summarizer
        };
        assert!(disabled.analyze(&content()).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_then_succeeds() {
        let (summarizer, calls) = summarizer(
            vec![
                Err(AnalysisError::RateLimited {
                    retry_after: Some(Duration::from_secs(4)),
                }),
                Err(AnalysisError::RateLimited {
                    retry_after: Some(Duration::from_secs(6)),
                }),
                Ok(GOOD_JSON.to_string()),
            ],
            true,
        );

        let started = tokio::time::Instant::now();
        let analysis = summarizer.analyze(&content()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(analysis.title, "Prepare quarterly numbers");
        // Waited at least both hinted delays.
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn second_attempt_waits_at_least_the_hint() {
        let (summarizer, calls) = summarizer(
            vec![
                Err(AnalysisError::RateLimited {
                    retry_after: Some(Duration::from_secs(9)),
                }),
                Ok(GOOD_JSON.to_string()),
            ],
            true,
        );
        let started = tokio::time::Instant::now();
        summarizer.analyze(&content()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_exhaustion_degrades_to_heuristic() {
        let limited = || {
            Err(AnalysisError::RateLimited {
                retry_after: Some(Duration::from_secs(1)),
            })
        };
        let (summarizer, calls) = summarizer(vec![limited(), limited(), limited()], true);

        let analysis = summarizer.analyze(&content()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(analysis.confidence, 0.0);
        assert_eq!(analysis.title, "Quarterly review prep");
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let (summarizer, calls) = summarizer(vec![Err(AnalysisError::AuthFailed)], true);
        let analysis = summarizer.analyze(&content()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.confidence, 0.0);
    }

    #[tokio::test]
    async fn malformed_response_falls_back_without_retry() {
        let (summarizer, calls) = summarizer(vec![Ok("not json at all".to_string())], true);
        let analysis = summarizer.analyze(&content()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.confidence, 0.0);
    }

    #[tokio::test]
    async fn fallback_disabled_yields_none() {
        let (summarizer, calls) = summarizer(vec![Err(AnalysisError::AuthFailed)], false);
        assert!(summarizer.analyze(&content()).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
