//! Error types for mailtask.

use std::time::Duration;

use crate::config::Platform;

/// Top-level error type for a workflow run.
///
/// Per-field mapping problems never appear here — they are collected into
/// the build report and carried alongside the payload instead.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Validation failed: {}", format_issues(.issues))]
    Validation { issues: Vec<ValidationIssue> },

    #[error("Task service error: {0}")]
    Api(#[from] ApiError),

    #[error("Task creation failed after retries: {0}")]
    TaskCreation(ApiError),

    #[error("Cancelled by user")]
    UserCancelled,
}

/// Credential resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Credential {name} not found in any source (explicit, environment, vault, prompt)")]
    Unavailable { name: String },

    #[error("Invalid vault reference: {0}")]
    InvalidVaultRef(String),
}

/// Email content extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Could not detect email platform from reference: {reference}")]
    UnknownPlatform { reference: String },

    #[error("No extractor registered for platform {platform}")]
    UnsupportedPlatform { platform: Platform },

    #[error("Could not parse a message id from {platform} reference: {reason}")]
    InvalidReference { platform: Platform, reason: String },

    #[error("Failed to fetch email content from {platform}: {reason}")]
    FetchFailed { platform: Platform, reason: String },
}

impl ExtractionError {
    /// The platform this error is attributed to, when known.
    pub fn platform(&self) -> Option<Platform> {
        match self {
            Self::UnknownPlatform { .. } => None,
            Self::UnsupportedPlatform { platform }
            | Self::InvalidReference { platform, .. }
            | Self::FetchFailed { platform, .. } => Some(*platform),
        }
    }
}

/// AI analysis errors. These never escape the summarizer boundary —
/// every failure mode degrades to a heuristic analysis or `None`.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("AI provider rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("AI provider authentication failed")]
    AuthFailed,

    #[error("Invalid AI response: {reason}")]
    InvalidResponse { reason: String },

    #[error("AI request failed: {reason}")]
    RequestFailed { reason: String },
}

/// Per-field mapping/conversion errors. Collected per field, never fatal
/// to the run.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("extractor references analysis but no analysis is available")]
    AnalysisUnavailable,

    #[error("unparseable date: {value}")]
    UnparseableDate { value: String },

    #[error("no matching allowed value")]
    NoMatchingOption { value: String },

    #[error("not a number: {value}")]
    NotANumber { value: String },

    #[error("not a boolean: {value}")]
    NotABoolean { value: String },
}

/// Task service (HTTP) errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication rejected by task service (status {status})")]
    Auth { status: u16 },

    #[error("Task service rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Task service rejected the payload: {message}")]
    Validation { message: String },

    #[error("{entity} not found: {name}")]
    NotFound { entity: &'static str, name: String },

    #[error("Task service request failed: {reason}")]
    RequestFailed { reason: String },
}

/// One payload validation finding, surfaced as a (field, reason) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub reason: String,
    fatal: bool,
}

impl ValidationIssue {
    /// A finding that halts the run (missing required field).
    pub fn fatal(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
            fatal: true,
        }
    }

    /// A finding the orchestrator may proceed past.
    pub fn advisory(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
            fatal: false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.field, i.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;
