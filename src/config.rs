//! Configuration types and tuning constants.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed timeout for every outbound HTTP call.
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum total attempts for rate-limited calls (AI and task service).
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Cap on any single backoff wait.
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Timeout for the vault CLI subprocess.
pub const VAULT_CLI_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of a TEXT custom field value.
pub const MAX_TEXT_FIELD_LEN: usize = 2000;

/// Maximum length of a task name.
pub const MAX_TASK_NAME_LEN: usize = 500;

// ── Platforms ───────────────────────────────────────────────────────

/// Supported email platforms for content extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Gmail,
    Outlook,
    /// Unrecognized provider handled by the scrape fallback only.
    Generic,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Platform::Gmail => "GMAIL",
            Platform::Outlook => "OUTLOOK",
            Platform::Generic => "GENERIC",
        };
        f.write_str(s)
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GMAIL" => Ok(Platform::Gmail),
            "OUTLOOK" => Ok(Platform::Outlook),
            "GENERIC" => Ok(Platform::Generic),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

// ── Custom field mapping ────────────────────────────────────────────

/// Target custom field types, mirroring the task service's schema types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Text,
    Date,
    Dropdown,
    Checkbox,
    Number,
}

/// Attributes of extracted email content a mapping entry can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentField {
    Subject,
    Body,
    Sender,
    SenderEmail,
    Date,
}

/// Attributes of an AI analysis a mapping entry can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisField {
    Title,
    Description,
    Priority,
    DueDate,
    KeyPoints,
    Confidence,
}

/// Where a mapping entry pulls its raw value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldExtractor {
    Content(ContentField),
    Analysis(AnalysisField),
}

/// One user-configured rule: target custom field → value source.
///
/// Entries are applied in their configured order and never mutated
/// during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Target custom field name (matched against the fetched schema).
    pub target_field: String,
    /// Target type the raw value is converted to.
    pub field_type: FieldType,
    /// Value source: content attribute or analysis attribute.
    pub extractor: FieldExtractor,
    /// Fallback raw value when an analysis extractor has no analysis.
    #[serde(default)]
    pub default: Option<String>,
}

// ── Workflow configuration ──────────────────────────────────────────

/// Immutable configuration for a workflow run.
///
/// Assembled by the caller (CLI, host application) and handed to the
/// orchestrator at construction — nothing here is read from ambient
/// state mid-run.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Workspace name in the task service.
    pub workspace: String,
    /// Space name within the workspace.
    pub space: String,
    /// List name within the space; tasks are created here.
    pub list: String,
    /// Explicit platform override; skips auto-detection when set.
    pub platform_override: Option<Platform>,
    /// Whether AI analysis runs at all.
    pub enable_ai: bool,
    /// Whether extraction may downgrade to the scrape fallback.
    pub allow_scrape_fallback: bool,
    /// Whether the summarizer may degrade to the local heuristic.
    pub allow_heuristic_fallback: bool,
    /// Whether to pause for preview confirmation before creating.
    pub interactive: bool,
    /// Ordered custom field mapping rules.
    pub mapping: Vec<MappingEntry>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workspace: String::new(),
            space: String::new(),
            list: String::new(),
            platform_override: None,
            enable_ai: false,
            allow_scrape_fallback: true,
            allow_heuristic_fallback: true,
            interactive: false,
            mapping: Vec::new(),
        }
    }
}
