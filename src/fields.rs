//! Field mapping, typed conversion, payload build and validation.
//!
//! Everything here is pure: the same inputs always produce the same
//! payload. Per-field problems are collected into the build report and
//! never abort the run — a degraded payload beats no payload.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyze::EmailAnalysis;
use crate::config::{
    AnalysisField, ContentField, FieldExtractor, FieldType, MAX_TASK_NAME_LEN, MAX_TEXT_FIELD_LEN,
    MappingEntry,
};
use crate::error::{MappingError, ValidationIssue};
use crate::extract::EmailContent;

// ── Schema ──────────────────────────────────────────────────────────

/// One custom field declared by the target list. Fetched at most once
/// per run, read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchemaEntry {
    pub field_id: String,
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub allowed_values: Option<Vec<String>>,
}

// ── Typed values ────────────────────────────────────────────────────

/// A raw value converted to its target field representation.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Text(String),
    /// Epoch milliseconds at UTC midnight.
    Date(i64),
    /// Canonical option value from the schema.
    Dropdown(String),
    Checkbox(bool),
    Number(f64),
}

impl TypedValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            TypedValue::Text(_) => FieldType::Text,
            TypedValue::Date(_) => FieldType::Date,
            TypedValue::Dropdown(_) => FieldType::Dropdown,
            TypedValue::Checkbox(_) => FieldType::Checkbox,
            TypedValue::Number(_) => FieldType::Number,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TypedValue::Text(s) | TypedValue::Dropdown(s) => serde_json::Value::from(s.clone()),
            TypedValue::Date(ms) => serde_json::Value::from(*ms),
            TypedValue::Checkbox(b) => serde_json::Value::from(*b),
            TypedValue::Number(n) => serde_json::Value::from(*n),
        }
    }
}

// ── Mapping ─────────────────────────────────────────────────────────

/// Resolve a mapping entry to its raw string value.
///
/// Analysis extractors need an analysis; without one the entry's default
/// applies, and with no default the entry fails.
pub fn map_entry(
    entry: &MappingEntry,
    content: &EmailContent,
    analysis: Option<&EmailAnalysis>,
) -> Result<String, MappingError> {
    match entry.extractor {
        FieldExtractor::Content(field) => Ok(content_value(field, content)),
        FieldExtractor::Analysis(field) => match analysis {
            Some(analysis) => Ok(analysis_value(field, analysis)),
            None => entry
                .default
                .clone()
                .ok_or(MappingError::AnalysisUnavailable),
        },
    }
}

fn content_value(field: ContentField, content: &EmailContent) -> String {
    match field {
        ContentField::Subject => content.subject.clone(),
        ContentField::Body => content.body.clone(),
        ContentField::Sender => content.sender.clone(),
        ContentField::SenderEmail => content.sender_email.clone(),
        ContentField::Date => content.date.clone(),
    }
}

fn analysis_value(field: AnalysisField, analysis: &EmailAnalysis) -> String {
    match field {
        AnalysisField::Title => analysis.title.clone(),
        AnalysisField::Description => analysis.description.clone(),
        AnalysisField::Priority => analysis.priority.to_string(),
        AnalysisField::DueDate => analysis
            .due_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        AnalysisField::KeyPoints => analysis.key_points.join("; "),
        AnalysisField::Confidence => format!("{:.2}", analysis.confidence),
    }
}

// ── Typed conversion ────────────────────────────────────────────────

/// Convert a raw string to the target field representation.
///
/// Pure and deterministic — calling twice with the same inputs yields
/// identical output. Failures stay per-field.
pub fn build_custom_field_value(
    raw: &str,
    field_type: FieldType,
    allowed_values: Option<&[String]>,
) -> Result<TypedValue, MappingError> {
    match field_type {
        FieldType::Text => {
            let truncated: String = raw.chars().take(MAX_TEXT_FIELD_LEN).collect();
            Ok(TypedValue::Text(truncated))
        }
        FieldType::Date => parse_date(raw)
            .map(|d| TypedValue::Date(date_to_millis(d)))
            .ok_or_else(|| MappingError::UnparseableDate {
                value: raw.to_string(),
            }),
        FieldType::Dropdown => {
            let allowed = allowed_values.unwrap_or(&[]);
            allowed
                .iter()
                .find(|v| v.eq_ignore_ascii_case(raw.trim()))
                .map(|v| TypedValue::Dropdown(v.clone()))
                .ok_or_else(|| MappingError::NoMatchingOption {
                    value: raw.to_string(),
                })
        }
        FieldType::Checkbox => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "on" => Ok(TypedValue::Checkbox(true)),
            "false" | "no" | "n" | "0" | "off" => Ok(TypedValue::Checkbox(false)),
            _ => Err(MappingError::NotABoolean {
                value: raw.to_string(),
            }),
        },
        FieldType::Number => raw
            .trim()
            .parse::<f64>()
            .map(TypedValue::Number)
            .map_err(|_| MappingError::NotANumber {
                value: raw.to_string(),
            }),
    }
}

/// Parse a date string in ISO or a handful of common written forms.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    const FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%d/%m/%Y",
        "%m-%d-%Y",
        "%B %d, %Y",
        "%b %d, %Y",
        "%d %B %Y",
    ];
    for format in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    // Full timestamps: take the date part.
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    chrono::DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
}

fn date_to_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

// ── Payload build ───────────────────────────────────────────────────

/// One custom field on the wire: schema id plus converted value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomFieldValue {
    pub id: String,
    pub value: serde_json::Value,
}

/// Task-creation payload, immutable once validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub name: String,
    pub description: String,
    pub markdown_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub custom_fields: Vec<CustomFieldValue>,
}

/// A field that was skipped during build, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    pub field: String,
    pub reason: String,
}

/// Build result: the payload plus the fields that didn't make it.
#[derive(Debug, Clone)]
pub struct BuiltPayload {
    pub payload: TaskPayload,
    pub skipped: Vec<FieldFailure>,
}

/// Task name and description before any custom fields: analysis values
/// when present, content fallbacks otherwise.
pub fn derive_core_fields(
    content: &EmailContent,
    analysis: Option<&EmailAnalysis>,
) -> (String, String) {
    let (name, description) = match analysis {
        Some(analysis) => (analysis.title.clone(), analysis.description.clone()),
        None => (
            content.subject.clone(),
            content.body.chars().take(500).collect(),
        ),
    };
    (name.chars().take(MAX_TASK_NAME_LEN).collect(), description)
}

/// Assemble the payload, walking the mapping in its configured order and
/// collecting per-field failures without aborting.
pub fn build_payload(
    content: &EmailContent,
    analysis: Option<&EmailAnalysis>,
    mapping: &[MappingEntry],
    schema: &[FieldSchemaEntry],
) -> BuiltPayload {
    let (name, description) = derive_core_fields(content, analysis);
    let mut payload = TaskPayload {
        name,
        markdown_description: description.clone(),
        description,
        priority: analysis.map(|a| a.priority.wire_code()),
        due_date: analysis.and_then(|a| a.due_date).map(date_to_millis),
        custom_fields: Vec::new(),
    };
    let mut skipped = Vec::new();

    for entry in mapping {
        let Some(schema_entry) = schema
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(&entry.target_field))
        else {
            skipped.push(FieldFailure {
                field: entry.target_field.clone(),
                reason: "field not present in list schema".to_string(),
            });
            continue;
        };

        let raw = match map_entry(entry, content, analysis) {
            Ok(raw) => raw,
            Err(e) => {
                skipped.push(FieldFailure {
                    field: entry.target_field.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match build_custom_field_value(
            &raw,
            entry.field_type,
            schema_entry.allowed_values.as_deref(),
        ) {
            Ok(value) => payload.custom_fields.push(CustomFieldValue {
                id: schema_entry.field_id.clone(),
                value: value.to_json(),
            }),
            Err(e) => {
                debug!(field = %entry.target_field, error = %e, "custom field skipped");
                skipped.push(FieldFailure {
                    field: entry.target_field.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    BuiltPayload { payload, skipped }
}

// ── Validation ──────────────────────────────────────────────────────

/// Check the payload against the fetched schema.
///
/// Findings come back as (field, reason) pairs; only a missing required
/// field is fatal. The orchestrator decides whether to proceed past
/// advisory findings.
pub fn validate(payload: &TaskPayload, schema: &[FieldSchemaEntry]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if payload.name.trim().is_empty() {
        issues.push(ValidationIssue::fatal("name", "task name must not be empty"));
    }

    for field in &payload.custom_fields {
        let Some(schema_entry) = schema.iter().find(|s| s.field_id == field.id) else {
            issues.push(ValidationIssue::advisory(
                field.id.clone(),
                "field id not present in list schema",
            ));
            continue;
        };
        if !json_matches_type(&field.value, schema_entry.field_type) {
            issues.push(ValidationIssue::advisory(
                schema_entry.name.clone(),
                format!(
                    "value does not match declared type {:?}",
                    schema_entry.field_type
                ),
            ));
        }
    }

    issues
}

fn json_matches_type(value: &serde_json::Value, field_type: FieldType) -> bool {
    match field_type {
        FieldType::Text | FieldType::Dropdown => value.is_string(),
        FieldType::Date | FieldType::Number => value.is_number(),
        FieldType::Checkbox => value.is_boolean(),
    }
}
