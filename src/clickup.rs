//! ClickUp-shaped task service client.
//!
//! Wire surface (API v2 shapes, from the service the original tool
//! targeted): name-based discovery (`/team` → `/team/{id}/space` →
//! `/space/{id}/list`), custom field schema (`/list/{id}/field`) and task
//! creation (`POST /list/{id}/task`).
//!
//! Status policy: 401/403 → auth error, never retried; 429 → rate limit
//! with optional `Retry-After` hint, retried by the caller's backoff
//! policy; 400 → validation error surfaced with the service's message.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{API_TIMEOUT, FieldType};
use crate::error::ApiError;
use crate::fields::{FieldSchemaEntry, TaskPayload};

const CLICKUP_API_BASE: &str = "https://api.clickup.com/api/v2";

/// Terminal artifact of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Task service operations the workflow needs. Implemented by the HTTP
/// client below and by test doubles.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Resolve workspace/space/list names to the target list id.
    async fn resolve_list(
        &self,
        workspace: &str,
        space: &str,
        list: &str,
    ) -> Result<String, ApiError>;

    /// Custom field schema for a list. Fetched at most once per run.
    async fn field_schema(&self, list_id: &str) -> Result<Vec<FieldSchemaEntry>, ApiError>;

    /// Create a task. One attempt; the caller owns retry policy.
    async fn create_task(&self, list_id: &str, payload: &TaskPayload)
    -> Result<TaskResult, ApiError>;
}

/// HTTP client for the ClickUp v2 API.
pub struct ClickUpClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl ClickUpClient {
    pub fn new(token: SecretString) -> Self {
        Self::with_base_url(token, CLICKUP_API_BASE)
    }

    pub fn with_base_url(token: SecretString, base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            token,
        }
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value, ApiError> {
        let request = self
            .http
            .get(format!("{}{path}", self.base_url))
            .header("Authorization", self.token.expose_secret());
        Self::execute(request, path).await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value, ApiError> {
        let request = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("Authorization", self.token.expose_secret())
            .json(body);
        Self::execute(request, path).await
    }

    async fn execute(
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<serde_json::Value, ApiError> {
        debug!(path, "task service request");
        let response = request.send().await.map_err(|e| {
            // Timeouts are transient; the message keeps enough context for
            // the caller's policy to treat them like any other failure.
            ApiError::RequestFailed {
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => response.json().await.map_err(|e| ApiError::RequestFailed {
                reason: format!("unreadable response body: {e}"),
            }),
            401 | 403 => Err(ApiError::Auth {
                status: status.as_u16(),
            }),
            429 => {
                let retry_after = parse_retry_after(
                    response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                );
                Err(ApiError::RateLimited { retry_after })
            }
            400 => {
                let body = response.text().await.unwrap_or_default();
                Err(ApiError::Validation {
                    message: extract_service_error(&body),
                })
            }
            _ => Err(ApiError::RequestFailed {
                reason: format!("{path} returned {status}"),
            }),
        }
    }

    async fn find_named(
        &self,
        path: &str,
        key: &str,
        entity: &'static str,
        name: &str,
    ) -> Result<String, ApiError> {
        let body = self.get(path).await?;
        let items = body.get(key).and_then(|v| v.as_array()).ok_or_else(|| {
            ApiError::RequestFailed {
                reason: format!("{path} response missing {key}"),
            }
        })?;
        items
            .iter()
            .find(|item| {
                item.get("name")
                    .and_then(|n| n.as_str())
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .and_then(|item| item.get("id"))
            .and_then(|id| match id {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| ApiError::NotFound {
                entity,
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl TaskApi for ClickUpClient {
    async fn resolve_list(
        &self,
        workspace: &str,
        space: &str,
        list: &str,
    ) -> Result<String, ApiError> {
        let team_id = self.find_named("/team", "teams", "workspace", workspace).await?;
        let space_id = self
            .find_named(&format!("/team/{team_id}/space"), "spaces", "space", space)
            .await?;
        let list_id = self
            .find_named(&format!("/space/{space_id}/list"), "lists", "list", list)
            .await?;
        debug!(%team_id, %space_id, %list_id, "list resolved");
        Ok(list_id)
    }

    async fn field_schema(&self, list_id: &str) -> Result<Vec<FieldSchemaEntry>, ApiError> {
        #[derive(Deserialize)]
        struct FieldsResponse {
            #[serde(default)]
            fields: Vec<WireField>,
        }

        let body = self.get(&format!("/list/{list_id}/field")).await?;
        let parsed: FieldsResponse =
            serde_json::from_value(body).map_err(|e| ApiError::RequestFailed {
                reason: format!("unreadable field schema: {e}"),
            })?;

        Ok(parsed
            .fields
            .into_iter()
            .filter_map(WireField::into_schema_entry)
            .collect())
    }

    async fn create_task(
        &self,
        list_id: &str,
        payload: &TaskPayload,
    ) -> Result<TaskResult, ApiError> {
        #[derive(Deserialize)]
        struct CreateResponse {
            id: String,
            #[serde(default)]
            url: String,
            #[serde(default)]
            date_created: Option<String>,
        }

        let body = self.post(&format!("/list/{list_id}/task"), payload).await?;
        let parsed: CreateResponse =
            serde_json::from_value(body).map_err(|e| ApiError::RequestFailed {
                reason: format!("unreadable create-task response: {e}"),
            })?;

        Ok(TaskResult {
            id: parsed.id,
            url: parsed.url,
            created_at: parsed
                .date_created
                .as_deref()
                .and_then(parse_millis_timestamp)
                .unwrap_or_else(Utc::now),
        })
    }
}

// ── Wire helpers ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireField {
    id: String,
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    type_config: WireTypeConfig,
}

#[derive(Debug, Default, Deserialize)]
struct WireTypeConfig {
    #[serde(default)]
    options: Vec<WireOption>,
}

#[derive(Debug, Deserialize)]
struct WireOption {
    #[serde(default)]
    name: String,
}

impl WireField {
    /// Map a service field declaration to our schema entry. Field types
    /// this workflow can't populate are dropped.
    fn into_schema_entry(self) -> Option<FieldSchemaEntry> {
        let field_type = match self.field_type.as_str() {
            "text" | "short_text" => FieldType::Text,
            "date" => FieldType::Date,
            "drop_down" => FieldType::Dropdown,
            "checkbox" => FieldType::Checkbox,
            "number" => FieldType::Number,
            _ => return None,
        };
        let allowed_values = match field_type {
            FieldType::Dropdown => Some(
                self.type_config
                    .options
                    .into_iter()
                    .map(|o| o.name)
                    .filter(|n| !n.is_empty())
                    .collect(),
            ),
            _ => None,
        };
        Some(FieldSchemaEntry {
            field_id: self.id,
            name: self.name,
            field_type,
            allowed_values,
        })
    }
}

fn parse_retry_after(header: Option<&str>) -> Option<Duration> {
    header?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Pull the service's error message out of a 400 body, raw body as-is if
/// it is not the expected `{"err": ...}` shape.
fn extract_service_error(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("err").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_string())
}

fn parse_millis_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = raw.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_maps_known_types() {
        let field = WireField {
            id: "f1".to_string(),
            name: "Severity".to_string(),
            field_type: "drop_down".to_string(),
            type_config: WireTypeConfig {
                options: vec![
                    WireOption {
                        name: "Low".to_string(),
                    },
                    WireOption {
                        name: "High".to_string(),
                    },
                ],
            },
        };
        let entry = field.into_schema_entry().unwrap();
        assert_eq!(entry.field_type, FieldType::Dropdown);
        assert_eq!(
            entry.allowed_values,
            Some(vec!["Low".to_string(), "High".to_string()])
        );
    }

    #[test]
    fn wire_field_drops_unsupported_types() {
        let field = WireField {
            id: "f2".to_string(),
            name: "People".to_string(),
            field_type: "users".to_string(),
            type_config: WireTypeConfig::default(),
        };
        assert!(field.into_schema_entry().is_none());
    }

    #[test]
    fn retry_after_header_parses_seconds() {
        assert_eq!(parse_retry_after(Some("42")), Some(Duration::from_secs(42)));
        assert_eq!(parse_retry_after(Some(" 5 ")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn service_error_extracted_from_err_key() {
        assert_eq!(
            extract_service_error(r#"{"err": "Custom field value invalid", "ECODE": "FIELD_013"}"#),
            "Custom field value invalid"
        );
        assert_eq!(extract_service_error("plain failure"), "plain failure");
    }

    #[test]
    fn created_at_parses_millis() {
        let dt = parse_millis_timestamp("1767225600000").unwrap();
        assert_eq!(dt.timestamp_millis(), 1_767_225_600_000);
        assert!(parse_millis_timestamp("not-a-stamp").is_none());
    }
}
