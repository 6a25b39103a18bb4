//! Credential resolution with an ordered source chain.
//!
//! Sources are tried in fixed priority order: explicit value → environment
//! variable → vault Connect API → vault CLI → interactive prompt. The
//! first non-empty value wins. A source that errors (vault unreachable,
//! CLI missing, permission denied) counts as "not found" and the chain
//! moves on; resolution only fails when every source comes up empty.
//!
//! Values are wrapped in [`SecretString`] the moment they enter the
//! process and are never logged beyond a masked prefix.

use async_trait::async_trait;
use futures::FutureExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::config::{API_TIMEOUT, VAULT_CLI_TIMEOUT};
use crate::error::CredentialError;
use crate::retry::first_success;

/// Which source satisfied a resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    Environment,
    VaultSdk,
    VaultCli,
    Manual,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CredentialSource::Explicit => "explicit",
            CredentialSource::Environment => "environment",
            CredentialSource::VaultSdk => "vault-sdk",
            CredentialSource::VaultCli => "vault-cli",
            CredentialSource::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// A resolved secret. Immutable, request-scoped, never cached.
pub struct Credential {
    pub name: String,
    pub value: SecretString,
    pub source: CredentialSource,
}

impl Credential {
    /// Masked display form for diagnostics: first four characters only.
    pub fn masked(&self) -> String {
        let raw = self.value.expose_secret();
        let head: String = raw.chars().take(4).collect();
        format!("{head}…({} chars, via {})", raw.chars().count(), self.source)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// What to resolve and where each source should look.
#[derive(Debug, Clone)]
pub struct CredentialSpec {
    /// Human-readable name, used in prompts and errors.
    pub name: String,
    /// Highest-priority value, e.g. from a command argument.
    pub explicit: Option<String>,
    /// Environment variable to consult.
    pub env_var: String,
    /// Vault reference in `op://vault/item/field` form.
    pub vault_ref: String,
}

impl CredentialSpec {
    pub fn new(name: &str, env_var: &str, vault_ref: &str) -> Self {
        Self {
            name: name.to_string(),
            explicit: None,
            env_var: env_var.to_string(),
            vault_ref: vault_ref.to_string(),
        }
    }

    pub fn with_explicit(mut self, value: Option<String>) -> Self {
        self.explicit = value;
        self
    }
}

/// Interactive prompt hook. Supplied by the UI collaborator; `None` on
/// the resolver means prompting is disabled for the run.
#[async_trait]
pub trait SecretPrompt: Send + Sync {
    /// Ask the user for the named secret. `None` means declined/empty.
    async fn prompt(&self, name: &str) -> Option<String>;
}

/// Resolves credentials through the ordered source chain.
///
/// Stateless per call; safe to share across concurrent runs.
pub struct CredentialResolver {
    http: reqwest::Client,
    prompt: Option<Box<dyn SecretPrompt>>,
}

impl CredentialResolver {
    pub fn new(prompt: Option<Box<dyn SecretPrompt>>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, prompt }
    }

    /// Resolve a credential, trying each source in priority order.
    pub async fn resolve(&self, spec: &CredentialSpec) -> Result<Credential, CredentialError> {
        let chain = vec![
            ("explicit", self.from_explicit(spec).boxed()),
            ("environment", self.from_env(spec).boxed()),
            ("vault-sdk", self.from_vault_sdk(spec).boxed()),
            ("vault-cli", self.from_vault_cli(spec).boxed()),
            ("manual", self.from_prompt(spec).boxed()),
        ];

        let (label, value) =
            first_success(&spec.name, chain)
                .await
                .ok_or_else(|| CredentialError::Unavailable {
                    name: spec.name.clone(),
                })?;

        let source = match label {
            "explicit" => CredentialSource::Explicit,
            "environment" => CredentialSource::Environment,
            "vault-sdk" => CredentialSource::VaultSdk,
            "vault-cli" => CredentialSource::VaultCli,
            _ => CredentialSource::Manual,
        };

        let credential = Credential {
            name: spec.name.clone(),
            value: SecretString::from(value),
            source,
        };
        debug!(name = %credential.name, source = %credential.source, "credential resolved");
        Ok(credential)
    }

    async fn from_explicit(&self, spec: &CredentialSpec) -> Option<String> {
        non_empty(spec.explicit.clone()?)
    }

    async fn from_env(&self, spec: &CredentialSpec) -> Option<String> {
        non_empty(std::env::var(&spec.env_var).ok()?)
    }

    /// Vault Connect API lookup. Requires `OP_CONNECT_HOST` and
    /// `OP_CONNECT_TOKEN` in the environment; anything missing or any
    /// HTTP failure degrades to "not found".
    async fn from_vault_sdk(&self, spec: &CredentialSpec) -> Option<String> {
        let host = non_empty(std::env::var("OP_CONNECT_HOST").ok()?)?;
        let token = non_empty(std::env::var("OP_CONNECT_TOKEN").ok()?)?;
        let (vault, item, field) = match parse_vault_ref(&spec.vault_ref) {
            Ok(parts) => parts,
            Err(e) => {
                debug!(error = %e, "vault reference rejected");
                return None;
            }
        };

        let url = format!("{}/v1/vaults/{vault}/items/{item}", host.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "vault connect lookup failed");
            return None;
        }

        #[derive(Deserialize)]
        struct ConnectItem {
            #[serde(default)]
            fields: Vec<ConnectField>,
        }
        #[derive(Deserialize)]
        struct ConnectField {
            #[serde(default)]
            label: String,
            #[serde(default)]
            value: Option<String>,
        }

        let item: ConnectItem = response.json().await.ok()?;
        item.fields
            .into_iter()
            .find(|f| f.label.eq_ignore_ascii_case(&field))
            .and_then(|f| f.value)
            .and_then(non_empty)
    }

    /// Vault CLI lookup: `op read <ref>` with a short timeout.
    async fn from_vault_cli(&self, spec: &CredentialSpec) -> Option<String> {
        let run = tokio::process::Command::new("op")
            .args(["read", &spec.vault_ref])
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(VAULT_CLI_TIMEOUT, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(error = %e, "vault CLI not runnable");
                return None;
            }
            Err(_) => {
                debug!("vault CLI timed out");
                return None;
            }
        };
        if !output.status.success() {
            return None;
        }
        non_empty(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn from_prompt(&self, spec: &CredentialSpec) -> Option<String> {
        let prompt = self.prompt.as_ref()?;
        prompt.prompt(&spec.name).await.and_then(non_empty)
    }
}

/// Split `op://vault/item/field` into its three parts.
fn parse_vault_ref(vault_ref: &str) -> Result<(String, String, String), CredentialError> {
    let rest = vault_ref
        .strip_prefix("op://")
        .ok_or_else(|| CredentialError::InvalidVaultRef(vault_ref.to_string()))?;
    let mut parts = rest.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(v), Some(i), Some(f)) if !v.is_empty() && !i.is_empty() && !f.is_empty() => {
            Ok((v.to_string(), i.to_string(), f.to_string()))
        }
        _ => Err(CredentialError::InvalidVaultRef(vault_ref.to_string())),
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CredentialSpec {
        CredentialSpec::new(
            "Test API Key",
            "MAILTASK_TEST_NONEXISTENT_VAR",
            "op://vault/item/credential",
        )
    }

    struct FixedPrompt(Option<String>);

    #[async_trait]
    impl SecretPrompt for FixedPrompt {
        async fn prompt(&self, _name: &str) -> Option<String> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn explicit_value_wins() {
        let resolver = CredentialResolver::new(Some(Box::new(FixedPrompt(Some(
            "prompted".to_string(),
        )))));
        let credential = resolver
            .resolve(&spec().with_explicit(Some("from-arg".to_string())))
            .await
            .unwrap();
        assert_eq!(credential.source, CredentialSource::Explicit);
        assert_eq!(credential.value.expose_secret(), "from-arg");
    }

    #[tokio::test]
    async fn empty_explicit_is_skipped() {
        let resolver =
            CredentialResolver::new(Some(Box::new(FixedPrompt(Some("prompted".to_string())))));
        let credential = resolver
            .resolve(&spec().with_explicit(Some("   ".to_string())))
            .await
            .unwrap();
        assert_eq!(credential.source, CredentialSource::Manual);
        assert_eq!(credential.value.expose_secret(), "prompted");
    }

    #[tokio::test]
    async fn unavailable_when_all_sources_empty() {
        let resolver = CredentialResolver::new(None);
        let err = resolver.resolve(&spec()).await.unwrap_err();
        assert!(matches!(err, CredentialError::Unavailable { name } if name == "Test API Key"));
    }

    #[tokio::test]
    async fn prompt_declined_is_unavailable() {
        let resolver = CredentialResolver::new(Some(Box::new(FixedPrompt(None))));
        let err = resolver.resolve(&spec()).await.unwrap_err();
        assert!(matches!(err, CredentialError::Unavailable { .. }));
    }

    #[test]
    fn masked_never_reveals_full_value() {
        let credential = Credential {
            name: "k".to_string(),
            value: SecretString::from("pk_ABCDEFGH"),
            source: CredentialSource::Environment,
        };
        let masked = credential.masked();
        assert!(masked.starts_with("pk_A"));
        assert!(!masked.contains("ABCDEFGH"));
    }

    #[test]
    fn debug_redacts_value() {
        let credential = Credential {
            name: "k".to_string(),
            value: SecretString::from("supersecret"),
            source: CredentialSource::Explicit,
        };
        let debugged = format!("{credential:?}");
        assert!(!debugged.contains("supersecret"));
    }

    #[test]
    fn vault_ref_parses() {
        let (v, i, f) = parse_vault_ref("op://Home/ClickUp token/credential").unwrap();
        assert_eq!(v, "Home");
        assert_eq!(i, "ClickUp token");
        assert_eq!(f, "credential");
    }

    #[test]
    fn vault_ref_rejects_malformed() {
        assert!(parse_vault_ref("Home/item/field").is_err());
        assert!(parse_vault_ref("op://only-vault").is_err());
        assert!(parse_vault_ref("op:///item/field").is_err());
    }
}
