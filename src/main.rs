use std::sync::Arc;

use anyhow::{Context, bail};
use mailtask::analyze::{GeminiProvider, Summarizer, SummarizerConfig};
use mailtask::clickup::ClickUpClient;
use mailtask::config::{MappingEntry, Platform, WorkflowConfig};
use mailtask::credentials::{CredentialResolver, CredentialSpec};
use mailtask::extract::{ExtractorRegistry, GmailExtractor, OutlookExtractor};
use mailtask::workflow::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let reference = std::env::args().nth(1).unwrap_or_default();
    if reference.is_empty() {
        eprintln!("Usage: mailtask <email-url>");
        eprintln!();
        eprintln!("Environment:");
        eprintln!("  MAILTASK_WORKSPACE / MAILTASK_SPACE / MAILTASK_LIST   target list (required)");
        eprintln!("  MAILTASK_PLATFORM        GMAIL|OUTLOOK override (auto-detected otherwise)");
        eprintln!("  MAILTASK_AI=1            enable AI analysis");
        eprintln!("  MAILTASK_MAPPING=<path>  JSON file with custom field mapping entries");
        eprintln!("  CLICKUP_API_KEY          task service token (or vault/prompt fallback)");
        eprintln!("  GEMINI_API_KEY           AI token, only when MAILTASK_AI=1");
        std::process::exit(2);
    }

    let workspace = require_env("MAILTASK_WORKSPACE")?;
    let space = require_env("MAILTASK_SPACE")?;
    let list = require_env("MAILTASK_LIST")?;

    let platform_override = match std::env::var("MAILTASK_PLATFORM") {
        Ok(raw) => Some(
            raw.parse::<Platform>()
                .map_err(|e| anyhow::anyhow!("MAILTASK_PLATFORM: {e}"))?,
        ),
        Err(_) => None,
    };

    let enable_ai = std::env::var("MAILTASK_AI").is_ok_and(|v| v == "1" || v == "true");
    let mapping = load_mapping()?;

    let config = WorkflowConfig {
        workspace,
        space,
        list,
        platform_override,
        enable_ai,
        mapping,
        ..WorkflowConfig::default()
    };

    // Credentials: the resolver walks explicit → env → vault SDK →
    // vault CLI; prompting stays with the (absent) UI here.
    let resolver = CredentialResolver::new(None);
    let task_token = resolver
        .resolve(&CredentialSpec::new(
            "ClickUp API Key",
            "CLICKUP_API_KEY",
            "op://Home Server/ClickUp personal API token/credential",
        ))
        .await
        .context("task service credential")?;
    eprintln!("  task service credential: {}", task_token.masked());

    let summarizer = if enable_ai {
        match resolver
            .resolve(&CredentialSpec::new(
                "Gemini API Key",
                "GEMINI_API_KEY",
                "op://Home Server/Gemini API key/credential",
            ))
            .await
        {
            Ok(ai_token) => {
                let model = std::env::var("MAILTASK_AI_MODEL")
                    .unwrap_or_else(|_| "gemini-2.5-flash-lite".to_string());
                eprintln!("  AI analysis: enabled (model: {model})");
                Summarizer::new(
                    Some(Box::new(GeminiProvider::new(
                        reqwest::Client::new(),
                        ai_token.value,
                        model,
                    ))),
                    SummarizerConfig {
                        heuristic_fallback: config.allow_heuristic_fallback,
                        ..SummarizerConfig::default()
                    },
                )
            }
            Err(e) => {
                eprintln!("  AI analysis: requested but no credential ({e}), disabled");
                Summarizer::disabled()
            }
        }
    } else {
        Summarizer::disabled()
    };

    let http = reqwest::Client::builder()
        .timeout(mailtask::config::API_TIMEOUT)
        .build()?;
    let gmail_token = std::env::var("GMAIL_API_TOKEN")
        .ok()
        .map(secrecy::SecretString::from);
    let outlook_token = std::env::var("OUTLOOK_API_TOKEN")
        .ok()
        .map(secrecy::SecretString::from);
    let registry = ExtractorRegistry::new(
        http.clone(),
        GmailExtractor::new(http.clone(), gmail_token),
        OutlookExtractor::new(http, outlook_token),
    );

    let api = Arc::new(ClickUpClient::new(task_token.value));

    let orchestrator = Orchestrator::new(config, registry, summarizer, api);

    match orchestrator.run(&reference).await {
        Ok(outcome) => {
            println!("Task created: {} ({})", outcome.task.id, outcome.task.url);
            if !outcome.skipped.is_empty() {
                println!("Skipped fields:");
                for failure in &outcome.skipped {
                    println!("  - {}: {}", failure.field, failure.reason);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Task creation failed: {e}");
            std::process::exit(1);
        }
    }
}

fn require_env(name: &str) -> anyhow::Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("{name} must be set"),
    }
}

fn load_mapping() -> anyhow::Result<Vec<MappingEntry>> {
    match std::env::var("MAILTASK_MAPPING") {
        Ok(path) => parse_mapping_file(&path),
        Err(_) => Ok(Vec::new()),
    }
}

fn parse_mapping_file(path: &str) -> anyhow::Result<Vec<MappingEntry>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing mapping file {path}"))
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mailtask=info"));

    // Optional log file alongside console output.
    if let Ok(path) = std::env::var("MAILTASK_LOG_FILE") {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log file {path}"))?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        // Keep the flush guard alive for the process lifetime.
        Box::leak(Box::new(guard));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn mapping_file_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{
                "target_field": "Email Subject",
                "field_type": "TEXT",
                "extractor": {{ "content": "subject" }}
            }}]"#
        )
        .unwrap();

        let entries = parse_mapping_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target_field, "Email Subject");
    }

    #[test]
    fn missing_mapping_file_is_an_error() {
        assert!(parse_mapping_file("/nonexistent/mapping.json").is_err());
    }
}
