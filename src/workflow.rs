//! Workflow orchestration.
//!
//! Sequences extract → analyze → map → validate → create as a state
//! machine:
//!
//! ```text
//! Idle → Extracting → (Analyzing | SkippingAnalysis) → Mapping
//!      → Validating → (AwaitingConfirmation?) → Creating → Done
//! ```
//!
//! Failure policy: extraction and creation failures reach the terminal
//! error with their cause; analysis can never fail the run; per-field
//! problems ride along in the outcome. The run may be cancelled between
//! any two stages — no task exists remotely until Creating succeeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::analyze::{EmailAnalysis, Summarizer};
use crate::clickup::{TaskApi, TaskResult};
use crate::config::WorkflowConfig;
use crate::error::{ApiError, Result, ValidationIssue, WorkflowError};
use crate::extract::ExtractorRegistry;
use crate::fields::{self, FieldFailure, TaskPayload};
use crate::retry::{BackoffPolicy, retry_rate_limited};

/// Workflow stages, for logging and failure attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Extracting,
    Analyzing,
    SkippingAnalysis,
    Mapping,
    Validating,
    AwaitingConfirmation,
    Creating,
    Done,
    Failed,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowState::Idle => "idle",
            WorkflowState::Extracting => "extracting",
            WorkflowState::Analyzing => "analyzing",
            WorkflowState::SkippingAnalysis => "skipping-analysis",
            WorkflowState::Mapping => "mapping",
            WorkflowState::Validating => "validating",
            WorkflowState::AwaitingConfirmation => "awaiting-confirmation",
            WorkflowState::Creating => "creating",
            WorkflowState::Done => "done",
            WorkflowState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Preview confirmation hook, supplied by the UI collaborator when the
/// run is interactive.
#[async_trait]
pub trait ConfirmPreview: Send + Sync {
    /// `false` denies creation and cancels the run.
    async fn confirm(&self, payload: &TaskPayload, skipped: &[FieldFailure]) -> bool;
}

/// Everything a successful run produces.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub task: TaskResult,
    /// AI analysis used for the payload, when one was produced.
    pub analysis: Option<EmailAnalysis>,
    /// Fields skipped during payload build, with reasons.
    pub skipped: Vec<FieldFailure>,
    /// Advisory validation findings the run proceeded past.
    pub issues: Vec<ValidationIssue>,
}

/// Runs one email reference through the full workflow.
///
/// Owns every intermediate value for the run; holds no state across
/// runs, so one orchestrator can serve many sequential references.
pub struct Orchestrator {
    config: WorkflowConfig,
    registry: ExtractorRegistry,
    summarizer: Summarizer,
    api: Arc<dyn TaskApi>,
    confirm: Option<Box<dyn ConfirmPreview>>,
    policy: BackoffPolicy,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        config: WorkflowConfig,
        registry: ExtractorRegistry,
        summarizer: Summarizer,
        api: Arc<dyn TaskApi>,
    ) -> Self {
        Self {
            config,
            registry,
            summarizer,
            api,
            confirm: None,
            policy: BackoffPolicy::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_confirm(mut self, confirm: Box<dyn ConfirmPreview>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Flag that cancels the run at the next stage boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run the workflow for one reference.
    pub async fn run(&self, reference: &str) -> Result<WorkflowOutcome> {
        let run_id = uuid::Uuid::new_v4();
        let mut state = WorkflowState::Idle;
        info!(%run_id, reference, "starting task-from-email workflow");

        // ── Extracting ──────────────────────────────────────────────
        self.transition(&mut state, WorkflowState::Extracting)?;
        let content = self
            .registry
            .extract(
                reference,
                self.config.platform_override,
                self.config.allow_scrape_fallback,
            )
            .await?;
        debug!(
            platform = %content.source_platform,
            subject = %content.subject,
            "email content extracted"
        );

        // ── Analyzing ───────────────────────────────────────────────
        // Never fails the run: every failure mode inside the summarizer
        // degrades to a heuristic analysis or None.
        let analysis = if self.config.enable_ai {
            self.transition(&mut state, WorkflowState::Analyzing)?;
            self.summarizer.analyze(&content).await
        } else {
            self.transition(&mut state, WorkflowState::SkippingAnalysis)?;
            None
        };

        // ── Mapping ─────────────────────────────────────────────────
        self.transition(&mut state, WorkflowState::Mapping)?;

        // Required-field check runs before any task-service request, so
        // an empty title halts with zero remote calls.
        let (name, _) = fields::derive_core_fields(&content, analysis.as_ref());
        if name.trim().is_empty() {
            return Err(WorkflowError::Validation {
                issues: vec![ValidationIssue::fatal("name", "task name must not be empty")],
            });
        }

        let list_id = self
            .api
            .resolve_list(&self.config.workspace, &self.config.space, &self.config.list)
            .await?;
        let schema = self.api.field_schema(&list_id).await?;
        let built = fields::build_payload(&content, analysis.as_ref(), &self.config.mapping, &schema);
        for failure in &built.skipped {
            warn!(field = %failure.field, reason = %failure.reason, "custom field skipped");
        }

        // ── Validating ──────────────────────────────────────────────
        self.transition(&mut state, WorkflowState::Validating)?;
        let issues = fields::validate(&built.payload, &schema);
        if issues.iter().any(ValidationIssue::is_fatal) {
            return Err(WorkflowError::Validation { issues });
        }
        for issue in &issues {
            warn!(field = %issue.field, reason = %issue.reason, "validation finding, proceeding");
        }

        // ── AwaitingConfirmation ────────────────────────────────────
        if self.config.interactive {
            self.transition(&mut state, WorkflowState::AwaitingConfirmation)?;
            match &self.confirm {
                Some(confirm) => {
                    if !confirm.confirm(&built.payload, &built.skipped).await {
                        info!("preview denied, cancelling run");
                        return Err(WorkflowError::UserCancelled);
                    }
                }
                None => warn!("interactive run without a confirm hook, proceeding"),
            }
        }

        // ── Creating ────────────────────────────────────────────────
        self.transition(&mut state, WorkflowState::Creating)?;
        let task = retry_rate_limited(&self.policy, "create-task", || {
            self.api.create_task(&list_id, &built.payload)
        })
        .await
        .map_err(|e| match e {
            ApiError::RateLimited { .. } => WorkflowError::TaskCreation(e),
            other => WorkflowError::Api(other),
        })?;

        // No cancellation check here: the task already exists remotely.
        state = WorkflowState::Done;
        debug!(state = %state, "workflow finished");
        info!(task_id = %task.id, url = %task.url, "task created");

        Ok(WorkflowOutcome {
            task,
            analysis,
            skipped: built.skipped,
            issues,
        })
    }

    /// Advance the state machine, honoring cancellation at the boundary.
    fn transition(&self, state: &mut WorkflowState, next: WorkflowState) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            debug!(at = %state, "run cancelled at stage boundary");
            return Err(WorkflowError::UserCancelled);
        }
        debug!(from = %state, to = %next, "workflow transition");
        *state = next;
        Ok(())
    }
}
