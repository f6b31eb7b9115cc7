//! Backlog workflow: generate, validate, map, review, commit.
//!
//! [`BacklogWorkflow::plan`] turns a free-text description into mapped issues,
//! re-prompting the generator with the violations of each rejected answer.
//! [`BacklogWorkflow::commit`] waits for collaborative approval when a session
//! is running, drops rejected entries, and synchronizes the rest.
//!
//! Nothing reaches the tracker before validation and mapping both succeed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pipeline::{
    validate_with, BacklogGenerator, BacklogPrompt, Fingerprint, GenerationError, MappedIssue,
    Mapper, MappingError, SchemaError, TaskBacklog, ValidationLimits,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::retry::{retry, RetryError, RetrySchedule};
use crate::session::{ApprovalOutcome, EndReason, SessionCoordinator};
use crate::sync_engine::{SyncEngine, SyncError, SyncReport};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub limits: ValidationLimits,
    /// Additional generation attempts after a schema rejection.
    pub max_reprompts: u32,
    pub generation_timeout: Duration,
    pub generation_retry: RetrySchedule,
    /// Bound for waiting on collaborative approval.
    pub approval_timeout: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            limits: ValidationLimits::default(),
            max_reprompts: 2,
            generation_timeout: Duration::from_secs(120),
            generation_retry: RetrySchedule {
                max_attempts: 3,
                ..RetrySchedule::default()
            },
            approval_timeout: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Results and errors
// ---------------------------------------------------------------------------

/// A validated backlog and its tracker payloads, ready for review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedBacklog {
    pub backlog: TaskBacklog,
    pub issues: Vec<MappedIssue>,
}

impl PlannedBacklog {
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.issues.iter().map(|i| i.fingerprint.clone()).collect()
    }
}

/// How the review gate let the commit through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "gate", content = "reason", rename_all = "snake_case")]
pub enum ReviewGate {
    /// No collaboration session was running.
    Unrestricted,
    /// The approval policy decided every entry.
    Reviewed,
    /// The session ended during review; committed as a single user.
    SessionEnded(EndReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitReport {
    pub gate: ReviewGate,
    /// Entries the reviewers rejected; never sent to the tracker.
    pub rejected: Vec<Fingerprint>,
    pub sync: SyncReport,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("generated backlog was still invalid after {attempts} attempt(s): {source}")]
    Schema {
        attempts: u32,
        #[source]
        source: SchemaError,
    },

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("review did not finish in time; {undecided} entries still undecided")]
    ApprovalTimedOut { undecided: usize },

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("no tracker is configured; nothing can be committed")]
    NoTracker,

    #[error("workflow cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

pub struct BacklogWorkflow {
    generator: Arc<dyn BacklogGenerator>,
    mapper: Mapper,
    engine: Option<SyncEngine>,
    coordinator: Option<Arc<SessionCoordinator>>,
    settings: WorkflowSettings,
}

impl BacklogWorkflow {
    /// A workflow that can plan but not commit until [`Self::with_engine`].
    pub fn new(
        generator: Arc<dyn BacklogGenerator>,
        mapper: Mapper,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            generator,
            mapper,
            engine: None,
            coordinator: None,
            settings,
        }
    }

    #[must_use]
    pub fn with_engine(mut self, engine: SyncEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Gates commits on the review of `coordinator`'s session.
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: Arc<SessionCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn coordinator(&self) -> Option<&Arc<SessionCoordinator>> {
        self.coordinator.as_ref()
    }

    /// Generates and prepares a backlog for `description`.
    #[tracing::instrument(skip_all, fields(generator = self.generator.name()))]
    pub async fn plan(
        &self,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<PlannedBacklog, WorkflowError> {
        let mut prompt = BacklogPrompt::new(description);
        let budget = self.settings.max_reprompts.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let raw = self.generate(&prompt, cancel).await?;
            match validate_with(&raw, &self.settings.limits) {
                Ok(backlog) => return self.prepare_backlog(backlog),
                Err(source) if attempt >= budget => {
                    return Err(WorkflowError::Schema {
                        attempts: attempt,
                        source,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        attempt,
                        violations = error.violations.len(),
                        error = %error,
                        "Generated backlog failed validation; re-prompting"
                    );
                    prompt = prompt.with_violations(error.violations);
                }
            }
        }
    }

    /// Validates and maps already generated backlog JSON.
    pub fn prepare(&self, raw: &Value) -> Result<PlannedBacklog, WorkflowError> {
        let backlog = validate_with(raw, &self.settings.limits)
            .map_err(|source| WorkflowError::Schema {
                attempts: 1,
                source,
            })?;
        self.prepare_backlog(backlog)
    }

    /// Reviews (when a session is running) and synchronizes `planned`.
    #[tracing::instrument(skip_all, fields(issues = planned.issues.len()))]
    pub async fn commit(
        &self,
        planned: PlannedBacklog,
        cancel: &CancellationToken,
    ) -> Result<CommitReport, WorkflowError> {
        let engine = self.engine.as_ref().ok_or(WorkflowError::NoTracker)?;
        let (gate, approved) = match &self.coordinator {
            None => (ReviewGate::Unrestricted, None),
            Some(coordinator) => {
                let entries = planned.fingerprints();
                let outcome = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(WorkflowError::Cancelled),
                    outcome = coordinator.await_commit_approval(&entries, self.settings.approval_timeout) => outcome,
                };
                match outcome {
                    ApprovalOutcome::Unrestricted => (ReviewGate::Unrestricted, None),
                    ApprovalOutcome::SessionEnded(reason) => {
                        tracing::warn!(%reason, "Session ended during review; committing as single user");
                        (ReviewGate::SessionEnded(reason), None)
                    }
                    ApprovalOutcome::Decided { approved, rejected } => {
                        tracing::info!(
                            approved = approved.len(),
                            rejected = rejected.len(),
                            "Review decided"
                        );
                        (ReviewGate::Reviewed, Some((approved, rejected)))
                    }
                    ApprovalOutcome::TimedOut { undecided } => {
                        return Err(WorkflowError::ApprovalTimedOut {
                            undecided: undecided.len(),
                        });
                    }
                }
            }
        };

        let (issues, rejected) = match approved {
            None => (planned.issues, Vec::new()),
            Some((approved, rejected)) => {
                let approved: HashSet<Fingerprint> = approved.into_iter().collect();
                let issues = planned
                    .issues
                    .into_iter()
                    .filter(|issue| approved.contains(&issue.fingerprint))
                    .collect();
                (issues, rejected)
            }
        };

        let sync = engine.synchronize(issues, cancel).await?;
        Ok(CommitReport {
            gate,
            rejected,
            sync,
        })
    }

    async fn generate(
        &self,
        prompt: &BacklogPrompt,
        cancel: &CancellationToken,
    ) -> Result<Value, WorkflowError> {
        let result = retry(
            "generate_backlog",
            &self.settings.generation_retry,
            self.settings.generation_timeout,
            cancel,
            || self.generator.generate(prompt),
        )
        .await;
        match result {
            Ok(retried) => Ok(retried.value),
            Err(RetryError::Cancelled) => Err(WorkflowError::Cancelled),
            Err(RetryError::GaveUp { error, .. }) => Err(error.into()),
        }
    }

    fn prepare_backlog(&self, backlog: TaskBacklog) -> Result<PlannedBacklog, WorkflowError> {
        let issues = self.mapper.map(&backlog)?;
        tracing::info!(tasks = backlog.len(), "Backlog validated and mapped");
        Ok(PlannedBacklog { backlog, issues })
    }
}
