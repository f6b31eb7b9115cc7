//! Shared fakes and fixtures for the orchestration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nodes::{RetrySchedule, SyncEngine, SyncSettings};
use parking_lot::Mutex;
use pipeline::{
    validate, BacklogGenerator, BacklogPrompt, GenerationError, IssueKey, IssuePayload,
    IssueTracker, MappedIssue, Mapper, MapperConfig, ProjectKey, RemoteIssue, RemoteIssueId,
    RemoteRevision, SyncRecordStore, TrackerApiError,
};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Fake tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredIssue {
    pub key: String,
    pub payload: IssuePayload,
    pub revision: u32,
}

#[derive(Default)]
struct TrackerState {
    issues: BTreeMap<String, StoredIssue>,
    creates: u32,
    updates: u32,
    rejected_summaries: HashSet<String>,
    transient_failures: u32,
    create_delay: Option<Duration>,
    revision_delay: Option<Duration>,
    revision_reads: u32,
}

/// An in-memory tracker that records every call.
#[derive(Default)]
pub struct FakeTracker {
    state: Mutex<TrackerState>,
}

impl FakeTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Rejects creates and updates of issues with this summary (HTTP 400).
    pub fn reject_summary(&self, summary: &str) {
        self.state
            .lock()
            .rejected_summaries
            .insert(summary.to_string());
    }

    pub fn accept_all(&self) {
        self.state.lock().rejected_summaries.clear();
    }

    /// The next `n` calls fail with a retryable 503.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().transient_failures = n;
    }

    /// Simulates an edit made directly in the tracker.
    pub fn edit_remotely(&self, id: &RemoteIssueId) {
        if let Some(issue) = self.state.lock().issues.get_mut(id.as_str()) {
            issue.revision += 1;
        }
    }

    /// Every create takes this long before it reaches the tracker.
    pub fn delay_creates(&self, delay: Duration) {
        self.state.lock().create_delay = Some(delay);
    }

    /// Every revision read takes this long to answer.
    pub fn delay_revisions(&self, delay: Duration) {
        self.state.lock().revision_delay = Some(delay);
    }

    pub fn revision_reads(&self) -> u32 {
        self.state.lock().revision_reads
    }

    pub fn creates(&self) -> u32 {
        self.state.lock().creates
    }

    pub fn updates(&self) -> u32 {
        self.state.lock().updates
    }

    pub fn issue(&self, id: &RemoteIssueId) -> Option<StoredIssue> {
        self.state.lock().issues.get(id.as_str()).cloned()
    }

    pub fn issue_count(&self) -> usize {
        self.state.lock().issues.len()
    }

    fn gate(state: &mut TrackerState, payload: &IssuePayload) -> Result<(), TrackerApiError> {
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(TrackerApiError::Server {
                status: 503,
                body: "unavailable".into(),
                retry_after: None,
            });
        }
        if state.rejected_summaries.contains(&payload.summary) {
            return Err(TrackerApiError::Rejected {
                status: 400,
                body: "summary is not allowed".into(),
            });
        }
        Ok(())
    }
}

fn revision(n: u32) -> Option<RemoteRevision> {
    RemoteRevision::new(format!("r{n}"))
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn create_issue(&self, payload: &IssuePayload) -> Result<RemoteIssue, TrackerApiError> {
        let delay = self.state.lock().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        Self::gate(&mut state, payload)?;
        state.creates += 1;
        let n = state.creates;
        let id = format!("{}", 10000 + n);
        let key = format!("{}-{n}", payload.project);
        state.issues.insert(
            id.clone(),
            StoredIssue {
                key: key.clone(),
                payload: payload.clone(),
                revision: 1,
            },
        );
        Ok(RemoteIssue {
            id: RemoteIssueId::new(id).unwrap(),
            key: IssueKey::new(key),
        })
    }

    async fn update_issue(
        &self,
        id: &RemoteIssueId,
        payload: &IssuePayload,
    ) -> Result<(), TrackerApiError> {
        let mut state = self.state.lock();
        Self::gate(&mut state, payload)?;
        state.updates += 1;
        let issue = state
            .issues
            .get_mut(id.as_str())
            .ok_or_else(|| TrackerApiError::Rejected {
                status: 404,
                body: "no such issue".into(),
            })?;
        issue.payload = payload.clone();
        issue.revision += 1;
        Ok(())
    }

    async fn issue_revision(
        &self,
        id: &RemoteIssueId,
    ) -> Result<Option<RemoteRevision>, TrackerApiError> {
        let delay = {
            let mut state = self.state.lock();
            state.revision_reads += 1;
            state.revision_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock();
        Ok(state
            .issues
            .get(id.as_str())
            .and_then(|issue| revision(issue.revision)))
    }
}

// ---------------------------------------------------------------------------
// Scripted generator
// ---------------------------------------------------------------------------

/// Returns queued answers in order and records every prompt.
#[derive(Default)]
pub struct ScriptedGenerator {
    answers: Mutex<VecDeque<Result<Value, GenerationError>>>,
    prompts: Mutex<Vec<BacklogPrompt>>,
}

impl ScriptedGenerator {
    pub fn new(answers: impl IntoIterator<Item = Result<Value, GenerationError>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<BacklogPrompt> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl BacklogGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &BacklogPrompt) -> Result<Value, GenerationError> {
        self.prompts.lock().push(prompt.clone());
        self.answers
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::NotConfigured("script exhausted".into())))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn mapper() -> Mapper {
    Mapper::new(MapperConfig::canonical(ProjectKey::new("PROJ").unwrap())).unwrap()
}

/// Validates and maps backlog JSON with the canonical vocabulary.
pub fn mapped(raw: Value) -> Vec<MappedIssue> {
    let backlog = validate(&raw).unwrap();
    mapper().map(&backlog).unwrap()
}

pub fn settings() -> SyncSettings {
    SyncSettings {
        retry: RetrySchedule {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        },
        request_timeout: Duration::from_secs(5),
        max_concurrency: 4,
    }
}

pub fn engine(tracker: Arc<FakeTracker>, store: Arc<dyn SyncRecordStore>) -> SyncEngine {
    SyncEngine::new(tracker, store, settings())
}
