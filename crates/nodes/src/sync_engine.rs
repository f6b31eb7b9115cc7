//! Idempotent synchronization of mapped issues into the tracker.
//!
//! For every [`MappedIssue`] the engine consults the [`SyncRecordStore`] under
//! a per-fingerprint lock and decides:
//!
//! | Record | Action |
//! |--------|--------|
//! | none, `Pending`, `Failed` | write `Pending`, create, then `Created` |
//! | `Created`, same hash | `Skipped` |
//! | `Created`, changed hash | revision check, update, refresh hash |
//!
//! `Created` is persisted as soon as the tracker returns an id. The revision
//! used for conflict detection is read afterwards in a separate call, so a
//! slow read can never cause the create to be retried.
//!
//! A failure for one issue never aborts its siblings. Only a store failure
//! aborts the run, because idempotency can no longer be guaranteed once the
//! engine cannot trust what it wrote.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use pipeline::{
    Fingerprint, IssueKey, IssueSyncError, IssueTracker, MappedIssue, RemoteIssueId, StoreError,
    SyncConflictError, SyncOperation, SyncRecord, SyncRecordStore, SyncRunId, SyncStatus,
    TrackerApiError,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::retry::{retry, RetryError, RetrySchedule, Retried};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tunables for a [`SyncEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub retry: RetrySchedule,
    /// Upper bound for a single tracker call.
    pub request_timeout: Duration,
    /// Issues synchronized at the same time. Zero behaves like one.
    pub max_concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            retry: RetrySchedule::default(),
            request_timeout: Duration::from_secs(30),
            max_concurrency: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Remote identity of a synchronized issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRef {
    pub id: RemoteIssueId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<IssueKey>,
}

impl std::fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{key}"),
            None => write!(f, "#{}", self.id),
        }
    }
}

/// What happened to one issue during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Created { remote: RemoteRef },
    Updated { remote: RemoteRef },
    /// The remote issue already matches.
    Skipped { remote: RemoteRef },
    Failed { error: IssueSyncError },
    /// The run was cancelled before this issue finished.
    Cancelled,
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn remote(&self) -> Option<&RemoteRef> {
        match self {
            Self::Created { remote } | Self::Updated { remote } | Self::Skipped { remote } => {
                Some(remote)
            }
            Self::Failed { .. } | Self::Cancelled => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result for one input issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueReport {
    pub fingerprint: Fingerprint,
    pub summary: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Per-issue results of a run, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub run_id: SyncRunId,
    pub entries: Vec<IssueReport>,
}

impl SyncReport {
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Created { .. }))
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Updated { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(SyncOutcome::is_failure)
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Cancelled))
    }

    /// `true` when no issue failed or was cancelled.
    pub fn is_complete_success(&self) -> bool {
        self.failed() == 0 && self.cancelled() == 0
    }

    fn count(&self, predicate: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| predicate(&e.outcome)).count()
    }
}

/// A run-level failure. Per-issue failures are reported in [`SyncReport`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync aborted: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Pushes mapped issues to an [`IssueTracker`], remembering what it did in a
/// [`SyncRecordStore`].
pub struct SyncEngine {
    tracker: Arc<dyn IssueTracker>,
    store: Arc<dyn SyncRecordStore>,
    settings: SyncSettings,
    locks: FingerprintLocks,
}

impl SyncEngine {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        store: Arc<dyn SyncRecordStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            tracker,
            store,
            settings,
            locks: FingerprintLocks::default(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Synchronizes `issues`, returning one report entry per input issue.
    pub async fn synchronize(
        &self,
        issues: Vec<MappedIssue>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        self.run(SyncRunId::new_random(), issues, cancel).await
    }

    #[tracing::instrument(skip_all, fields(run_id = %run_id, issues = issues.len()))]
    async fn run(
        &self,
        run_id: SyncRunId,
        issues: Vec<MappedIssue>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let limit = self.settings.max_concurrency.max(1);

        let mut entries: Vec<(usize, IssueReport)> = stream::iter(issues.into_iter().enumerate())
            .map(|(index, issue)| async move {
                let report = self.sync_one(issue, cancel).await?;
                Ok::<_, SyncError>((index, report))
            })
            .buffer_unordered(limit)
            .try_collect()
            .await?;
        entries.sort_by_key(|(index, _)| *index);

        let report = SyncReport {
            run_id,
            entries: entries.into_iter().map(|(_, entry)| entry).collect(),
        };
        tracing::info!(
            created = report.created(),
            updated = report.updated(),
            skipped = report.skipped(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "Sync run finished"
        );
        Ok(report)
    }

    async fn sync_one(
        &self,
        issue: MappedIssue,
        cancel: &CancellationToken,
    ) -> Result<IssueReport, SyncError> {
        let outcome = if cancel.is_cancelled() {
            SyncOutcome::Cancelled
        } else {
            let _guard = self.locks.acquire(&issue.fingerprint).await;
            if cancel.is_cancelled() {
                SyncOutcome::Cancelled
            } else {
                match self.store.get(&issue.fingerprint).await? {
                    Some(record)
                        if record.status == SyncStatus::Created && record.remote_id.is_some() =>
                    {
                        self.refresh(record, &issue, cancel).await?
                    }
                    _ => self.create(&issue, cancel).await?,
                }
            }
        };

        tracing::info!(
            fingerprint = issue.fingerprint.short(),
            summary = %issue.payload.summary,
            outcome = outcome.label(),
            "Issue synchronized"
        );

        Ok(IssueReport {
            fingerprint: issue.fingerprint,
            summary: issue.payload.summary,
            outcome,
        })
    }

    async fn create(
        &self,
        issue: &MappedIssue,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let pending = SyncRecord::pending(issue.fingerprint.clone(), &issue.payload.summary);
        self.store.upsert(pending.clone()).await?;

        let result = self
            .call("create_issue", cancel, || self.tracker.create_issue(&issue.payload))
            .await;

        match result {
            Ok(Retried { value: remote, .. }) => {
                let record = pending.created(
                    remote.id.clone(),
                    remote.key.clone(),
                    issue.content_hash.clone(),
                    None,
                );
                self.store.upsert(record.clone()).await?;
                self.record_revision(record, cancel).await?;
                Ok(SyncOutcome::Created {
                    remote: RemoteRef {
                        id: remote.id,
                        key: remote.key,
                    },
                })
            }
            Err(RetryError::Cancelled) => Ok(SyncOutcome::Cancelled),
            Err(RetryError::GaveUp { error, attempts }) => {
                self.store.upsert(pending.failed(error.to_string())).await?;
                Ok(failed(SyncOperation::Create, attempts, error))
            }
        }
    }

    /// Handles an issue that already exists remotely.
    async fn refresh(
        &self,
        record: SyncRecord,
        issue: &MappedIssue,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(remote_id) = record.remote_id.clone() else {
            return self.create(issue, cancel).await;
        };
        let remote = RemoteRef {
            id: remote_id.clone(),
            key: record.remote_key.clone(),
        };

        if record.is_current(&issue.content_hash) {
            return Ok(SyncOutcome::Skipped { remote });
        }

        if let Some(expected) = &record.remote_revision {
            let found = match self
                .call("issue_revision", cancel, || self.tracker.issue_revision(&remote_id))
                .await
            {
                Ok(Retried { value, .. }) => value,
                Err(RetryError::Cancelled) => return Ok(SyncOutcome::Cancelled),
                Err(RetryError::GaveUp { error, attempts }) => {
                    return Ok(failed(SyncOperation::Inspect, attempts, error));
                }
            };
            if found.as_ref() != Some(expected) {
                let conflict = SyncConflictError {
                    fingerprint: issue.fingerprint.clone(),
                    remote_id,
                    expected: expected.clone(),
                    found,
                };
                tracing::warn!(error = %conflict, "Remote issue changed since last sync");
                return Ok(SyncOutcome::Failed {
                    error: conflict.into(),
                });
            }
        }

        let result = self
            .call("update_issue", cancel, || {
                self.tracker.update_issue(&remote_id, &issue.payload)
            })
            .await;

        match result {
            Ok(_) => {
                let record =
                    record.updated(&issue.payload.summary, issue.content_hash.clone(), None);
                self.store.upsert(record.clone()).await?;
                self.record_revision(record, cancel).await?;
                Ok(SyncOutcome::Updated { remote })
            }
            Err(RetryError::Cancelled) => Ok(SyncOutcome::Cancelled),
            // The record keeps its previous hash so the next run retries the update.
            Err(RetryError::GaveUp { error, attempts }) => {
                Ok(failed(SyncOperation::Update, attempts, error))
            }
        }
    }

    /// Reads the revision of a freshly written issue into its record.
    ///
    /// The write is already durable, so a failed or cancelled read leaves the
    /// record without a revision instead of failing the issue.
    async fn record_revision(
        &self,
        record: SyncRecord,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let Some(remote_id) = record.remote_id.clone() else {
            return Ok(());
        };
        match self
            .call("issue_revision", cancel, || self.tracker.issue_revision(&remote_id))
            .await
        {
            Ok(Retried { value: None, .. }) => Ok(()),
            Ok(Retried { value: revision, .. }) => {
                self.store.upsert(record.observed(revision)).await?;
                Ok(())
            }
            Err(RetryError::Cancelled) => Ok(()),
            Err(RetryError::GaveUp { error, .. }) => {
                tracing::warn!(
                    remote_id = %remote_id,
                    %error,
                    "Could not read issue revision after write"
                );
                Ok(())
            }
        }
    }

    async fn call<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<Retried<T>, RetryError<TrackerApiError>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, TrackerApiError>>,
    {
        retry(
            operation,
            &self.settings.retry,
            self.settings.request_timeout,
            cancel,
            call,
        )
        .await
    }
}

fn failed(operation: SyncOperation, attempts: u32, source: TrackerApiError) -> SyncOutcome {
    SyncOutcome::Failed {
        error: IssueSyncError::Tracker {
            operation,
            attempts,
            source,
        },
    }
}

// ---------------------------------------------------------------------------
// Per-fingerprint locks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FingerprintLocks {
    locks: Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>,
}

impl FingerprintLocks {
    async fn acquire(&self, fingerprint: &Fingerprint) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(fingerprint.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(title: &str) -> Fingerprint {
        Fingerprint::derive(None, title, "Task")
    }

    fn entry(title: &str, outcome: SyncOutcome) -> IssueReport {
        IssueReport {
            fingerprint: fp(title),
            summary: title.to_string(),
            outcome,
        }
    }

    fn remote(id: &str) -> RemoteRef {
        RemoteRef {
            id: RemoteIssueId::new(id).unwrap(),
            key: None,
        }
    }

    #[test]
    fn report_counts_each_outcome() {
        let report = SyncReport {
            run_id: SyncRunId::new_random(),
            entries: vec![
                entry("a", SyncOutcome::Created { remote: remote("1") }),
                entry("b", SyncOutcome::Skipped { remote: remote("2") }),
                entry("c", SyncOutcome::Cancelled),
            ],
        };
        assert_eq!(report.created(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.cancelled(), 1);
        assert_eq!(report.failed(), 0);
        assert!(!report.is_complete_success());
    }

    #[test]
    fn outcome_serializes_with_a_tag() {
        let value = serde_json::to_value(entry(
            "a",
            SyncOutcome::Updated {
                remote: RemoteRef {
                    id: RemoteIssueId::new("10001").unwrap(),
                    key: IssueKey::new("PROJ-1"),
                },
            },
        ))
        .unwrap();
        assert_eq!(value["outcome"], "updated");
        assert_eq!(value["remote"]["key"], "PROJ-1");
        assert_eq!(value["summary"], "a");
    }

    #[test]
    fn remote_ref_prefers_the_key() {
        assert_eq!(remote("7").to_string(), "#7");
        let keyed = RemoteRef {
            id: RemoteIssueId::new("7").unwrap(),
            key: IssueKey::new("PROJ-7"),
        };
        assert_eq!(keyed.to_string(), "PROJ-7");
    }

    #[tokio::test]
    async fn locks_are_released_and_pruned() {
        let locks = FingerprintLocks::default();
        {
            let _a = locks.acquire(&fp("a")).await;
            let _b = locks.acquire(&fp("b")).await;
            assert_eq!(locks.locks.lock().len(), 2);
        }
        let _c = locks.acquire(&fp("c")).await;
        assert_eq!(locks.locks.lock().len(), 1);
    }
}
