//! Sync engine behaviour against an in-memory tracker and record store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{engine, mapped, FakeTracker};
use nodes::{SyncError, SyncOutcome};
use pipeline::{
    Fingerprint, IssueSyncError, StoreError, SyncOperation, SyncRecord, SyncRecordStore,
    SyncStatus,
};
use serde_json::json;
use store::MemoryRecordStore;
use tokio_util::sync::CancellationToken;

fn three_tasks() -> serde_json::Value {
    json!({
        "projectName": "Demo",
        "tasks": [
            { "title": "Set up CI", "type": "Task", "priority": "High" },
            { "title": "Add login", "type": "Story", "description": "OAuth only" },
            { "title": "Fix crash on start", "type": "Bug", "labels": ["crash"] }
        ]
    })
}

fn outcomes(report: &nodes::SyncReport) -> Vec<&'static str> {
    report
        .entries
        .iter()
        .map(|e| match e.outcome {
            SyncOutcome::Created { .. } => "created",
            SyncOutcome::Updated { .. } => "updated",
            SyncOutcome::Skipped { .. } => "skipped",
            SyncOutcome::Failed { .. } => "failed",
            SyncOutcome::Cancelled => "cancelled",
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn second_sync_of_the_same_backlog_is_all_skipped() {
    let tracker = FakeTracker::new();
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine(tracker.clone(), store.clone());
    let cancel = CancellationToken::new();

    let first = engine.synchronize(mapped(three_tasks()), &cancel).await.unwrap();
    assert_eq!(outcomes(&first), ["created", "created", "created"]);

    let second = engine.synchronize(mapped(three_tasks()), &cancel).await.unwrap();
    assert_eq!(outcomes(&second), ["skipped", "skipped", "skipped"]);
    assert_eq!(tracker.creates(), 3);
    assert_eq!(tracker.updates(), 0);
    assert_ne!(first.run_id, second.run_id);

    // Remote identity is reported on skips too.
    let remotes: Vec<_> = first
        .entries
        .iter()
        .map(|e| e.outcome.remote().cloned())
        .collect();
    let skipped: Vec<_> = second
        .entries
        .iter()
        .map(|e| e.outcome.remote().cloned())
        .collect();
    assert_eq!(remotes, skipped);
}

#[tokio::test(start_paused = true)]
async fn description_change_updates_the_existing_issue() {
    let tracker = FakeTracker::new();
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine(tracker.clone(), store.clone());
    let cancel = CancellationToken::new();

    engine.synchronize(mapped(three_tasks()), &cancel).await.unwrap();

    let mut changed = three_tasks();
    changed["tasks"][1]["description"] = json!("OAuth and passkeys");
    let issues = mapped(changed);
    let login = issues[1].clone();

    let report = engine.synchronize(issues, &cancel).await.unwrap();
    assert_eq!(outcomes(&report), ["skipped", "updated", "skipped"]);
    assert_eq!(tracker.creates(), 3);
    assert_eq!(tracker.updates(), 1);

    let record = store.get(&login.fingerprint).await.unwrap().unwrap();
    assert!(record.is_current(&login.content_hash));
    let remote = tracker.issue(record.remote_id.as_ref().unwrap()).unwrap();
    assert_eq!(remote.payload.description, "OAuth and passkeys");
}

#[tokio::test(start_paused = true)]
async fn a_rejected_issue_does_not_stop_its_siblings() {
    let tracker = FakeTracker::new();
    tracker.reject_summary("Add login");
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine(tracker.clone(), store.clone());
    let cancel = CancellationToken::new();

    let issues = mapped(three_tasks());
    let login = issues[1].fingerprint.clone();
    let report = engine.synchronize(issues, &cancel).await.unwrap();

    assert_eq!(outcomes(&report), ["created", "failed", "created"]);
    match &report.entries[1].outcome {
        SyncOutcome::Failed {
            error:
                IssueSyncError::Tracker {
                    operation,
                    attempts,
                    ..
                },
        } => {
            assert_eq!(*operation, SyncOperation::Create);
            assert_eq!(*attempts, 1, "4xx rejections are not retried");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let record = store.get(&login).await.unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Failed);
    assert!(record.last_error.unwrap().contains("400"));

    // The next run retries only the failed create.
    tracker.accept_all();
    let rerun = engine.synchronize(mapped(three_tasks()), &cancel).await.unwrap();
    assert_eq!(outcomes(&rerun), ["skipped", "created", "skipped"]);
    assert_eq!(tracker.issue_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let tracker = FakeTracker::new();
    tracker.fail_next(2);
    let engine = engine(tracker.clone(), Arc::new(MemoryRecordStore::new()));

    let report = engine
        .synchronize(
            mapped(json!({ "tasks": [{ "title": "Fix bug" }] })),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcomes(&report), ["created"]);
    assert_eq!(tracker.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_update_keeps_the_record_created() {
    let tracker = FakeTracker::new();
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine(tracker.clone(), store.clone());
    let cancel = CancellationToken::new();

    let original = mapped(json!({ "tasks": [{ "title": "Fix bug" }] }));
    engine.synchronize(original.clone(), &cancel).await.unwrap();

    tracker.reject_summary("Fix bug");
    let changed = mapped(json!({ "tasks": [{ "title": "Fix bug", "description": "now" }] }));
    let report = engine.synchronize(changed.clone(), &cancel).await.unwrap();
    assert_eq!(outcomes(&report), ["failed"]);

    let record = store.get(&changed[0].fingerprint).await.unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Created);
    assert!(record.is_current(&original[0].content_hash));

    tracker.accept_all();
    let report = engine.synchronize(changed, &cancel).await.unwrap();
    assert_eq!(outcomes(&report), ["updated"]);
    assert_eq!(tracker.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn remote_edits_are_reported_as_conflicts() {
    let tracker = FakeTracker::new();
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine(tracker.clone(), store.clone());
    let cancel = CancellationToken::new();

    let first = engine
        .synchronize(mapped(json!({ "tasks": [{ "title": "Fix bug" }] })), &cancel)
        .await
        .unwrap();
    let remote_id = first.entries[0].outcome.remote().unwrap().id.clone();
    tracker.edit_remotely(&remote_id);

    let changed = mapped(json!({ "tasks": [{ "title": "Fix bug", "description": "local" }] }));
    let report = engine.synchronize(changed, &cancel).await.unwrap();

    match &report.entries[0].outcome {
        SyncOutcome::Failed {
            error: IssueSyncError::Conflict(conflict),
        } => {
            assert_eq!(conflict.remote_id, remote_id);
            assert_eq!(conflict.expected.as_str(), "r1");
            assert_eq!(conflict.found.as_ref().map(|r| r.as_str()), Some("r2"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(tracker.updates(), 0);
    assert_eq!(tracker.issue(&remote_id).unwrap().payload.description, "");
}

#[tokio::test(start_paused = true)]
async fn cancelled_runs_touch_nothing() {
    let tracker = FakeTracker::new();
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine(tracker.clone(), store.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine.synchronize(mapped(three_tasks()), &cancel).await.unwrap();

    assert_eq!(outcomes(&report), ["cancelled", "cancelled", "cancelled"]);
    assert_eq!(report.cancelled(), 3);
    assert_eq!(tracker.creates(), 0);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelling_an_in_flight_create_leaves_it_pending() {
    let tracker = FakeTracker::new();
    tracker.delay_creates(Duration::from_secs(1));
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine(tracker.clone(), store.clone());
    let issues = mapped(json!({ "tasks": [{ "title": "Fix bug" }] }));
    let fingerprint = issues[0].fingerprint.clone();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let report = engine.synchronize(issues.clone(), &cancel).await.unwrap();

    assert_eq!(outcomes(&report), ["cancelled"]);
    assert_eq!(tracker.creates(), 0);
    let record = store.get(&fingerprint).await.unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Pending);
    assert!(record.remote_id.is_none());

    let rerun = engine
        .synchronize(issues, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcomes(&rerun), ["created"]);
    assert_eq!(tracker.creates(), 1);
    let record = store.get(&fingerprint).await.unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Created);
}

#[tokio::test(start_paused = true)]
async fn slow_revision_reads_do_not_repeat_the_create() {
    let tracker = FakeTracker::new();
    tracker.delay_revisions(Duration::from_secs(60));
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine(tracker.clone(), store.clone());
    let issues = mapped(json!({ "tasks": [{ "title": "Fix bug" }] }));
    let fingerprint = issues[0].fingerprint.clone();

    let report = engine
        .synchronize(issues, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcomes(&report), ["created"]);
    assert_eq!(tracker.creates(), 1);
    assert_eq!(tracker.revision_reads(), 3);
    let record = store.get(&fingerprint).await.unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Created);
    assert!(record.remote_id.is_some());
    assert!(record.remote_revision.is_none());
}

#[tokio::test(start_paused = true)]
async fn writes_record_the_revision_read_afterwards() {
    let tracker = FakeTracker::new();
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine(tracker.clone(), store.clone());
    let cancel = CancellationToken::new();

    let original = mapped(json!({ "tasks": [{ "title": "Fix bug" }] }));
    let fingerprint = original[0].fingerprint.clone();
    engine.synchronize(original, &cancel).await.unwrap();
    let record = store.get(&fingerprint).await.unwrap().unwrap();
    assert_eq!(record.remote_revision.unwrap().as_str(), "r1");

    let changed = mapped(json!({ "tasks": [{ "title": "Fix bug", "description": "now" }] }));
    engine.synchronize(changed, &cancel).await.unwrap();
    let record = store.get(&fingerprint).await.unwrap().unwrap();
    assert_eq!(record.remote_revision.unwrap().as_str(), "r2");
}

#[tokio::test(start_paused = true)]
async fn duplicate_entries_create_one_issue() {
    let tracker = FakeTracker::new();
    let engine = engine(tracker.clone(), Arc::new(MemoryRecordStore::new()));

    let report = engine
        .synchronize(
            mapped(json!({ "tasks": [{ "title": "Fix bug" }, { "title": "Fix  bug " }] })),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.created(), 1);
    assert_eq!(report.skipped(), 1);
    assert_eq!(tracker.creates(), 1);
}

struct BrokenStore;

#[async_trait]
impl SyncRecordStore for BrokenStore {
    async fn get(&self, _: &Fingerprint) -> Result<Option<SyncRecord>, StoreError> {
        Ok(None)
    }

    async fn upsert(&self, _: SyncRecord) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }

    async fn list(&self) -> Result<Vec<SyncRecord>, StoreError> {
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn store_failure_aborts_the_run_before_any_create() {
    let tracker = FakeTracker::new();
    let engine = engine(tracker.clone(), Arc::new(BrokenStore));

    let err = engine
        .synchronize(mapped(three_tasks()), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Store(StoreError::Io(_))));
    assert_eq!(tracker.creates(), 0);
}
