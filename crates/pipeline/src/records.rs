//! Durable synchronization state, one [`SyncRecord`] per fingerprint.
//!
//! Records are owned by the sync engine and persisted through a
//! [`crate::ports::SyncRecordStore`] so that re-running a synchronization
//! after a crash never creates an issue twice.

use serde::{Deserialize, Serialize};

use crate::{ContentHash, Fingerprint, IssueKey, RemoteIssueId, RemoteRevision, Timestamp};

/// Lifecycle of a record.
///
/// ```text
///   (none) ──► Pending ──► Created ◄──┐
///                 │                   │ update
///                 ▼                   │
///               Failed ──► Pending ───┘ (retry create)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// A create was started but its outcome was never recorded.
    Pending,
    /// The remote issue exists and `remote_id` identifies it.
    Created,
    /// The last create failed definitively; the next run retries it.
    Failed,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Created => f.write_str("created"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// What the engine knows about one logical issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub fingerprint: Fingerprint,
    pub status: SyncStatus,
    /// Set once the issue exists remotely.
    pub remote_id: Option<RemoteIssueId>,
    pub remote_key: Option<IssueKey>,
    /// Hash of the payload last pushed successfully.
    pub content_hash: Option<ContentHash>,
    /// Remote revision observed right after the last successful write.
    pub remote_revision: Option<RemoteRevision>,
    /// Summary at the time of the last write, for listings.
    pub summary: String,
    /// Cause of the last failure, when `status` is [`SyncStatus::Failed`].
    pub last_error: Option<String>,
    pub updated_at: Timestamp,
}

impl SyncRecord {
    /// A record for a create that is about to be attempted.
    pub fn pending(fingerprint: Fingerprint, summary: impl Into<String>) -> Self {
        Self {
            fingerprint,
            status: SyncStatus::Pending,
            remote_id: None,
            remote_key: None,
            content_hash: None,
            remote_revision: None,
            summary: summary.into(),
            last_error: None,
            updated_at: Timestamp::now(),
        }
    }

    /// Marks the record as created remotely with the given payload hash.
    #[must_use]
    pub fn created(
        mut self,
        remote_id: RemoteIssueId,
        remote_key: Option<IssueKey>,
        content_hash: ContentHash,
        remote_revision: Option<RemoteRevision>,
    ) -> Self {
        self.status = SyncStatus::Created;
        self.remote_id = Some(remote_id);
        self.remote_key = remote_key;
        self.content_hash = Some(content_hash);
        self.remote_revision = remote_revision;
        self.last_error = None;
        self.updated_at = Timestamp::now();
        self
    }

    /// Refreshes hash and revision after a successful update.
    #[must_use]
    pub fn updated(
        mut self,
        summary: impl Into<String>,
        content_hash: ContentHash,
        remote_revision: Option<RemoteRevision>,
    ) -> Self {
        self.summary = summary.into();
        self.content_hash = Some(content_hash);
        self.remote_revision = remote_revision;
        self.last_error = None;
        self.updated_at = Timestamp::now();
        self
    }

    /// Records the revision read back after the last write.
    #[must_use]
    pub fn observed(mut self, remote_revision: Option<RemoteRevision>) -> Self {
        self.remote_revision = remote_revision;
        self.updated_at = Timestamp::now();
        self
    }

    /// Marks a create as definitively failed.
    #[must_use]
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.status = SyncStatus::Failed;
        self.last_error = Some(reason.into());
        self.updated_at = Timestamp::now();
        self
    }

    /// `true` when the stored hash equals `hash` on a created issue.
    pub fn is_current(&self, hash: &ContentHash) -> bool {
        self.status == SyncStatus::Created && self.content_hash.as_ref() == Some(hash)
    }
}
