//! Port traits implemented by infrastructure crates.
//!
//! The orchestration layer depends only on these traits. Every component
//! receives its collaborators explicitly at construction (`Arc<dyn Trait>`), so
//! tests substitute in-process fakes and no component reaches for a shared
//! global client.
//!
//! | Port | Implemented by |
//! |------|----------------|
//! | [`BacklogGenerator`] | `llm` |
//! | [`IssueTracker`] | `jira` |
//! | [`SyncRecordStore`] | `store` |
//! | [`CollaborationApi`] / [`CollabSession`] | `collab` |

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::review::{Peer, ReviewSignal, Role};
use crate::validator::FieldViolation;
use crate::{
    Fingerprint, GenerationError, IssueKey, IssuePayload, PeerId, RemoteIssueId, RemoteRevision,
    SessionId, StoreError, SyncRecord, TrackerApiError, TransportError,
};

// ---------------------------------------------------------------------------
// Generative service
// ---------------------------------------------------------------------------

/// A request for a backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogPrompt {
    /// Free-text description of the work, as entered by the user.
    pub description: String,
    /// Violations of the previous attempt, when re-prompting.
    pub previous_violations: Vec<FieldViolation>,
}

impl BacklogPrompt {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            previous_violations: Vec::new(),
        }
    }

    /// A follow-up prompt that reports what was wrong with the last answer.
    #[must_use]
    pub fn with_violations(mut self, violations: Vec<FieldViolation>) -> Self {
        self.previous_violations = violations;
        self
    }
}

/// Produces structured (but untrusted) backlog data from a prompt.
///
/// The returned value must still pass [`crate::validator::validate`].
#[async_trait]
pub trait BacklogGenerator: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &BacklogPrompt) -> Result<Value, GenerationError>;
}

// ---------------------------------------------------------------------------
// Issue tracker
// ---------------------------------------------------------------------------

/// An issue as identified by the tracker after a create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIssue {
    pub id: RemoteIssueId,
    pub key: Option<IssueKey>,
}

/// Write access to the external issue tracker.
///
/// Each write method issues exactly one remote write and nothing else, so a
/// caller's timeout and retry budget apply to the write alone. Revisions are
/// read separately through [`IssueTracker::issue_revision`].
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Creates an issue and returns its remote identity.
    async fn create_issue(&self, payload: &IssuePayload) -> Result<RemoteIssue, TrackerApiError>;

    /// Overwrites the mutable fields of an existing issue.
    ///
    /// The project and issue type of an existing issue are left alone.
    async fn update_issue(
        &self,
        id: &RemoteIssueId,
        payload: &IssuePayload,
    ) -> Result<(), TrackerApiError>;

    /// Current revision of an issue, used to detect out-of-band edits.
    async fn issue_revision(
        &self,
        id: &RemoteIssueId,
    ) -> Result<Option<RemoteRevision>, TrackerApiError>;
}

// ---------------------------------------------------------------------------
// Sync records
// ---------------------------------------------------------------------------

/// Durable fingerprint-keyed storage for [`SyncRecord`]s.
///
/// Implementations must make an `upsert` durable before returning.
#[async_trait]
pub trait SyncRecordStore: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<SyncRecord>, StoreError>;

    async fn upsert(&self, record: SyncRecord) -> Result<(), StoreError>;

    /// Every record, ordered by fingerprint.
    async fn list(&self) -> Result<Vec<SyncRecord>, StoreError>;
}

// ---------------------------------------------------------------------------
// Collaboration transport
// ---------------------------------------------------------------------------

/// Reference a guest uses to join a shared session.
pub type SessionRef = SessionId;

/// A change pushed by the collaboration transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PeerJoined(Peer),
    PeerLeft(PeerId),
    /// A verdict sent by another participant.
    Signal { from: PeerId, signal: ReviewSignal },
    /// The host closed the session.
    SessionClosed,
}

/// The local end of an established collaboration session.
#[async_trait]
pub trait CollabSession: Send + Sync {
    fn session_id(&self) -> &SessionId;

    fn role(&self) -> Role;

    fn local_peer(&self) -> &Peer;

    fn host(&self) -> &PeerId;

    /// Current roster, host first.
    async fn peers(&self) -> Result<Vec<Peer>, TransportError>;

    /// Waits for the next change. An error means connectivity is lost for good.
    async fn next_event(&self) -> Result<TransportEvent, TransportError>;

    /// Broadcasts a verdict to every other participant.
    async fn send_signal(&self, signal: &ReviewSignal) -> Result<(), TransportError>;

    /// Leaves the session; a host leaving closes it for everyone.
    ///
    /// May be called more than once, and must be a no-op after the first call.
    async fn leave(&self) -> Result<(), TransportError>;
}

/// Entry point of a collaboration transport.
#[async_trait]
pub trait CollaborationApi: Send + Sync {
    /// Starts a new session hosted by the local participant.
    async fn share(&self) -> Result<Arc<dyn CollabSession>, TransportError>;

    /// Joins an existing session as a guest.
    async fn join(&self, session: &SessionRef) -> Result<Arc<dyn CollabSession>, TransportError>;
}

/// Discovers the collaboration transport, if the environment has one.
pub trait CollaborationProvider: Send + Sync {
    fn get_api(&self) -> Option<Arc<dyn CollaborationApi>>;
}

/// A provider for environments without collaboration support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCollaboration;

impl CollaborationProvider for NoCollaboration {
    fn get_api(&self) -> Option<Arc<dyn CollaborationApi>> {
        None
    }
}
