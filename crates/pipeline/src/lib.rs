//! Core domain for Tasksmith.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, pure component, and port trait used to turn generative output into
//! tracker issues. Infrastructure crates implement the traits defined here;
//! they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ProjectKey`, `RemoteIssueId`, `Fingerprint`, etc.) |
//! | [`types`] | Shared value types (`StoryPoints`, `Timestamp`) |
//! | [`task`] | Backlog model (`Task`, `TaskBacklog`, `IssueType`, `Priority`) |
//! | [`validator`] | Schema validation of untrusted output (`validate`, `SchemaError`) |
//! | [`mapper`] | Tracker payloads and fingerprints (`Mapper`, `MappedIssue`) |
//! | [`records`] | Durable sync state (`SyncRecord`, `SyncStatus`) |
//! | [`review`] | Session participants, verdicts, approval policies |
//! | [`ports`] | Traits implemented by infrastructure crates |
//! | [`errors`] | Cross-crate error and retry-policy types |

pub mod errors;
pub mod identifiers;
pub mod mapper;
pub mod ports;
pub mod records;
pub mod review;
pub mod task;
pub mod types;
pub mod validator;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{
    ConfigError, GenerationError, IssueSyncError, RetryPolicy, StoreError, SyncConflictError,
    SyncOperation, TrackerApiError, TransportError,
};
pub use identifiers::{
    ContentHash, CustomFieldId, Fingerprint, IssueKey, PeerId, ProjectKey, RemoteIssueId,
    RemoteRevision, SessionId, SyncRunId,
};
pub use mapper::{fingerprint_of, IssuePayload, MappedIssue, Mapper, MapperConfig, MappingError};
pub use ports::{
    BacklogGenerator, BacklogPrompt, CollabSession, CollaborationApi, CollaborationProvider,
    IssueTracker, NoCollaboration, RemoteIssue, SessionRef, SyncRecordStore, TransportEvent,
};
pub use records::{SyncRecord, SyncStatus};
pub use review::{ApprovalPolicy, Peer, ReviewDecision, ReviewSignal, ReviewState, Role, Verdict};
pub use task::{IssueType, Priority, Task, TaskBacklog};
pub use types::{StoryPoints, Timestamp};
pub use validator::{validate, validate_with, FieldViolation, SchemaError, ValidationLimits};
