//! Orchestration for Tasksmith.
//!
//! This crate sequences calls between the pure domain in [`pipeline`] and the
//! infrastructure behind its port traits:
//!
//! - [`sync_engine`]: idempotent, resumable synchronization of mapped issues
//!   into the tracker, with bounded concurrency, retries, and cancellation.
//! - [`session`]: the collaboration session state machine and review gate.
//! - [`workflow`]: generate → validate → map, then review → commit.
//! - [`retry`]: bounded exponential back-off shared by every external call.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Nothing here talks to the network or the file
//! system directly; every collaborator arrives as an `Arc<dyn Port>`. There
//! are no domain rules of its own beyond ordering and failure handling.

pub mod retry;
pub mod session;
pub mod sync_engine;
pub mod workflow;

pub use retry::{retry, RetryError, RetrySchedule, Retried, Retryable};
pub use session::{
    ApprovalOutcome, CoordinatorSettings, EndReason, SessionCoordinator, SessionEvent,
    SessionSnapshot, SessionState, SessionSubscription,
};
pub use sync_engine::{
    IssueReport, RemoteRef, SyncEngine, SyncError, SyncOutcome, SyncReport, SyncSettings,
};
pub use workflow::{
    BacklogWorkflow, CommitReport, PlannedBacklog, ReviewGate, WorkflowError, WorkflowSettings,
};
