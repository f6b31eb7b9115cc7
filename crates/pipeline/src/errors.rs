//! Error and retry-policy types shared across the Tasksmith domain.
//!
//! Component-level errors that belong to exactly one pure component live next
//! to it ([`crate::validator::SchemaError`], [`crate::mapper::MappingError`]).
//! The types here cross crate boundaries: infrastructure adapters produce them,
//! the orchestration layer interprets them.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Fingerprint, RemoteIssueId, RemoteRevision, SessionId};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by infrastructure error types to let the orchestrator decide
/// whether to re-invoke an operation.
///
/// - `Retryable` errors: timeouts, connection failures, 5xx and 429 responses.
/// - `NonRetryable` errors: 4xx validation rejections, undecodable responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt (e.g. from a `Retry-After`
        /// header). `None` means apply the caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The runtime configuration is invalid.
///
/// Produced at load time; nothing runs with an invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Configuration error: {message}")]
pub struct ConfigError {
    /// Description of the configuration problem.
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Issue tracker
// ---------------------------------------------------------------------------

/// A call to the issue tracker failed.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum TrackerApiError {
    /// No response arrived within the per-call timeout.
    #[error("tracker request timed out after {0:?}")]
    Timeout(Duration),

    /// The request never produced an HTTP response (DNS, connect, reset).
    #[error("tracker unreachable: {0}")]
    Network(String),

    /// Transient server-side failure (5xx) or throttling (429).
    #[error("tracker returned {status}: {body}")]
    Server {
        status: u16,
        body: String,
        /// Delay requested by the tracker, if any.
        retry_after: Option<Duration>,
    },

    /// The tracker refused the request (4xx other than 429).
    #[error("tracker rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The tracker answered with a body that does not match its contract.
    #[error("tracker response could not be decoded: {0}")]
    Decode(String),
}

impl TrackerApiError {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Timeout(_) | Self::Network(_) => RetryPolicy::Retryable { after: None },
            Self::Server { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::Rejected { .. } | Self::Decode(_) => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Collaboration transport
// ---------------------------------------------------------------------------

/// Collaboration connectivity failed.
///
/// Any transport error on an active session forces it to end; the system then
/// degrades to single-user commit mode.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransportError {
    /// No collaboration API is available in this environment.
    #[error("collaboration is unavailable")]
    Unavailable,

    /// The connection to the session has been closed.
    #[error("collaboration connection closed")]
    ConnectionClosed,

    /// The handshake did not complete in time.
    #[error("collaboration handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The referenced session does not exist (or has already ended).
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The operation is not valid in the coordinator's current state.
    #[error("cannot {action} while the session is {state}")]
    InvalidState { action: String, state: String },
}

// ---------------------------------------------------------------------------
// Sync records
// ---------------------------------------------------------------------------

/// The sync-record store could not be read or written.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sync record store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sync record store is corrupt: {0}")]
    Corrupt(String),
}

// ---------------------------------------------------------------------------
// Generative service
// ---------------------------------------------------------------------------

/// The generative service did not return usable structured output.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum GenerationError {
    #[error("generative service timed out after {0:?}")]
    Timeout(Duration),

    #[error("generative service unreachable: {0}")]
    Network(String),

    #[error("generative service returned {status}: {body}")]
    Http { status: u16, body: String },

    /// The response contained no parseable JSON document.
    #[error("generative service output is not JSON: {0}")]
    MalformedOutput(String),

    #[error("generative service is not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Timeout(_) | Self::Network(_) => RetryPolicy::Retryable { after: None },
            Self::Http { status, .. } if *status == 429 || *status >= 500 => {
                RetryPolicy::Retryable { after: None }
            }
            _ => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-issue synchronization failures
// ---------------------------------------------------------------------------

/// The tracker operation attempted for an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    /// Fetching the remote revision before an update.
    Inspect,
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
            Self::Inspect => f.write_str("inspect"),
        }
    }
}

/// The remote issue was modified since the last synchronization.
///
/// Reported to the caller; the remote issue is not overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error(
    "issue {remote_id} ({fingerprint}) was modified outside Tasksmith: expected revision {expected}, found {}",
    .found.as_ref().map_or("none", RemoteRevision::as_str)
)]
pub struct SyncConflictError {
    pub fingerprint: Fingerprint,
    pub remote_id: RemoteIssueId,
    pub expected: RemoteRevision,
    pub found: Option<RemoteRevision>,
}

/// Why one issue of a sync run failed.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum IssueSyncError {
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Tracker {
        operation: SyncOperation,
        attempts: u32,
        #[source]
        source: TrackerApiError,
    },

    #[error(transparent)]
    Conflict(#[from] SyncConflictError),
}

impl IssueSyncError {
    /// The operation that was being attempted when the failure occurred.
    pub fn operation(&self) -> SyncOperation {
        match self {
            Self::Tracker { operation, .. } => *operation,
            Self::Conflict(_) => SyncOperation::Update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_errors_classify_retryability() {
        assert!(TrackerApiError::Timeout(Duration::from_secs(1))
            .retry_policy()
            .is_retryable());
        assert_eq!(
            TrackerApiError::Server {
                status: 429,
                body: String::new(),
                retry_after: Some(Duration::from_secs(3)),
            }
            .retry_policy(),
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(3))
            }
        );
        assert_eq!(
            TrackerApiError::Rejected {
                status: 400,
                body: "summary required".into()
            }
            .retry_policy(),
            RetryPolicy::NonRetryable
        );
    }

    #[test]
    fn generation_errors_classify_retryability() {
        let server = GenerationError::Http {
            status: 503,
            body: String::new(),
        };
        assert!(server.retry_policy().is_retryable());
        let auth = GenerationError::Http {
            status: 401,
            body: String::new(),
        };
        assert!(!auth.retry_policy().is_retryable());
    }

    #[test]
    fn conflict_message_names_both_revisions() {
        let err = SyncConflictError {
            fingerprint: Fingerprint::derive(None, "t", "Task"),
            remote_id: RemoteIssueId::new("10001").unwrap(),
            expected: RemoteRevision::new("r1").unwrap(),
            found: RemoteRevision::new("r2"),
        };
        let message = err.to_string();
        assert!(message.contains("expected revision r1"));
        assert!(message.contains("found r2"));
    }
}
