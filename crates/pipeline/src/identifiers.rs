//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`RemoteIssueId`] with a [`SessionId`] even though both are strings under
//! the hood.
//!
//! Two identifiers are *derived* rather than assigned: [`Fingerprint`] (the
//! idempotency key of a backlog entry) and [`ContentHash`] (the digest of the
//! payload last pushed to the tracker). Both are lowercase hex SHA-256 digests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for SHA-256 digest newtypes.
// Generates: struct, from_hex() validating the encoding, as_str(), short(), Display.
// ---------------------------------------------------------------------------
macro_rules! digest_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parses a 64-character lowercase hex digest.
            ///
            /// Returns `None` for any other length or alphabet.
            pub fn from_hex(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                let valid = v.len() == 64
                    && v.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
                if valid { Some(Self(v)) } else { None }
            }

            fn from_hasher(hasher: Sha256) -> Self {
                Self(hex::encode(hasher.finalize()))
            }

            /// Returns the full hex digest.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns the first 12 hex characters, for log lines and tables.
            pub fn short(&self) -> &str {
                &self.0[..12]
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::from_hex(value.clone())
                    .ok_or_else(|| format!("'{value}' is not a 64-character hex digest"))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: tracker-assigned
// ---------------------------------------------------------------------------

string_id! {
    /// The tracker's project key (e.g. `"PROJ"`) that issues are created in.
    ProjectKey
}

string_id! {
    /// The tracker's stable internal identifier for an issue (Jira: numeric id
    /// such as `"10042"`). Used as the remote id of a sync record.
    RemoteIssueId
}

string_id! {
    /// The human-facing issue key (Jira: `"PROJ-17"`).
    IssueKey
}

string_id! {
    /// Opaque marker of the remote issue's last modification (Jira: the
    /// `fields.updated` timestamp string).
    ///
    /// Compared verbatim to detect out-of-band edits; never parsed.
    RemoteRevision
}

string_id! {
    /// Identifier of a tracker custom field (e.g. `"customfield_10016"`).
    CustomFieldId
}

// ---------------------------------------------------------------------------
// Identifiers: collaboration
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a collaborative review session.
    ///
    /// Doubles as the session reference a guest uses to join.
    SessionId
}

string_id! {
    /// Identifies a participant of a collaborative review session.
    PeerId
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single synchronization run.
///
/// Generated fresh for every call to the sync engine; propagated through spans
/// so all activity from a single run can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRunId(Uuid);

impl SyncRunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`SyncRunId`] from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: derived digests
// ---------------------------------------------------------------------------

digest_id! {
    /// Stable identity of a backlog entry across synchronization runs.
    ///
    /// Derived from `(project name, title, effective issue type)`. Two tasks with
    /// the same fingerprint are the same logical issue; the sync engine uses it
    /// as the idempotency key.
    Fingerprint
}

digest_id! {
    /// Digest of the canonical tracker payload last pushed for a fingerprint.
    ///
    /// A changed hash on an already-created issue means the issue must be
    /// updated; an unchanged hash means the entry is already synchronized.
    ContentHash
}

impl Fingerprint {
    /// Derives a fingerprint from its defining fields.
    ///
    /// Fields are length-prefixed so that no two distinct inputs share an
    /// encoding; an absent project name hashes differently from an empty one.
    pub fn derive(project_name: Option<&str>, title: &str, issue_type: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"tasksmith.fingerprint.v1");
        match project_name {
            Some(name) => {
                hasher.update([1u8]);
                write_field(&mut hasher, name);
            }
            None => hasher.update([0u8]),
        }
        write_field(&mut hasher, title);
        write_field(&mut hasher, issue_type);
        Self::from_hasher(hasher)
    }
}

impl ContentHash {
    /// Hashes a canonical byte encoding of a payload.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self::from_hasher(hasher)
    }
}

fn write_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}
