//! Collaborative review: participants, verdicts, and approval policies.
//!
//! Review state is ephemeral. It lives inside one collaboration session and
//! is discarded when the session ends; it is never persisted next to the sync
//! records.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Fingerprint, PeerId};

/// Role of the local participant in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Guest,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Guest => f.write_str("guest"),
        }
    }
}

/// A session participant. Identity only; never owns backlog content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub display_name: Option<String>,
}

impl Peer {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            display_name: None,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// A participant's decision on one backlog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Reject,
}

/// A verdict as carried between peers by the collaboration transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSignal {
    pub fingerprint: Fingerprint,
    pub verdict: Verdict,
}

/// Who must approve an entry before it may be committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// The host's verdict decides.
    #[default]
    HostOnly,
    /// Every participant currently in the roster must approve; any rejection
    /// rejects.
    Unanimous,
}

/// Outcome of evaluating a policy over a set of entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    /// At least one entry still lacks the verdicts the policy requires.
    Pending { undecided: Vec<Fingerprint> },
    /// Every entry is decided.
    Decided {
        approved: Vec<Fingerprint>,
        rejected: Vec<Fingerprint>,
    },
}

/// Verdicts recorded during one session, per entry and participant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewState {
    verdicts: BTreeMap<Fingerprint, BTreeMap<PeerId, Verdict>>,
}

impl ReviewState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `peer`'s verdict on `fingerprint`, replacing an earlier one.
    pub fn record(&mut self, peer: PeerId, fingerprint: Fingerprint, verdict: Verdict) {
        self.verdicts
            .entry(fingerprint)
            .or_default()
            .insert(peer, verdict);
    }

    pub fn verdict_of(&self, fingerprint: &Fingerprint, peer: &PeerId) -> Option<Verdict> {
        self.verdicts.get(fingerprint)?.get(peer).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    /// Evaluates `policy` for `entries` given the current `roster`.
    ///
    /// Verdicts from peers no longer in the roster are ignored under
    /// [`ApprovalPolicy::Unanimous`]. Duplicate entries are evaluated once.
    pub fn evaluate(
        &self,
        policy: ApprovalPolicy,
        entries: &[Fingerprint],
        host: &PeerId,
        roster: &[Peer],
    ) -> ReviewDecision {
        let mut seen = BTreeSet::new();
        let mut approved = Vec::new();
        let mut rejected = Vec::new();
        let mut undecided = Vec::new();

        for fingerprint in entries {
            if !seen.insert(fingerprint) {
                continue;
            }
            let decision = match policy {
                ApprovalPolicy::HostOnly => self.verdict_of(fingerprint, host),
                ApprovalPolicy::Unanimous => self.unanimous(fingerprint, roster),
            };
            match decision {
                Some(Verdict::Approve) => approved.push(fingerprint.clone()),
                Some(Verdict::Reject) => rejected.push(fingerprint.clone()),
                None => undecided.push(fingerprint.clone()),
            }
        }

        if undecided.is_empty() {
            ReviewDecision::Decided { approved, rejected }
        } else {
            ReviewDecision::Pending { undecided }
        }
    }

    fn unanimous(&self, fingerprint: &Fingerprint, roster: &[Peer]) -> Option<Verdict> {
        let mut all_approved = !roster.is_empty();
        for peer in roster {
            match self.verdict_of(fingerprint, &peer.id) {
                Some(Verdict::Reject) => return Some(Verdict::Reject),
                Some(Verdict::Approve) => {}
                None => all_approved = false,
            }
        }
        all_approved.then_some(Verdict::Approve)
    }
}
