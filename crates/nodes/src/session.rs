//! Collaboration session coordinator.
//!
//! Owns the lifecycle of at most one collaboration session at a time:
//!
//! ```text
//!   Idle ──host()──► Hosting ──┐
//!     ▲                        ├──► Active ──► Ended ──reset()──► Idle
//!     └──join()────► Joining ──┘                 ▲
//!                       │  handshake failure     │
//!                       └────────────────────────┘
//! ```
//!
//! Transport events are pumped by a background task and applied to the roster
//! and review state as they arrive. Observers receive them through a
//! [`SessionSubscription`]; its channel closes when the session ends so no
//! listener outlives the session it was registered on.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pipeline::{
    ApprovalPolicy, CollabSession, CollaborationApi, CollaborationProvider, Fingerprint, Peer,
    PeerId, ReviewDecision, ReviewSignal, ReviewState, Role, SessionId, SessionRef,
    TransportError, TransportEvent, Verdict,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Hosting,
    Joining,
    Active,
    Ended,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Hosting => "hosting",
            Self::Joining => "joining",
            Self::Active => "active",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Why a session reached [`SessionState::Ended`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The local participant ended it.
    Closed,
    /// The host left or closed the session.
    HostLeft,
    /// The transport reported an unrecoverable error.
    TransportLost,
    /// Hosting or joining never completed.
    HandshakeFailed,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::HostLeft => "host left",
            Self::TransportLost => "transport lost",
            Self::HandshakeFailed => "handshake failed",
        };
        f.write_str(s)
    }
}

/// A change observable through [`SessionCoordinator::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    PeerJoined(Peer),
    PeerLeft(PeerId),
    VerdictRecorded {
        peer: PeerId,
        fingerprint: Fingerprint,
        verdict: Verdict,
    },
    Ended(EndReason),
}

/// Identity and roster of the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub role: Role,
    pub local: Peer,
    pub host: PeerId,
    /// Current participants, host first.
    pub roster: Vec<Peer>,
}

/// Result of waiting for commit approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// No session was running; the caller commits alone.
    Unrestricted,
    Decided {
        approved: Vec<Fingerprint>,
        rejected: Vec<Fingerprint>,
    },
    /// The session ended while waiting; the caller degrades to single-user.
    SessionEnded(EndReason),
    /// The wait elapsed with entries still undecided.
    TimedOut { undecided: Vec<Fingerprint> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub policy: ApprovalPolicy,
    /// Bound for share/join, the initial roster fetch, and leave.
    pub handshake_timeout: Duration,
    /// Events buffered per subscriber before the oldest are dropped.
    pub event_capacity: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            policy: ApprovalPolicy::HostOnly,
            handshake_timeout: Duration::from_secs(15),
            event_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A stream of [`SessionEvent`]s for one session.
///
/// Ends (returns `None`) after the session's final events. Dropping it
/// unsubscribes.
#[derive(Debug)]
pub struct SessionSubscription {
    rx: broadcast::Receiver<SessionEvent>,
}

impl SessionSubscription {
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Session subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already delivered event without waiting.
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Session subscriber lagged; events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Live {
    transport: Arc<dyn CollabSession>,
    snapshot: SessionSnapshot,
    review: ReviewState,
    pump: Option<JoinHandle<()>>,
}

struct Inner {
    state: SessionState,
    /// Bumped on every host/join so stale tasks can recognise themselves.
    generation: u64,
    events: Option<broadcast::Sender<SessionEvent>>,
    live: Option<Live>,
    ended: Option<EndReason>,
}

impl Inner {
    fn publish(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            // No receivers is fine.
            let _ = tx.send(event);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.publish(SessionEvent::StateChanged(state));
    }

    fn is_running(&self, generation: u64) -> bool {
        self.generation == generation
            && !matches!(self.state, SessionState::Idle | SessionState::Ended)
    }
}

enum Flow {
    Continue,
    Stop,
    End(EndReason),
}

struct Shared {
    inner: Mutex<Inner>,
    /// Ticks on every change that could affect an approval decision.
    changes: watch::Sender<u64>,
}

impl Shared {
    fn notify(&self) {
        self.changes.send_modify(|tick| *tick = tick.wrapping_add(1));
    }

    /// Moves session `generation` to `Ended`, returning what must be torn down.
    fn finish(
        &self,
        generation: u64,
        reason: EndReason,
    ) -> Option<(Arc<dyn CollabSession>, Option<JoinHandle<()>>)> {
        let live = {
            let mut inner = self.inner.lock();
            if !inner.is_running(generation) {
                return None;
            }
            let live = inner.live.take();
            inner.ended = Some(reason);
            inner.publish(SessionEvent::Ended(reason));
            inner.set_state(SessionState::Ended);
            // Dropping the sender closes every subscription after the final events.
            inner.events = None;
            live
        };
        self.notify();
        tracing::info!(%reason, "Collaboration session ended");
        live.map(|live| (live.transport, live.pump))
    }

    fn apply(&self, generation: u64, event: TransportEvent) -> Flow {
        let flow = {
            let mut inner = self.inner.lock();
            if !inner.is_running(generation) {
                return Flow::Stop;
            }
            let Some(live) = inner.live.as_mut() else {
                return Flow::Stop;
            };

            let (published, flow) = match event {
                TransportEvent::PeerJoined(peer) => {
                    if !live.snapshot.roster.iter().any(|p| p.id == peer.id) {
                        live.snapshot.roster.push(peer.clone());
                    }
                    tracing::info!(peer = %peer, "Peer joined");
                    (Some(SessionEvent::PeerJoined(peer)), Flow::Continue)
                }
                TransportEvent::PeerLeft(id) => {
                    live.snapshot.roster.retain(|p| p.id != id);
                    tracing::info!(peer = %id, "Peer left");
                    let host_left =
                        live.snapshot.role == Role::Guest && id == live.snapshot.host;
                    let flow = if host_left {
                        Flow::End(EndReason::HostLeft)
                    } else {
                        Flow::Continue
                    };
                    (Some(SessionEvent::PeerLeft(id)), flow)
                }
                TransportEvent::Signal { from, signal } => {
                    live.review
                        .record(from.clone(), signal.fingerprint.clone(), signal.verdict);
                    tracing::debug!(
                        peer = %from,
                        fingerprint = signal.fingerprint.short(),
                        verdict = ?signal.verdict,
                        "Remote verdict recorded"
                    );
                    let event = SessionEvent::VerdictRecorded {
                        peer: from,
                        fingerprint: signal.fingerprint,
                        verdict: signal.verdict,
                    };
                    (Some(event), Flow::Continue)
                }
                TransportEvent::SessionClosed => {
                    let reason = match live.snapshot.role {
                        Role::Guest => EndReason::HostLeft,
                        Role::Host => EndReason::Closed,
                    };
                    (None, Flow::End(reason))
                }
            };
            if let Some(event) = published {
                inner.publish(event);
            }
            flow
        };
        self.notify();

        match flow {
            Flow::End(reason) => {
                self.finish(generation, reason);
                Flow::Stop
            }
            other => other,
        }
    }
}

async fn pump(shared: Arc<Shared>, generation: u64, transport: Arc<dyn CollabSession>) {
    loop {
        let event = match transport.next_event().await {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(error = %error, "Collaboration transport failed");
                shared.finish(generation, EndReason::TransportLost);
                return;
            }
        };
        match shared.apply(generation, event) {
            Flow::Continue => {}
            Flow::Stop | Flow::End(_) => return,
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Drives hosting, joining, review, and teardown of a collaboration session.
pub struct SessionCoordinator {
    api: Option<Arc<dyn CollaborationApi>>,
    settings: CoordinatorSettings,
    shared: Arc<Shared>,
}

impl SessionCoordinator {
    /// Creates an idle coordinator. The collaboration API is discovered once.
    pub fn new(provider: &dyn CollaborationProvider, settings: CoordinatorSettings) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            api: provider.get_api(),
            settings,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    generation: 0,
                    events: None,
                    live: None,
                    ended: None,
                }),
                changes,
            }),
        }
    }

    pub fn is_available(&self) -> bool {
        self.api.is_some()
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Reason the last session ended, until the next host/join.
    pub fn end_reason(&self) -> Option<EndReason> {
        self.shared.inner.lock().ended
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let inner = self.shared.inner.lock();
        inner.live.as_ref().map(|live| live.snapshot.clone())
    }

    pub fn roster(&self) -> Vec<Peer> {
        self.snapshot().map(|s| s.roster).unwrap_or_default()
    }

    /// Subscribes to the current session's events. `None` when no session is
    /// in progress.
    pub fn subscribe(&self) -> Option<SessionSubscription> {
        let inner = self.shared.inner.lock();
        inner
            .events
            .as_ref()
            .map(|tx| SessionSubscription { rx: tx.subscribe() })
    }

    /// Starts a session hosted by the local participant.
    #[tracing::instrument(skip(self))]
    pub async fn host(&self) -> Result<SessionSnapshot, TransportError> {
        let api = self.api.clone().ok_or(TransportError::Unavailable)?;
        let generation = self.begin(SessionState::Hosting, "host")?;
        let handshake = tokio::time::timeout(self.settings.handshake_timeout, api.share()).await;
        self.establish(generation, handshake).await
    }

    /// Joins the session identified by `session` as a guest.
    #[tracing::instrument(skip(self, session), fields(session_id = %session))]
    pub async fn join(&self, session: &SessionRef) -> Result<SessionSnapshot, TransportError> {
        let api = self.api.clone().ok_or(TransportError::Unavailable)?;
        let generation = self.begin(SessionState::Joining, "join")?;
        let handshake =
            tokio::time::timeout(self.settings.handshake_timeout, api.join(session)).await;
        self.establish(generation, handshake).await
    }

    /// Ends the local session. A host ending closes it for every guest.
    ///
    /// Does nothing when no session is in progress.
    pub async fn end(&self) -> Result<(), TransportError> {
        let generation = {
            let inner = self.shared.inner.lock();
            match inner.state {
                SessionState::Idle | SessionState::Ended => return Ok(()),
                _ => inner.generation,
            }
        };
        let Some((transport, pump)) = self.shared.finish(generation, EndReason::Closed) else {
            return Ok(());
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        match tokio::time::timeout(self.settings.handshake_timeout, transport.leave()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.settings.handshake_timeout)),
        }
    }

    /// Returns an ended coordinator to `Idle` so it can host or join again.
    pub fn reset(&self) -> Result<(), TransportError> {
        {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                SessionState::Idle => return Ok(()),
                SessionState::Ended => {
                    inner.state = SessionState::Idle;
                }
                state => {
                    return Err(TransportError::InvalidState {
                        action: "reset".into(),
                        state: state.to_string(),
                    });
                }
            }
        }
        self.shared.notify();
        Ok(())
    }

    /// Records the local participant's verdict and sends it to every peer.
    pub async fn record_verdict(
        &self,
        fingerprint: Fingerprint,
        verdict: Verdict,
    ) -> Result<(), TransportError> {
        let (generation, transport) = {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Active {
                return Err(TransportError::InvalidState {
                    action: "record a verdict".into(),
                    state: inner.state.to_string(),
                });
            }
            let generation = inner.generation;
            let Some(live) = inner.live.as_mut() else {
                return Err(TransportError::ConnectionClosed);
            };
            let peer = live.snapshot.local.id.clone();
            live.review.record(peer.clone(), fingerprint.clone(), verdict);
            let transport = live.transport.clone();
            inner.publish(SessionEvent::VerdictRecorded {
                peer,
                fingerprint: fingerprint.clone(),
                verdict,
            });
            (generation, transport)
        };
        self.shared.notify();

        let signal = ReviewSignal {
            fingerprint,
            verdict,
        };
        if let Err(error) = transport.send_signal(&signal).await {
            tracing::warn!(error = %error, "Failed to send verdict; ending session");
            if let Some((_, Some(pump))) = self.shared.finish(generation, EndReason::TransportLost)
            {
                pump.abort();
            }
            return Err(error);
        }
        Ok(())
    }

    /// Waits until the approval policy decides every entry, bounded by `wait`.
    pub async fn await_commit_approval(
        &self,
        entries: &[Fingerprint],
        wait: Duration,
    ) -> ApprovalOutcome {
        let mut changes = self.shared.changes.subscribe();
        let deadline = tokio::time::Instant::now() + wait;
        let generation = {
            let inner = self.shared.inner.lock();
            match inner.state {
                SessionState::Idle | SessionState::Ended => return ApprovalOutcome::Unrestricted,
                _ => inner.generation,
            }
        };

        loop {
            changes.borrow_and_update();
            let undecided = {
                let inner = self.shared.inner.lock();
                if !inner.is_running(generation) {
                    let reason = inner.ended.unwrap_or(EndReason::Closed);
                    return ApprovalOutcome::SessionEnded(reason);
                }
                match &inner.live {
                    Some(live) => match live.review.evaluate(
                        self.settings.policy,
                        entries,
                        &live.snapshot.host,
                        &live.snapshot.roster,
                    ) {
                        ReviewDecision::Decided { approved, rejected } => {
                            return ApprovalOutcome::Decided { approved, rejected };
                        }
                        ReviewDecision::Pending { undecided } => undecided,
                    },
                    // Still handshaking.
                    None => entries.to_vec(),
                }
            };

            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return ApprovalOutcome::SessionEnded(EndReason::Closed),
                Err(_) => {
                    tracing::info!(undecided = undecided.len(), "Commit approval timed out");
                    return ApprovalOutcome::TimedOut { undecided };
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn begin(&self, state: SessionState, action: &str) -> Result<u64, TransportError> {
        let generation = {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Idle {
                return Err(TransportError::InvalidState {
                    action: action.to_string(),
                    state: inner.state.to_string(),
                });
            }
            inner.generation += 1;
            inner.ended = None;
            let (tx, _) = broadcast::channel(self.settings.event_capacity.max(1));
            inner.events = Some(tx);
            inner.set_state(state);
            inner.generation
        };
        self.shared.notify();
        Ok(generation)
    }

    async fn establish(
        &self,
        generation: u64,
        handshake: Result<Result<Arc<dyn CollabSession>, TransportError>, tokio::time::error::Elapsed>,
    ) -> Result<SessionSnapshot, TransportError> {
        let timeout = self.settings.handshake_timeout;
        let transport = match handshake {
            Ok(Ok(transport)) => transport,
            Ok(Err(error)) => return Err(self.handshake_failed(generation, error)),
            Err(_) => return Err(self.handshake_failed(generation, TransportError::Timeout(timeout))),
        };

        let roster = match transport.role() {
            Role::Host => vec![transport.local_peer().clone()],
            Role::Guest => match tokio::time::timeout(timeout, transport.peers()).await {
                Ok(Ok(peers)) => peers,
                Ok(Err(error)) => {
                    let _ = transport.leave().await;
                    return Err(self.handshake_failed(generation, error));
                }
                Err(_) => {
                    let _ = transport.leave().await;
                    return Err(self.handshake_failed(generation, TransportError::Timeout(timeout)));
                }
            },
        };

        let snapshot = SessionSnapshot {
            session_id: transport.session_id().clone(),
            role: transport.role(),
            local: transport.local_peer().clone(),
            host: transport.host().clone(),
            roster,
        };

        let activated = {
            let mut inner = self.shared.inner.lock();
            if inner.is_running(generation) {
                let span = tracing::info_span!("collab_session", session_id = %snapshot.session_id);
                let handle = tokio::spawn(
                    pump(self.shared.clone(), generation, transport.clone()).instrument(span),
                );
                inner.live = Some(Live {
                    transport: transport.clone(),
                    snapshot: snapshot.clone(),
                    review: ReviewState::new(),
                    pump: Some(handle),
                });
                inner.set_state(SessionState::Active);
                true
            } else {
                false
            }
        };

        if !activated {
            // end() ran while the handshake was in flight.
            let _ = transport.leave().await;
            return Err(TransportError::ConnectionClosed);
        }

        self.shared.notify();
        tracing::info!(
            session_id = %snapshot.session_id,
            role = %snapshot.role,
            peers = snapshot.roster.len(),
            "Collaboration session active"
        );
        Ok(snapshot)
    }

    fn handshake_failed(&self, generation: u64, error: TransportError) -> TransportError {
        tracing::warn!(error = %error, "Collaboration handshake failed");
        self.shared.finish(generation, EndReason::HandshakeFailed);
        error
    }
}

impl Drop for SessionCoordinator {
    /// Leaves a live session in the background so peers see us go.
    fn drop(&mut self) {
        let Some(live) = self.shared.inner.lock().live.take() else {
            return;
        };
        if let Some(pump) = live.pump {
            pump.abort();
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Coordinator dropped outside a runtime; session left to the transport");
            return;
        };
        let timeout = self.settings.handshake_timeout;
        let transport = live.transport;
        runtime.spawn(async move {
            match tokio::time::timeout(timeout, transport.leave()).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => tracing::warn!(%error, "Leaving the session on drop failed"),
                Err(_) => tracing::warn!(?timeout, "Leaving the session on drop timed out"),
            }
        });
    }
}
