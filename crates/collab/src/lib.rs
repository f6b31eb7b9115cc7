//! In-process collaboration transport.
//!
//! A [`LocalHub`] hosts any number of review sessions inside one process.
//! Each participant talks to it through a [`LocalApi`], which implements the
//! [`CollaborationApi`] and [`CollaborationProvider`] ports. Events travel over
//! unbounded [`tokio::sync::mpsc`] channels, one per participant.
//!
//! ```rust,no_run
//! use collab::LocalHub;
//! use pipeline::{CollaborationApi, Peer, PeerId};
//!
//! # async fn example() {
//! let hub = LocalHub::new();
//! let alice = hub.api_for(Peer::new(PeerId::new("alice").unwrap()));
//! let bob = hub.api_for(Peer::new(PeerId::new("bob").unwrap()));
//!
//! let hosted = alice.share().await.unwrap();
//! let joined = bob.join(hosted.session_id()).await.unwrap();
//! assert_eq!(joined.peers().await.unwrap().len(), 2);
//! # }
//! ```
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Used for embedding and tests; the session rules live
//! in the `nodes` coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline::{
    CollabSession, CollaborationApi, CollaborationProvider, Peer, PeerId, ReviewSignal, Role,
    SessionId, SessionRef, TransportError, TransportEvent,
};
use tokio::sync::mpsc;

type EventTx = mpsc::UnboundedSender<TransportEvent>;
type EventRx = mpsc::UnboundedReceiver<TransportEvent>;

struct Member {
    peer: Peer,
    tx: EventTx,
}

struct HubSession {
    host: PeerId,
    /// Join order; the host is always first.
    members: Vec<Member>,
}

impl HubSession {
    fn roster(&self) -> Vec<Peer> {
        self.members.iter().map(|m| m.peer.clone()).collect()
    }

    fn broadcast(&self, except: &PeerId, event: &TransportEvent) {
        for member in self.members.iter().filter(|m| &m.peer.id != except) {
            // A closed receiver means that member is already gone.
            let _ = member.tx.send(event.clone());
        }
    }
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<SessionId, HubSession>,
}

impl HubState {
    /// Removes `peer` from `session`. The departing peer is sent nothing; its
    /// channel simply closes. A departing host closes the session.
    fn depart(&mut self, session_id: &SessionId, peer: &PeerId) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        let Some(index) = session.members.iter().position(|m| &m.peer.id == peer) else {
            return;
        };
        session.members.remove(index);

        if &session.host == peer {
            session.broadcast(peer, &TransportEvent::PeerLeft(peer.clone()));
            session.broadcast(peer, &TransportEvent::SessionClosed);
            self.sessions.remove(session_id);
            tracing::debug!(session_id = %session_id, "Local session closed by host");
        } else {
            session.broadcast(peer, &TransportEvent::PeerLeft(peer.clone()));
        }
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// An in-process rendezvous for collaboration sessions.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// The collaboration API as seen by `peer`.
    pub fn api_for(&self, peer: Peer) -> LocalApi {
        LocalApi {
            hub: self.clone(),
            local: peer,
        }
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Simulates `peer` losing connectivity: its event channel closes and the
    /// other participants see it leave. Returns `false` if `peer` is in no
    /// session.
    pub fn sever(&self, peer: &PeerId) -> bool {
        let mut state = self.state.lock();
        let session_id = state
            .sessions
            .iter()
            .find(|(_, s)| s.members.iter().any(|m| &m.peer.id == peer))
            .map(|(id, _)| id.clone());
        match session_id {
            Some(id) => {
                tracing::debug!(session_id = %id, peer = %peer, "Severing local peer");
                state.depart(&id, peer);
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-participant API
// ---------------------------------------------------------------------------

/// One participant's handle on a [`LocalHub`].
#[derive(Clone)]
pub struct LocalApi {
    hub: LocalHub,
    local: Peer,
}

impl LocalApi {
    pub fn local_peer(&self) -> &Peer {
        &self.local
    }
}

#[async_trait]
impl CollaborationApi for LocalApi {
    async fn share(&self) -> Result<Arc<dyn CollabSession>, TransportError> {
        let session_id = SessionId::new(uuid::Uuid::new_v4().to_string())
            .ok_or(TransportError::ConnectionClosed)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.state.lock().sessions.insert(
            session_id.clone(),
            HubSession {
                host: self.local.id.clone(),
                members: vec![Member {
                    peer: self.local.clone(),
                    tx,
                }],
            },
        );
        tracing::debug!(session_id = %session_id, host = %self.local, "Local session shared");
        Ok(Arc::new(LocalSession::new(
            self.hub.clone(),
            session_id,
            Role::Host,
            self.local.clone(),
            self.local.id.clone(),
            rx,
        )))
    }

    async fn join(&self, session: &SessionRef) -> Result<Arc<dyn CollabSession>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = {
            let mut state = self.hub.state.lock();
            let entry = state
                .sessions
                .get_mut(session)
                .ok_or_else(|| TransportError::SessionNotFound(session.clone()))?;
            if entry.members.iter().any(|m| m.peer.id == self.local.id) {
                return Err(TransportError::InvalidState {
                    action: "join".into(),
                    state: "already a member".into(),
                });
            }
            entry.broadcast(
                &self.local.id,
                &TransportEvent::PeerJoined(self.local.clone()),
            );
            entry.members.push(Member {
                peer: self.local.clone(),
                tx,
            });
            entry.host.clone()
        };
        tracing::debug!(session_id = %session, guest = %self.local, "Joined local session");
        Ok(Arc::new(LocalSession::new(
            self.hub.clone(),
            session.clone(),
            Role::Guest,
            self.local.clone(),
            host,
            rx,
        )))
    }
}

impl CollaborationProvider for LocalApi {
    fn get_api(&self) -> Option<Arc<dyn CollaborationApi>> {
        Some(Arc::new(self.clone()))
    }
}

// ---------------------------------------------------------------------------
// Session endpoint
// ---------------------------------------------------------------------------

/// The local end of a session on a [`LocalHub`]. Dropping it leaves.
pub struct LocalSession {
    hub: LocalHub,
    session_id: SessionId,
    role: Role,
    local: Peer,
    host: PeerId,
    rx: tokio::sync::Mutex<EventRx>,
    left: AtomicBool,
}

impl LocalSession {
    fn new(
        hub: LocalHub,
        session_id: SessionId,
        role: Role,
        local: Peer,
        host: PeerId,
        rx: EventRx,
    ) -> Self {
        Self {
            hub,
            session_id,
            role,
            local,
            host,
            rx: tokio::sync::Mutex::new(rx),
            left: AtomicBool::new(false),
        }
    }

    fn depart(&self) {
        if !self.left.swap(true, Ordering::SeqCst) {
            self.hub
                .state
                .lock()
                .depart(&self.session_id, &self.local.id);
        }
    }
}

#[async_trait]
impl CollabSession for LocalSession {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn local_peer(&self) -> &Peer {
        &self.local
    }

    fn host(&self) -> &PeerId {
        &self.host
    }

    async fn peers(&self) -> Result<Vec<Peer>, TransportError> {
        let state = self.hub.state.lock();
        state
            .sessions
            .get(&self.session_id)
            .filter(|s| s.members.iter().any(|m| m.peer.id == self.local.id))
            .map(HubSession::roster)
            .ok_or(TransportError::ConnectionClosed)
    }

    async fn next_event(&self) -> Result<TransportEvent, TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn send_signal(&self, signal: &ReviewSignal) -> Result<(), TransportError> {
        let state = self.hub.state.lock();
        let session = state
            .sessions
            .get(&self.session_id)
            .filter(|s| s.members.iter().any(|m| m.peer.id == self.local.id))
            .ok_or(TransportError::ConnectionClosed)?;
        session.broadcast(
            &self.local.id,
            &TransportEvent::Signal {
                from: self.local.id.clone(),
                signal: signal.clone(),
            },
        );
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        self.depart();
        Ok(())
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        self.depart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{Fingerprint, Verdict};

    fn api(hub: &LocalHub, name: &str) -> LocalApi {
        hub.api_for(Peer::new(PeerId::new(name).unwrap()))
    }

    fn id(name: &str) -> PeerId {
        PeerId::new(name).unwrap()
    }

    #[tokio::test]
    async fn guest_join_is_announced_to_the_host() {
        let hub = LocalHub::new();
        let host = api(&hub, "alice").share().await.unwrap();
        let guest = api(&hub, "bob").join(host.session_id()).await.unwrap();

        assert_eq!(guest.role(), Role::Guest);
        assert_eq!(guest.host(), &id("alice"));
        let event = host.next_event().await.unwrap();
        assert_eq!(
            event,
            TransportEvent::PeerJoined(Peer::new(id("bob")))
        );

        let roster: Vec<_> = guest.peers().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(roster, vec![id("alice"), id("bob")]);
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let hub = LocalHub::new();
        let missing = SessionId::new("nope").unwrap();
        let err = api(&hub, "bob").join(&missing).await.err().unwrap();
        assert_eq!(err, TransportError::SessionNotFound(missing));
    }

    #[tokio::test]
    async fn signals_reach_every_other_member() {
        let hub = LocalHub::new();
        let host = api(&hub, "alice").share().await.unwrap();
        let guest = api(&hub, "bob").join(host.session_id()).await.unwrap();
        let _ = host.next_event().await.unwrap();

        let signal = ReviewSignal {
            fingerprint: Fingerprint::derive(None, "Fix bug", "Task"),
            verdict: Verdict::Approve,
        };
        guest.send_signal(&signal).await.unwrap();

        assert_eq!(
            host.next_event().await.unwrap(),
            TransportEvent::Signal {
                from: id("bob"),
                signal
            }
        );
    }

    #[tokio::test]
    async fn host_leaving_closes_the_session() {
        let hub = LocalHub::new();
        let host = api(&hub, "alice").share().await.unwrap();
        let guest = api(&hub, "bob").join(host.session_id()).await.unwrap();

        host.leave().await.unwrap();

        assert_eq!(
            guest.next_event().await.unwrap(),
            TransportEvent::PeerLeft(id("alice"))
        );
        assert_eq!(guest.next_event().await.unwrap(), TransportEvent::SessionClosed);
        assert_eq!(hub.session_count(), 0);
        assert_eq!(guest.peers().await, Err(TransportError::ConnectionClosed));
    }

    #[tokio::test]
    async fn dropping_a_guest_session_leaves() {
        let hub = LocalHub::new();
        let host = api(&hub, "alice").share().await.unwrap();
        let guest = api(&hub, "bob").join(host.session_id()).await.unwrap();
        let _ = host.next_event().await.unwrap();

        drop(guest);

        assert_eq!(host.next_event().await.unwrap(), TransportEvent::PeerLeft(id("bob")));
        assert_eq!(host.peers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn severed_peer_loses_its_channel() {
        let hub = LocalHub::new();
        let host = api(&hub, "alice").share().await.unwrap();
        let guest = api(&hub, "bob").join(host.session_id()).await.unwrap();
        let _ = host.next_event().await.unwrap();

        assert!(hub.sever(&id("bob")));

        assert_eq!(guest.next_event().await, Err(TransportError::ConnectionClosed));
        assert_eq!(host.next_event().await.unwrap(), TransportEvent::PeerLeft(id("bob")));
        assert!(!hub.sever(&id("carol")));
    }
}
