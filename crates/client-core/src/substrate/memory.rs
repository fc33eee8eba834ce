//! In-memory rendezvous hub
//!
//! Every [`MemoryRendezvous`] clone shares one hub. Registered endpoints can
//! dial each other, answer, exchange data-channel text and close, all through
//! unbounded channels, so two full sessions can run inside one test. The hub
//! also exposes hooks for injecting transport failures and for inspecting
//! what the endpoints did.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    ConnectionEvent, DataConnection, DataEvent, DataLink, FailureKind, MediaConnection,
    MediaLink, Registration, RegistrationEvent, RegistrationHandle, RemoteStream,
    RendezvousSubstrate, SubstrateError,
};
use crate::identity::LocalIdentity;
use crate::media::{MediaTrack, TrackKind};
use crate::transport::TransportConfig;

type RegistrationTx = mpsc::UnboundedSender<RegistrationEvent>;

#[derive(Debug)]
struct PeerEntry {
    events: RegistrationTx,
    config: TransportConfig,
    reachable: bool,
}

#[derive(Debug, Default)]
struct Hub {
    peers: DashMap<String, PeerEntry>,
    media: DashMap<u64, Arc<MediaPair>>,
    data: DashMap<u64, Arc<DataPair>>,
    replaced_tracks: DashMap<String, Vec<String>>,
    dial_count: DashMap<String, usize>,
    next_id: AtomicU64,
}

impl Hub {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn close_pairs_of(&self, id: &str) {
        for pair in self.media.iter().filter(|p| p.involves(id)) {
            pair.finish(ConnectionEvent::Closed);
        }
        for pair in self.data.iter().filter(|p| p.involves(id)) {
            pair.close();
        }
        self.media.retain(|_, p| !p.is_closed());
        self.data.retain(|_, p| !p.is_closed());
    }
}

/// Shared in-process rendezvous substrate
#[derive(Debug, Clone, Default)]
pub struct MemoryRendezvous {
    hub: Arc<Hub>,
}

impl MemoryRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is currently registered
    pub fn is_registered(&self, id: &str) -> bool {
        self.hub.peers.contains_key(id)
    }

    /// Transport configuration `id` registered with
    pub fn registered_config(&self, id: &str) -> Option<TransportConfig> {
        self.hub.peers.get(id).map(|p| p.config.clone())
    }

    /// Make `id` unreachable for new dials while keeping it registered
    pub fn set_reachable(&self, id: &str, reachable: bool) {
        if let Some(mut peer) = self.hub.peers.get_mut(id) {
            peer.reachable = reachable;
        }
    }

    /// Drive every open media connection of `id` into a failed state
    ///
    /// Returns the number of connections failed.
    pub fn fail_connections(&self, id: &str, reason: &str) -> usize {
        let mut failed = 0;
        for pair in self.hub.media.iter().filter(|p| p.involves(id)) {
            if pair.finish(ConnectionEvent::transport_failure(reason)) {
                failed += 1;
            }
        }
        self.hub.media.retain(|_, p| !p.is_closed());
        debug!(peer = id, failed, "Injected transport failure");
        failed
    }

    /// Tell `id` it lost the rendezvous server
    pub fn disconnect(&self, id: &str) {
        if let Some(peer) = self.hub.peers.get(id) {
            let _ = peer.events.send(RegistrationEvent::Disconnected);
        }
    }

    /// Ids of tracks `id` swapped into live connections via `replace_track`
    pub fn replaced_tracks(&self, id: &str) -> Vec<String> {
        self.hub
            .replaced_tracks
            .get(id)
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }

    /// Number of dials `id` has placed
    pub fn dial_count(&self, id: &str) -> usize {
        self.hub.dial_count.get(id).map(|c| *c).unwrap_or(0)
    }

    /// Number of media connections still open
    pub fn open_media_connections(&self) -> usize {
        self.hub.media.iter().filter(|p| !p.is_closed()).count()
    }
}

impl RendezvousSubstrate for MemoryRendezvous {
    fn register(&self, identity: &LocalIdentity, config: &TransportConfig) -> Registration {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(MemoryRegistration {
            hub: self.hub.clone(),
            identity: identity.clone(),
            destroyed: AtomicBool::new(false),
        });

        if self.hub.peers.contains_key(identity.as_str()) {
            let _ = tx.send(RegistrationEvent::Error(
                SubstrateError::UnavailableId {
                    id: identity.to_string(),
                }
                .to_string(),
            ));
            handle.destroyed.store(true, Ordering::SeqCst);
        } else {
            self.hub.peers.insert(
                identity.to_string(),
                PeerEntry {
                    events: tx.clone(),
                    config: config.clone(),
                    reachable: true,
                },
            );
            let _ = tx.send(RegistrationEvent::Opened);
        }

        Registration { handle, events: rx }
    }
}

#[derive(Debug)]
struct MemoryRegistration {
    hub: Arc<Hub>,
    identity: LocalIdentity,
    destroyed: AtomicBool,
}

impl MemoryRegistration {
    fn ensure_alive(&self) -> Result<(), SubstrateError> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(SubstrateError::Closed)
        } else {
            Ok(())
        }
    }

    fn remote_events(&self, remote: &LocalIdentity) -> Option<RegistrationTx> {
        self.hub
            .peers
            .get(remote.as_str())
            .filter(|p| p.reachable)
            .map(|p| p.events.clone())
    }
}

impl RegistrationHandle for MemoryRegistration {
    fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    fn dial(
        &self,
        remote: &LocalIdentity,
        tracks: Vec<MediaTrack>,
    ) -> Result<MediaLink, SubstrateError> {
        self.ensure_alive()?;
        *self
            .hub
            .dial_count
            .entry(self.identity.to_string())
            .or_default() += 1;

        let id = self.hub.next_id();
        let (caller_tx, caller_rx) = mpsc::unbounded_channel();
        let (callee_tx, callee_rx) = mpsc::unbounded_channel();
        let pair = Arc::new(MediaPair {
            id: format!("media-{}", id),
            caller: self.identity.clone(),
            callee: remote.clone(),
            state: Mutex::new(MediaPairState {
                caller_tx,
                callee_tx,
                caller_kinds: kinds_of(&tracks),
                callee_kinds: Vec::new(),
                answered: false,
                closed: false,
            }),
        });

        let caller_link = MediaLink {
            connection: Arc::new(MemoryMediaConnection {
                pair: pair.clone(),
                side: Side::Caller,
                hub: self.hub.clone(),
            }),
            events: caller_rx,
        };

        match self.remote_events(remote) {
            Some(remote_tx) => {
                self.hub.media.insert(id, pair.clone());
                let callee_link = MediaLink {
                    connection: Arc::new(MemoryMediaConnection {
                        pair,
                        side: Side::Callee,
                        hub: self.hub.clone(),
                    }),
                    events: callee_rx,
                };
                let _ = remote_tx.send(RegistrationEvent::IncomingCall {
                    remote: self.identity.clone(),
                    link: callee_link,
                });
            }
            None => {
                pair.finish(ConnectionEvent::Failed {
                    kind: FailureKind::PeerUnavailable,
                    reason: SubstrateError::PeerUnavailable {
                        peer: remote.to_string(),
                    }
                    .to_string(),
                });
            }
        }
        Ok(caller_link)
    }

    fn connect_data(&self, remote: &LocalIdentity) -> Result<DataLink, SubstrateError> {
        self.ensure_alive()?;

        let id = self.hub.next_id();
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let pair = Arc::new(DataPair {
            id: format!("data-{}", id),
            a: self.identity.clone(),
            b: remote.clone(),
            state: Mutex::new(DataPairState {
                a_tx,
                b_tx,
                closed: false,
            }),
        });
        let local_link = DataLink {
            connection: Arc::new(MemoryDataConnection {
                pair: pair.clone(),
                side: Side::Caller,
            }),
            events: a_rx,
        };

        match self.remote_events(remote) {
            Some(remote_tx) => {
                self.hub.data.insert(id, pair.clone());
                let remote_link = DataLink {
                    connection: Arc::new(MemoryDataConnection {
                        pair: pair.clone(),
                        side: Side::Callee,
                    }),
                    events: b_rx,
                };
                let _ = remote_tx.send(RegistrationEvent::IncomingData {
                    remote: self.identity.clone(),
                    link: remote_link,
                });
                pair.open();
            }
            None => {
                pair.fail(
                    SubstrateError::PeerUnavailable {
                        peer: remote.to_string(),
                    }
                    .to_string(),
                );
            }
        }
        Ok(local_link)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let id = self.identity.as_str();
        self.hub.close_pairs_of(id);
        if let Some((_, peer)) = self.hub.peers.remove(id) {
            let _ = peer.events.send(RegistrationEvent::Closed);
        }
        debug!(peer = id, "Registration destroyed");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Caller,
    Callee,
}

fn kinds_of(tracks: &[MediaTrack]) -> Vec<TrackKind> {
    tracks.iter().map(MediaTrack::kind).collect()
}

#[derive(Debug)]
struct MediaPairState {
    caller_tx: mpsc::UnboundedSender<ConnectionEvent>,
    callee_tx: mpsc::UnboundedSender<ConnectionEvent>,
    caller_kinds: Vec<TrackKind>,
    callee_kinds: Vec<TrackKind>,
    answered: bool,
    closed: bool,
}

#[derive(Debug)]
struct MediaPair {
    id: String,
    caller: LocalIdentity,
    callee: LocalIdentity,
    state: Mutex<MediaPairState>,
}

impl MediaPair {
    fn involves(&self, id: &str) -> bool {
        self.caller.as_str() == id || self.callee.as_str() == id
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Deliver a terminal event to both sides once
    fn finish(&self, event: ConnectionEvent) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        let _ = state.caller_tx.send(event.clone());
        let _ = state.callee_tx.send(event);
        true
    }
}

#[derive(Debug)]
struct MemoryMediaConnection {
    pair: Arc<MediaPair>,
    side: Side,
    hub: Arc<Hub>,
}

impl MediaConnection for MemoryMediaConnection {
    fn id(&self) -> &str {
        &self.pair.id
    }

    fn remote(&self) -> &LocalIdentity {
        match self.side {
            Side::Caller => &self.pair.callee,
            Side::Callee => &self.pair.caller,
        }
    }

    fn answer(&self, tracks: Vec<MediaTrack>) -> Result<(), SubstrateError> {
        if self.side != Side::Callee {
            return Err(SubstrateError::Network {
                reason: "only the callee can answer".into(),
            });
        }
        let mut state = self.pair.state.lock();
        if state.closed {
            return Err(SubstrateError::Closed);
        }
        if state.answered {
            return Ok(());
        }
        state.answered = true;
        state.callee_kinds = kinds_of(&tracks);

        let _ = state.caller_tx.send(ConnectionEvent::RemoteStream(RemoteStream {
            connection_id: self.pair.id.clone(),
            remote: self.pair.callee.clone(),
            kinds: state.callee_kinds.clone(),
        }));
        let _ = state.callee_tx.send(ConnectionEvent::RemoteStream(RemoteStream {
            connection_id: self.pair.id.clone(),
            remote: self.pair.caller.clone(),
            kinds: state.caller_kinds.clone(),
        }));
        Ok(())
    }

    fn replace_track(&self, track: MediaTrack) -> Result<(), SubstrateError> {
        if self.pair.is_closed() {
            return Err(SubstrateError::Closed);
        }
        let sender = match self.side {
            Side::Caller => &self.pair.caller,
            Side::Callee => &self.pair.callee,
        };
        self.hub
            .replaced_tracks
            .entry(sender.to_string())
            .or_default()
            .push(track.id().to_string());
        Ok(())
    }

    fn close(&self) {
        self.pair.finish(ConnectionEvent::Closed);
    }
}

#[derive(Debug)]
struct DataPairState {
    a_tx: mpsc::UnboundedSender<DataEvent>,
    b_tx: mpsc::UnboundedSender<DataEvent>,
    closed: bool,
}

#[derive(Debug)]
struct DataPair {
    id: String,
    a: LocalIdentity,
    b: LocalIdentity,
    state: Mutex<DataPairState>,
}

impl DataPair {
    fn involves(&self, id: &str) -> bool {
        self.a.as_str() == id || self.b.as_str() == id
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn open(&self) {
        let state = self.state.lock();
        let _ = state.a_tx.send(DataEvent::Open);
        let _ = state.b_tx.send(DataEvent::Open);
    }

    fn fail(&self, reason: String) {
        let mut state = self.state.lock();
        state.closed = true;
        let _ = state.a_tx.send(DataEvent::Error(reason));
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let _ = state.a_tx.send(DataEvent::Closed);
        let _ = state.b_tx.send(DataEvent::Closed);
    }
}

#[derive(Debug)]
struct MemoryDataConnection {
    pair: Arc<DataPair>,
    side: Side,
}

impl DataConnection for MemoryDataConnection {
    fn id(&self) -> &str {
        &self.pair.id
    }

    fn remote(&self) -> &LocalIdentity {
        match self.side {
            Side::Caller => &self.pair.b,
            Side::Callee => &self.pair.a,
        }
    }

    fn send(&self, text: &str) -> Result<(), SubstrateError> {
        let state = self.pair.state.lock();
        if state.closed {
            return Err(SubstrateError::Closed);
        }
        let target = match self.side {
            Side::Caller => &state.b_tx,
            Side::Callee => &state.a_tx,
        };
        target
            .send(DataEvent::Message(text.to_string()))
            .map_err(|_| SubstrateError::Closed)
    }

    fn close(&self) {
        self.pair.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> LocalIdentity {
        LocalIdentity::parse(s).unwrap()
    }

    fn register(hub: &MemoryRendezvous, name: &str) -> Registration {
        hub.register(&id(name), &TransportConfig::default())
    }

    #[tokio::test]
    async fn duplicate_registration_reports_unavailable_id() {
        let hub = MemoryRendezvous::new();
        let mut first = register(&hub, "alice");
        assert!(matches!(first.events.recv().await, Some(RegistrationEvent::Opened)));

        let mut second = register(&hub, "alice");
        match second.events.recv().await {
            Some(RegistrationEvent::Error(msg)) => assert!(msg.contains("taken")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn dial_answer_close_reaches_both_sides() {
        let hub = MemoryRendezvous::new();
        let alice = register(&hub, "alice");
        let mut bob = register(&hub, "bob");
        bob.events.recv().await;

        let mut out = alice.handle.dial(&id("bob"), Vec::new()).unwrap();
        let mut incoming = match bob.events.recv().await {
            Some(RegistrationEvent::IncomingCall { remote, link }) => {
                assert_eq!(remote.as_str(), "alice");
                link
            }
            other => panic!("unexpected {:?}", other),
        };

        incoming.connection.answer(Vec::new()).unwrap();
        assert!(matches!(out.events.recv().await, Some(ConnectionEvent::RemoteStream(_))));
        assert!(matches!(
            incoming.events.recv().await,
            Some(ConnectionEvent::RemoteStream(_))
        ));

        out.connection.close();
        assert_eq!(out.events.recv().await, Some(ConnectionEvent::Closed));
        assert_eq!(incoming.events.recv().await, Some(ConnectionEvent::Closed));
        assert_eq!(hub.open_media_connections(), 0);
    }

    #[tokio::test]
    async fn dialing_an_unknown_peer_fails_the_link() {
        let hub = MemoryRendezvous::new();
        let alice = register(&hub, "alice");
        let mut out = alice.handle.dial(&id("nobody"), Vec::new()).unwrap();
        match out.events.recv().await {
            Some(ConnectionEvent::Failed {
                kind: FailureKind::PeerUnavailable,
                reason,
            }) => assert!(reason.contains("nobody")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn data_messages_follow_open_in_order() {
        let hub = MemoryRendezvous::new();
        let alice = register(&hub, "alice");
        let mut bob = register(&hub, "bob");
        bob.events.recv().await;

        let mut out = alice.handle.connect_data(&id("bob")).unwrap();
        out.connection.send("one").unwrap();
        out.connection.send("two").unwrap();

        let mut incoming = match bob.events.recv().await {
            Some(RegistrationEvent::IncomingData { link, .. }) => link,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(out.events.recv().await, Some(DataEvent::Open));
        assert_eq!(incoming.events.recv().await, Some(DataEvent::Open));
        assert_eq!(incoming.events.recv().await, Some(DataEvent::Message("one".into())));
        assert_eq!(incoming.events.recv().await, Some(DataEvent::Message("two".into())));
    }

    #[tokio::test]
    async fn injected_failure_is_delivered_once() {
        let hub = MemoryRendezvous::new();
        let alice = register(&hub, "alice");
        let mut bob = register(&hub, "bob");
        bob.events.recv().await;
        let mut out = alice.handle.dial(&id("bob"), Vec::new()).unwrap();

        assert_eq!(hub.fail_connections("bob", "ice failed"), 1);
        assert_eq!(hub.fail_connections("bob", "ice failed"), 0);
        assert_eq!(
            out.events.recv().await,
            Some(ConnectionEvent::transport_failure("ice failed"))
        );
    }

    #[tokio::test]
    async fn destroy_unregisters_and_closes() {
        let hub = MemoryRendezvous::new();
        let mut alice = register(&hub, "alice");
        alice.events.recv().await;
        alice.handle.destroy();
        alice.handle.destroy();

        assert!(!hub.is_registered("alice"));
        assert!(matches!(alice.events.recv().await, Some(RegistrationEvent::Closed)));
        assert_eq!(
            alice.handle.dial(&id("bob"), Vec::new()).unwrap_err(),
            SubstrateError::Closed
        );
    }
}
