//! Rendezvous and transport substrate
//!
//! The session core does not speak any signaling or peer-connection protocol
//! itself. It drives an external substrate that registers an endpoint under
//! an identifier, dials peers with local tracks attached and carries a reliable
//! text data channel. Everything the substrate reports comes back as one of
//! the closed event enums below, delivered on an unbounded channel per handle:
//!
//! ```text
//!  register(id, config) ──► Registration { handle, events: RegistrationEvent }
//!                                  │
//!        handle.dial(remote) ──────┼──► MediaLink { connection, events: ConnectionEvent }
//!        handle.connect_data(remote) ► DataLink  { connection, events: DataEvent }
//! ```
//!
//! [`memory::MemoryRendezvous`] implements the traits in-process.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::identity::LocalIdentity;
use crate::media::{MediaTrack, TrackKind};
use crate::transport::TransportConfig;

pub use memory::MemoryRendezvous;

/// Errors raised synchronously by substrate handles
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubstrateError {
    #[error("identity {id} is already taken")]
    UnavailableId { id: String },

    #[error("peer {peer} is unavailable")]
    PeerUnavailable { peer: String },

    #[error("network error: {reason}")]
    Network { reason: String },

    #[error("connection is closed")]
    Closed,
}

impl SubstrateError {
    /// How a dial that failed with this error should be treated
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SubstrateError::PeerUnavailable { .. } => FailureKind::PeerUnavailable,
            _ => FailureKind::Transport,
        }
    }
}

/// Media received from the remote side of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    /// Connection the stream arrived on
    pub connection_id: String,
    /// Who is sending it
    pub remote: LocalIdentity,
    /// Kinds of the tracks it carries
    pub kinds: Vec<TrackKind>,
}

/// Events of the registration handle
#[derive(Debug)]
pub enum RegistrationEvent {
    /// The endpoint is reachable under its identity
    Opened,
    /// A peer dialed us
    IncomingCall {
        remote: LocalIdentity,
        link: MediaLink,
    },
    /// A peer opened a data channel to us
    IncomingData {
        remote: LocalIdentity,
        link: DataLink,
    },
    /// Substrate-level error (taken id, server unreachable, ...)
    Error(String),
    /// Lost the rendezvous server; existing connections may survive
    Disconnected,
    /// The registration is gone for good
    Closed,
}

/// Events of a media connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Remote media started flowing
    RemoteStream(RemoteStream),
    /// Either side closed the connection gracefully
    Closed,
    /// The connection entered a terminal bad state
    Failed { kind: FailureKind, reason: String },
}

/// Why a media connection failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Nobody is registered under the dialed identity
    PeerUnavailable,
    /// The transport broke down (ICE failure, network loss)
    Transport,
}

impl ConnectionEvent {
    pub fn transport_failure(reason: impl Into<String>) -> Self {
        ConnectionEvent::Failed {
            kind: FailureKind::Transport,
            reason: reason.into(),
        }
    }
}

/// Events of a data connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEvent {
    /// The channel is ready to carry messages
    Open,
    /// A text payload from the remote side
    Message(String),
    /// The channel closed
    Closed,
    /// Channel-level error
    Error(String),
}

/// Registration result: the handle plus its event stream
#[derive(Debug)]
pub struct Registration {
    pub handle: Arc<dyn RegistrationHandle>,
    pub events: mpsc::UnboundedReceiver<RegistrationEvent>,
}

/// A media connection and its event stream
#[derive(Debug)]
pub struct MediaLink {
    pub connection: Arc<dyn MediaConnection>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// A data connection and its event stream
#[derive(Debug)]
pub struct DataLink {
    pub connection: Arc<dyn DataConnection>,
    pub events: mpsc::UnboundedReceiver<DataEvent>,
}

/// Entry point of the substrate
pub trait RendezvousSubstrate: Send + Sync + fmt::Debug {
    /// Register `identity` using the given transport configuration
    ///
    /// Failures are reported on the returned event stream, never here.
    fn register(&self, identity: &LocalIdentity, config: &TransportConfig) -> Registration;
}

/// A live registration
pub trait RegistrationHandle: Send + Sync + fmt::Debug {
    fn identity(&self) -> &LocalIdentity;

    /// Dial `remote`, sending `tracks`
    fn dial(
        &self,
        remote: &LocalIdentity,
        tracks: Vec<MediaTrack>,
    ) -> Result<MediaLink, SubstrateError>;

    /// Open a data channel to `remote`
    fn connect_data(&self, remote: &LocalIdentity) -> Result<DataLink, SubstrateError>;

    /// Unregister and close every connection; idempotent
    fn destroy(&self);
}

/// One side of a media connection
pub trait MediaConnection: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn remote(&self) -> &LocalIdentity;

    /// Answer an incoming call with local tracks
    fn answer(&self, tracks: Vec<MediaTrack>) -> Result<(), SubstrateError>;

    /// Swap the outgoing track of the same kind without renegotiating
    fn replace_track(&self, track: MediaTrack) -> Result<(), SubstrateError>;

    /// Close gracefully; idempotent
    fn close(&self);
}

/// One side of a data connection
pub trait DataConnection: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn remote(&self) -> &LocalIdentity;

    fn send(&self, text: &str) -> Result<(), SubstrateError>;

    /// Close gracefully; idempotent
    fn close(&self);
}
