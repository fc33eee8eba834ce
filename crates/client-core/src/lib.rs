//! # EMDR session core
//!
//! Two-party video session orchestration with a synchronized control channel
//! for a shared visual stimulus. The crate acquires local capture, registers
//! with a rendezvous substrate, places and answers calls, recovers from
//! transport failures with a bounded reconnection policy, and keeps a small
//! ordered side channel for stimulus start/stop, camera state and settings.
//!
//! ```text
//! ┌──────────────────────────── SessionFacade ─────────────────────────────┐
//! │ connect / disconnect / accept / reject / toggle / switch / control     │
//! └──────────────┬──────────────────────────────────────────┬──────────────┘
//!                │ commands (mpsc + oneshot)                │ media ops
//!        ┌───────▼────────┐    watch<SessionStatus>   ┌─────▼─────────┐
//!        │  session loop  │──► broadcast<ClientEvent> │ MediaAcquirer │
//!        │ calls, control │                           └───────────────┘
//!        └───────┬────────┘
//!                │ register / dial / answer / data
//!        ┌───────▼────────────────┐   ┌───────────────────────────────┐
//!        │ RendezvousSubstrate    │◄──│ TransportConfigResolver (once)│
//!        └────────────────────────┘   └───────────────────────────────┘
//! ```
//!
//! Everything that talks to the outside world sits behind a trait
//! ([`RendezvousSubstrate`], [`CaptureBackend`], [`TransportConfigSource`]).
//! [`MemoryRendezvous`] and [`SimulatedCaptureBackend`] implement them
//! in-process for tests and demos.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use emdr_client_core::{MemoryRendezvous, SessionBuilder, SimulatedCaptureBackend, StatusCategory};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = MemoryRendezvous::new();
//! let start = |email: &'static str| {
//!     SessionBuilder::new()
//!         .email(email)
//!         .substrate(Arc::new(hub.clone()))
//!         .capture_backend(Arc::new(SimulatedCaptureBackend::new()))
//!         .build()
//! };
//! let alice = start("alice").await?;
//! let bob = start("bob").await?;
//!
//! let mut status = alice.watch_status();
//! status.wait_for(|s| s.registered && s.has_local_media).await?;
//! alice.connect("bob").await?;
//! let connected = status.wait_for(|s| s.connected).await?.clone();
//! assert_eq!(connected.text, "Connected to bob");
//! assert_eq!(connected.category, StatusCategory::Connected);
//!
//! alice.disconnect().await?;
//! bob.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod client;
pub mod control;
pub mod error;
pub mod events;
pub mod identity;
pub mod media;
pub mod registration;
pub mod substrate;
pub mod transport;

pub use call::{CallDirection, CallId, CallInfo, CallPhase};
pub use client::{
    ClientConfig, ParticipantRole, ReconnectDecision, ReconnectPolicy, RelayConfig,
    SessionBuilder, SessionFacade, VideoDisablePolicy,
};
pub use control::{ControlChannelError, ControlDecodeError, ControlMessage, StimulusSettings};
pub use error::{ClientError, ClientResult};
pub use events::{
    CallStatusInfo, ClientEvent, EventPriority, IncomingCallInfo, MediaEventInfo,
    MediaEventType, RegistrationStatusInfo, SessionStatus, StatusCategory,
};
pub use identity::LocalIdentity;
pub use media::{
    CaptureBackend, DeviceInfo, MediaAccessError, MediaAcquirer, MediaConstraints, MediaTrack,
    SimulatedCaptureBackend, TrackKind,
};
pub use registration::{RegistrationInfo, RegistrationStatus};
pub use substrate::{MemoryRendezvous, RendezvousSubstrate, SubstrateError};
pub use transport::{
    CredentialFetchError, HttpTransportConfigResolver, IceServer, StaticTransportConfig,
    TransportConfig, TransportConfigSource,
};
