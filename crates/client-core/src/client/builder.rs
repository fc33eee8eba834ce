//! Session builder
//!
//! Fluent assembly of a [`SessionFacade`] from a [`ClientConfig`] and the
//! three external collaborators: the rendezvous substrate, the capture
//! backend and (optionally) a transport configuration source.
//!
//! # Bootstrap order
//!
//! 1. resolve the transport configuration (once; never fails)
//! 2. derive the local identity from the configured e-mail
//! 3. register with the substrate
//! 4. start the session loop, which acquires media if configured to
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use emdr_client_core::{
//!     MemoryRendezvous, ParticipantRole, SessionBuilder, SimulatedCaptureBackend,
//!     StaticTransportConfig, TransportConfig,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let session = SessionBuilder::new()
//!     .email("therapist@example.com")
//!     .role(ParticipantRole::Therapist)
//!     .auto_answer(false)
//!     .substrate(Arc::new(MemoryRendezvous::new()))
//!     .capture_backend(Arc::new(SimulatedCaptureBackend::new()))
//!     .transport_source(Arc::new(StaticTransportConfig(TransportConfig::fallback([
//!         "stun:stun.example.org:3478",
//!     ]))))
//!     .build()
//!     .await
//!     .expect("session starts");
//!
//! assert_eq!(session.transport_config().relay_count(), 0);
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::config::{ClientConfig, ParticipantRole, VideoDisablePolicy};
use super::facade::SessionFacade;
use super::recovery::ReconnectPolicy;
use crate::error::{ClientError, ClientResult};
use crate::identity::LocalIdentity;
use crate::media::CaptureBackend;
use crate::substrate::RendezvousSubstrate;
use crate::transport::{HttpTransportConfigResolver, TransportConfigSource};

/// Builder for [`SessionFacade`]
pub struct SessionBuilder {
    config: ClientConfig,
    substrate: Option<Arc<dyn RendezvousSubstrate>>,
    capture: Option<Arc<dyn CaptureBackend>>,
    transport_source: Option<Arc<dyn TransportConfigSource>>,
}

impl SessionBuilder {
    /// Start from [`ClientConfig::default`]
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            substrate: None,
            capture: None,
            transport_source: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Authenticated e-mail the identity is derived from
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.config.email = Some(email.into());
        self
    }

    pub fn role(mut self, role: ParticipantRole) -> Self {
        self.config.role = role;
        self
    }

    /// Answer inbound calls without an explicit accept
    pub fn auto_answer(mut self, auto_answer: bool) -> Self {
        self.config.auto_answer = auto_answer;
        self
    }

    /// How long an inbound call rings before it is missed
    pub fn ring_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_ring_timeout(timeout);
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    pub fn video_disable_policy(mut self, policy: VideoDisablePolicy) -> Self {
        self.config.video_disable_policy = policy;
        self
    }

    /// Open camera and microphone during bootstrap
    pub fn acquire_media_on_start(mut self, acquire: bool) -> Self {
        self.config.acquire_media_on_start = acquire;
        self
    }

    /// Rendezvous substrate to register with (required)
    pub fn substrate(mut self, substrate: Arc<dyn RendezvousSubstrate>) -> Self {
        self.substrate = Some(substrate);
        self
    }

    /// Camera and microphone backend (required)
    pub fn capture_backend(mut self, capture: Arc<dyn CaptureBackend>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Where relay credentials come from
    ///
    /// Defaults to an HTTP resolver built from the configured relay settings.
    pub fn transport_source(mut self, source: Arc<dyn TransportConfigSource>) -> Self {
        self.transport_source = Some(source);
        self
    }

    /// Validate, resolve transport, register and start the session
    pub async fn build(self) -> ClientResult<SessionFacade> {
        self.config.validate()?;
        let substrate = self.substrate.ok_or_else(|| ClientError::InvalidConfiguration {
            field: "substrate".into(),
            reason: "a rendezvous substrate is required".into(),
        })?;
        let capture = self.capture.ok_or_else(|| ClientError::InvalidConfiguration {
            field: "capture_backend".into(),
            reason: "a capture backend is required".into(),
        })?;
        let source = match self.transport_source {
            Some(source) => source,
            None => Arc::from(HttpTransportConfigResolver::from_relay_config(
                &self.config.relay,
            )),
        };

        let transport = source.resolve().await;
        debug!(
            servers = transport.ice_servers.len(),
            relays = transport.relay_count(),
            "Transport configuration resolved"
        );
        let identity = LocalIdentity::derive(self.config.email.as_deref());
        Ok(SessionFacade::start(
            self.config,
            substrate,
            capture,
            transport,
            identity,
        ))
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SimulatedCaptureBackend;

    #[tokio::test]
    async fn build_requires_a_substrate() {
        let err = SessionBuilder::new()
            .capture_backend(Arc::new(SimulatedCaptureBackend::new()))
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfiguration { ref field, .. } if field == "substrate"));
    }

    #[test]
    fn fluent_setters_update_config() {
        let builder = SessionBuilder::new()
            .email("a@b.c")
            .role(ParticipantRole::Therapist)
            .auto_answer(false)
            .ring_timeout(Duration::from_secs(10))
            .video_disable_policy(VideoDisablePolicy::Release);
        assert_eq!(builder.config.email.as_deref(), Some("a@b.c"));
        assert_eq!(builder.config.role, ParticipantRole::Therapist);
        assert!(!builder.config.auto_answer);
        assert_eq!(builder.config.ring_timeout_secs, 10);
        assert_eq!(builder.config.video_disable_policy, VideoDisablePolicy::Release);
    }
}
