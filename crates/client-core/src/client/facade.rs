//! Session facade
//!
//! [`SessionFacade`] is the only object the presentation layer talks to. It
//! owns the collaborators that outlive an identity (capture, substrate,
//! resolved transport configuration, the event and status channels) and a
//! handle to the current session loop. Commands go to the loop with a
//! oneshot reply; media operations run here under the acquirer's lock and
//! the loop is told about the resulting tracks afterwards.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use emdr_client_core::{ClientConfig, MemoryRendezvous, SessionFacade, SimulatedCaptureBackend};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let hub = MemoryRendezvous::new();
//! let session = SessionFacade::builder()
//!     .config(ClientConfig::new().with_email("alice@example.com"))
//!     .substrate(Arc::new(hub.clone()))
//!     .capture_backend(Arc::new(SimulatedCaptureBackend::new()))
//!     .build()
//!     .await
//!     .unwrap();
//!
//! assert_eq!(session.local_identity().as_str(), "alice-example-com");
//! session.shutdown().await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::builder::SessionBuilder;
use super::config::{ClientConfig, VideoDisablePolicy};
use super::events::SessionEvents;
use super::manager::{Command, CoreParts, InputSender, SessionCore, SessionInput, SharedMedia, StatusSender};
use crate::call::{CallId, CallInfo};
use crate::control::{ControlMessage, MessageHandler, StimulusSettings};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, MediaEventType, SessionStatus};
use crate::identity::LocalIdentity;
use crate::media::{CaptureBackend, DeviceInfo, MediaAccessError, MediaAcquirer, MediaTrack, TrackKind};
use crate::registration::RegistrationInfo;
use crate::substrate::RendezvousSubstrate;
use crate::transport::TransportConfig;

/// One incarnation of the session loop, bound to one identity
struct SessionHandle {
    identity: LocalIdentity,
    inputs: InputSender,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Imperative and reactive API over one video session
pub struct SessionFacade {
    config: ClientConfig,
    substrate: Arc<dyn RendezvousSubstrate>,
    transport: TransportConfig,
    media: SharedMedia,
    events: SessionEvents,
    status: StatusSender,
    /// Replayed into every rebuilt loop
    handlers: Mutex<Vec<MessageHandler>>,
    session: RwLock<Arc<SessionHandle>>,
}

impl std::fmt::Debug for SessionFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFacade")
            .field("identity", &self.current().identity)
            .field("role", &self.config.role)
            .field("relays", &self.transport.relay_count())
            .finish()
    }
}

impl SessionFacade {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Register `identity` and start the loop
    pub(crate) fn start(
        config: ClientConfig,
        substrate: Arc<dyn RendezvousSubstrate>,
        capture: Arc<dyn CaptureBackend>,
        transport: TransportConfig,
        identity: LocalIdentity,
    ) -> Self {
        let media = Arc::new(tokio::sync::Mutex::new(MediaAcquirer::new(
            capture,
            config.media.clone(),
        )));
        let events = SessionEvents::new(config.event_buffer);
        let (status, _) = watch::channel(SessionStatus::default());

        let status: StatusSender = Arc::new(status);
        let handle = launch(
            &config,
            &substrate,
            &transport,
            &media,
            &status,
            &events,
            identity,
            Vec::new(),
        );

        Self {
            config,
            substrate,
            transport,
            media,
            events,
            status,
            handlers: Mutex::new(Vec::new()),
            session: RwLock::new(Arc::new(handle)),
        }
    }

    fn current(&self) -> Arc<SessionHandle> {
        self.session.read().clone()
    }

    fn send(&self, command: Command) -> ClientResult<()> {
        self.current()
            .inputs
            .send(SessionInput::Command(command))
            .map_err(|_| ClientError::SessionClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> ClientResult<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub fn local_identity(&self) -> LocalIdentity {
        self.current().identity.clone()
    }

    /// Transport configuration resolved at bootstrap
    pub fn transport_config(&self) -> &TransportConfig {
        &self.transport
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Latest status snapshot
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that sees every status change
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Stream of session events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Call `remote`
    ///
    /// Returns once the attempt is under way; progress shows up in the
    /// status. Fails only for an invalid remote id, a call already in
    /// progress, or a missing registration.
    pub async fn connect(&self, remote: &str) -> ClientResult<CallId> {
        let remote = LocalIdentity::parse(remote)?;
        self.request(|reply| Command::PlaceCall { remote, reply })
            .await?
    }

    /// Hang up the active call; no-op without one
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.request(|reply| Command::HangUp { reply }).await?
    }

    /// Answer the ringing inbound call; no-op without one
    pub async fn accept_call(&self) -> ClientResult<()> {
        self.request(|reply| Command::Accept { reply }).await?
    }

    /// Reject the ringing inbound call; no-op without one
    pub async fn reject_call(&self) -> ClientResult<()> {
        self.request(|reply| Command::Reject { reply }).await?
    }

    /// Current (or last) call record
    pub async fn current_call(&self) -> ClientResult<Option<CallInfo>> {
        self.request(|reply| Command::CurrentCall { reply }).await
    }

    pub async fn registration(&self) -> ClientResult<RegistrationInfo> {
        self.request(|reply| Command::Registration { reply }).await
    }

    /// Mute or unmute the microphone; returns the new state
    pub async fn toggle_audio(&self) -> ClientResult<bool> {
        let mut media = self.media.lock().await;
        if !media.has_media() {
            return Err(MediaAccessError::NotAcquired.into());
        }
        let enabled = !media.is_enabled(TrackKind::Audio);
        media.set_track_enabled(TrackKind::Audio, enabled);
        let tracks = media.tracks();
        drop(media);

        debug!(enabled, "Local audio toggled");
        self.media_changed(
            tracks,
            Vec::new(),
            None,
            Some(MediaEventType::TrackEnabledChanged {
                kind: TrackKind::Audio,
                enabled,
            }),
        )
        .await?;
        Ok(enabled)
    }

    /// Turn the camera on or off and tell the counterparty; returns the new
    /// state
    ///
    /// With [`VideoDisablePolicy::Release`] the camera track is stopped and
    /// re-opened, and the new track replaces the old one on the live call.
    pub async fn toggle_video(&self) -> ClientResult<bool> {
        let mut media = self.media.lock().await;
        if !media.has_media() {
            return Err(MediaAccessError::NotAcquired.into());
        }
        let enabled = !media.is_enabled(TrackKind::Video);
        let mut replaced = Vec::new();
        match self.config.video_disable_policy {
            VideoDisablePolicy::Mute => {
                media.set_track_enabled(TrackKind::Video, enabled);
            }
            VideoDisablePolicy::Release if enabled => {
                replaced.push(media.restore_kind(TrackKind::Video).await?);
            }
            VideoDisablePolicy::Release => {
                media.stop_kind(TrackKind::Video);
            }
        }
        let tracks = media.tracks();
        drop(media);

        debug!(enabled, policy = ?self.config.video_disable_policy, "Local video toggled");
        self.media_changed(
            tracks,
            replaced,
            Some(enabled),
            Some(MediaEventType::TrackEnabledChanged {
                kind: TrackKind::Video,
                enabled,
            }),
        )
        .await?;
        Ok(enabled)
    }

    /// Capture `kind` from another device, replacing the track on the live
    /// call without renegotiating
    pub async fn switch_device(&self, kind: TrackKind, device_id: &str) -> ClientResult<()> {
        let mut media = self.media.lock().await;
        let result = media.switch_device(kind, device_id).await;
        let tracks = media.tracks();
        drop(media);

        match result {
            Ok(Some(track)) => {
                self.media_changed(
                    tracks,
                    vec![track],
                    None,
                    Some(MediaEventType::DeviceSwitched {
                        kind,
                        device_id: device_id.to_string(),
                    }),
                )
                .await
            }
            Ok(None) => {
                debug!(kind = %kind, device = device_id, "No capture active, device remembered");
                Ok(())
            }
            Err(e) => {
                self.media_changed(
                    tracks,
                    Vec::new(),
                    None,
                    Some(MediaEventType::LocalMediaFailed {
                        reason: e.to_string(),
                    }),
                )
                .await?;
                Err(e.into())
            }
        }
    }

    /// Input devices, optionally of one kind
    pub async fn list_devices(&self, kind: Option<TrackKind>) -> ClientResult<Vec<DeviceInfo>> {
        let media = self.media.lock().await;
        Ok(media.list_devices(kind).await?)
    }

    /// Handles of the local tracks
    pub async fn local_tracks(&self) -> Vec<MediaTrack> {
        self.media.lock().await.tracks()
    }

    async fn media_changed(
        &self,
        tracks: Vec<MediaTrack>,
        replaced: Vec<MediaTrack>,
        announce_video: Option<bool>,
        event: Option<MediaEventType>,
    ) -> ClientResult<()> {
        self.request(|reply| Command::MediaChanged {
            tracks,
            replaced,
            announce_video,
            event,
            reply,
        })
        .await
    }

    /// Send a control message to the counterparty of the active call
    pub async fn send_control(&self, message: ControlMessage) -> ClientResult<()> {
        self.request(|reply| Command::SendControl { message, reply })
            .await?
    }

    pub async fn start_stimulus(&self) -> ClientResult<()> {
        self.send_control(ControlMessage::StimulusStart).await
    }

    pub async fn stop_stimulus(&self) -> ClientResult<()> {
        self.send_control(ControlMessage::StimulusStop).await
    }

    /// Push new stimulus settings to both ends
    pub async fn update_stimulus_settings(&self, settings: StimulusSettings) -> ClientResult<()> {
        self.send_control(ControlMessage::Settings(settings)).await
    }

    /// Subscribe to every decoded inbound control message
    pub fn on_message<F>(&self, handler: F) -> ClientResult<()>
    where
        F: Fn(&LocalIdentity, &ControlMessage) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        self.handlers.lock().push(handler.clone());
        self.send(Command::OnMessage(handler))
    }

    /// Re-derive the identity from `email`; a different identity tears the
    /// session down and registers again
    pub async fn set_identity(&self, email: Option<&str>) -> ClientResult<()> {
        let identity = LocalIdentity::derive(email);
        let previous = self.local_identity();
        if identity == previous {
            return Ok(());
        }
        info!(from = %previous, to = %identity, "Local identity changed, rebuilding session");
        self.stop_current().await;

        let handlers = self.handlers.lock().clone();
        let handle = launch(
            &self.config,
            &self.substrate,
            &self.transport,
            &self.media,
            &self.status,
            &self.events,
            identity,
            handlers,
        );
        *self.session.write() = Arc::new(handle);
        Ok(())
    }

    /// Hang up, unregister and release local media
    pub async fn shutdown(&self) -> ClientResult<()> {
        self.stop_current().await;
        Ok(())
    }

    async fn stop_current(&self) {
        let session = self.current();
        let (tx, rx) = oneshot::channel();
        let command = SessionInput::Command(Command::Shutdown { reply: Some(tx) });
        if session.inputs.send(command).is_ok() {
            let _ = rx.await;
        }
        let task = session.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for SessionFacade {
    fn drop(&mut self) {
        let session = self.session.get_mut();
        let _ = session
            .inputs
            .send(SessionInput::Command(Command::Shutdown { reply: None }));
    }
}

/// Register `identity` and spawn a loop for it
#[allow(clippy::too_many_arguments)]
fn launch(
    config: &ClientConfig,
    substrate: &Arc<dyn RendezvousSubstrate>,
    transport: &TransportConfig,
    media: &SharedMedia,
    status: &StatusSender,
    events: &SessionEvents,
    identity: LocalIdentity,
    handlers: Vec<MessageHandler>,
) -> SessionHandle {
    info!(
        identity = %identity,
        relays = transport.relay_count(),
        role = %config.role,
        "Registering session"
    );
    let registration = substrate.register(&identity, transport);
    let (inputs, task) = SessionCore::spawn(CoreParts {
        config: config.clone(),
        identity: identity.clone(),
        transport: transport.clone(),
        registration,
        media: media.clone(),
        status: status.clone(),
        events: events.clone(),
        handlers,
    });
    SessionHandle {
        identity,
        inputs,
        task: Mutex::new(Some(task)),
    }
}
