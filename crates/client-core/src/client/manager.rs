//! Session event loop
//!
//! All mutable session state lives in one [`SessionCore`] owned by a single
//! tokio task. Substrate callbacks, timers, media completions and facade
//! commands are funneled into one unbounded queue and applied strictly in
//! arrival order, so there is exactly one authoritative call record and no
//! handler ever races another.
//!
//! ```text
//!  registration events ──┐
//!  connection events ────┤
//!  data events ──────────┼──► mpsc ──► SessionCore::handle_input ──┬──► watch<SessionStatus>
//!  timers / media ───────┤                                         └──► broadcast<ClientEvent>
//!  facade commands ──────┘
//! ```
//!
//! Every timer and forwarder input is tagged (call id, link id, stimulus
//! generation) so inputs that outlive the state they were created for are
//! recognised and dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::calls::CallRecord;
use super::config::ClientConfig;
use super::events::SessionEvents;
use crate::call::{CallId, CallInfo, CallPhase};
use crate::control::{ControlChannel, ControlMessage, LinkId, MessageHandler, Stimulus};
use crate::error::{ClientError, ClientResult};
use crate::events::{MediaEventType, SessionStatus, StatusCategory};
use crate::identity::LocalIdentity;
use crate::media::{MediaAccessError, MediaAcquirer, MediaTrack, TrackKind};
use crate::registration::{RegistrationInfo, RegistrationStatus};
use crate::substrate::{
    ConnectionEvent, DataEvent, Registration, RegistrationEvent, RegistrationHandle,
};
use crate::transport::TransportConfig;

pub(crate) type SharedMedia = Arc<Mutex<MediaAcquirer>>;
pub(crate) type InputSender = mpsc::UnboundedSender<SessionInput>;
pub(crate) type StatusSender = Arc<watch::Sender<SessionStatus>>;

/// Everything the loop reacts to
pub(crate) enum SessionInput {
    Command(Command),
    Registration(RegistrationEvent),
    Connection {
        call_id: CallId,
        link_id: LinkId,
        event: ConnectionEvent,
    },
    Data {
        remote: LocalIdentity,
        link_id: LinkId,
        event: DataEvent,
    },
    MediaAcquired(Result<Vec<MediaTrack>, MediaAccessError>),
    RingTimeout {
        call_id: CallId,
    },
    ReconnectDue {
        call_id: CallId,
        attempt: u32,
    },
    StimulusExpired {
        generation: u64,
    },
}

/// Requests from the facade
pub(crate) enum Command {
    PlaceCall {
        remote: LocalIdentity,
        reply: oneshot::Sender<ClientResult<CallId>>,
    },
    HangUp {
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Accept {
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Reject {
        reply: oneshot::Sender<ClientResult<()>>,
    },
    /// The acquirer's tracks changed under the facade's lock
    MediaChanged {
        tracks: Vec<MediaTrack>,
        /// New tracks to splice into live connections
        replaced: Vec<MediaTrack>,
        /// Tell the counterparty our camera state
        announce_video: Option<bool>,
        event: Option<MediaEventType>,
        reply: oneshot::Sender<()>,
    },
    SendControl {
        message: ControlMessage,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    OnMessage(MessageHandler),
    CurrentCall {
        reply: oneshot::Sender<Option<CallInfo>>,
    },
    Registration {
        reply: oneshot::Sender<RegistrationInfo>,
    },
    Shutdown {
        reply: Option<oneshot::Sender<()>>,
    },
}

/// Collaborators handed to a new loop
pub(crate) struct CoreParts {
    pub config: ClientConfig,
    pub identity: LocalIdentity,
    pub transport: TransportConfig,
    pub registration: Registration,
    pub media: SharedMedia,
    pub status: StatusSender,
    pub events: SessionEvents,
    pub handlers: Vec<MessageHandler>,
}

/// State owned by the session task
pub(crate) struct SessionCore {
    pub(super) config: ClientConfig,
    pub(super) identity: LocalIdentity,
    pub(super) inputs: InputSender,
    pub(super) registration: Option<Arc<dyn RegistrationHandle>>,
    pub(super) registration_info: RegistrationInfo,
    pub(super) media: SharedMedia,
    /// Clones of the acquirer's live tracks, attached to new connections
    pub(super) local_tracks: Vec<MediaTrack>,
    media_pending: bool,
    pub(super) call: Option<CallRecord>,
    /// Calls waiting for local media, drained in order once it arrives
    pub(super) awaiting_media: VecDeque<CallId>,
    pub(super) control: ControlChannel,
    pub(super) stimulus: Stimulus,
    pub(super) remote_video_enabled: bool,
    status_text: String,
    status_category: StatusCategory,
    status_tx: StatusSender,
    pub(super) events: SessionEvents,
    tasks: Vec<JoinHandle<()>>,
    pub(super) next_link_id: LinkId,
}

/// Pump `events` into the loop until either side goes away
pub(super) fn forward<E, F>(
    mut events: mpsc::UnboundedReceiver<E>,
    inputs: InputSender,
    wrap: F,
) -> JoinHandle<()>
where
    E: Send + 'static,
    F: Fn(E) -> SessionInput + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if inputs.send(wrap(event)).is_err() {
                break;
            }
        }
    })
}

impl SessionCore {
    /// Build the core and spawn its task
    pub(crate) fn spawn(parts: CoreParts) -> (InputSender, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let CoreParts {
            config,
            identity,
            transport,
            registration,
            media,
            status,
            events,
            handlers,
        } = parts;

        let Registration {
            handle,
            events: registration_events,
        } = registration;
        let registration_forwarder = forward(registration_events, tx.clone(), SessionInput::Registration);

        let mut control = ControlChannel::new();
        for handler in handlers {
            control.on_message(handler);
        }

        let mut core = SessionCore {
            stimulus: Stimulus::new(config.stimulus.clone()),
            registration_info: RegistrationInfo::pending(identity.clone(), transport.relay_count()),
            config,
            identity,
            inputs: tx.clone(),
            registration: Some(handle),
            media,
            local_tracks: Vec::new(),
            media_pending: false,
            call: None,
            awaiting_media: VecDeque::new(),
            control,
            remote_video_enabled: true,
            status_text: String::new(),
            status_category: StatusCategory::Idle,
            status_tx: status,
            events,
            tasks: vec![registration_forwarder],
            next_link_id: 0,
        };
        core.set_status("Registering…", StatusCategory::Registering);

        let task = tokio::spawn(core.run(rx));
        (tx, task)
    }

    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<SessionInput>) {
        info!(identity = %self.identity, "Session loop started");
        if self.config.acquire_media_on_start {
            self.request_media();
        }
        self.publish();

        while let Some(input) = inputs.recv().await {
            if let SessionInput::Command(Command::Shutdown { reply }) = input {
                self.shutdown().await;
                self.publish();
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                info!(identity = %self.identity, "Session loop stopped");
                return;
            }
            self.handle_input(input);
            self.publish();
        }
        self.shutdown().await;
    }

    fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Command(command) => self.handle_command(command),
            SessionInput::Registration(event) => self.handle_registration_event(event),
            SessionInput::Connection {
                call_id,
                link_id,
                event,
            } => self.handle_connection_event(call_id, link_id, event),
            SessionInput::Data {
                remote,
                link_id,
                event,
            } => self.handle_data_event(remote, link_id, event),
            SessionInput::MediaAcquired(result) => self.handle_media_acquired(result),
            SessionInput::RingTimeout { call_id } => self.handle_ring_timeout(call_id),
            SessionInput::ReconnectDue { call_id, attempt } => {
                self.handle_reconnect_due(call_id, attempt)
            }
            SessionInput::StimulusExpired { generation } => {
                self.handle_stimulus_expired(generation)
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::PlaceCall { remote, reply } => {
                let result = self.place_call(remote);
                self.reply(reply, result);
            }
            Command::HangUp { reply } => {
                let result = self.hang_up();
                self.reply(reply, result);
            }
            Command::Accept { reply } => {
                let result = self.accept_call();
                self.reply(reply, result);
            }
            Command::Reject { reply } => {
                let result = self.reject_call();
                self.reply(reply, result);
            }
            Command::MediaChanged {
                tracks,
                replaced,
                announce_video,
                event,
                reply,
            } => {
                self.handle_media_changed(tracks, replaced, announce_video, event);
                self.reply(reply, ());
            }
            Command::SendControl { message, reply } => {
                let result = self.send_control(message);
                self.reply(reply, result);
            }
            Command::OnMessage(handler) => self.control.on_message(handler),
            Command::CurrentCall { reply } => {
                let _ = reply.send(self.call.as_ref().map(|c| c.info.clone()));
            }
            Command::Registration { reply } => {
                let _ = reply.send(self.registration_info.clone());
            }
            // Handled by `run`
            Command::Shutdown { .. } => {}
        }
    }

    /// Publish first so the caller observes the state its command produced
    fn reply<T>(&self, reply: oneshot::Sender<T>, value: T) {
        self.publish();
        let _ = reply.send(value);
    }

    fn handle_registration_event(&mut self, event: RegistrationEvent) {
        match event {
            RegistrationEvent::Opened => {
                self.registration_info.mark_opened();
                info!(identity = %self.identity, "Registered with rendezvous substrate");
                self.events
                    .registration(&self.identity, RegistrationStatus::Active, None);
                // A media failure reported first stays visible
                if !self.call.as_ref().is_some_and(CallRecord::is_active)
                    && !self.status_category.is_error()
                {
                    self.set_status("Ready", StatusCategory::Ready);
                }
            }
            RegistrationEvent::IncomingCall { remote, link } => {
                self.handle_incoming_call(remote, link)
            }
            RegistrationEvent::IncomingData { remote, link } => {
                debug!(remote = %remote, "Incoming control channel");
                self.attach_data_link(remote, link);
            }
            RegistrationEvent::Error(reason) => {
                if self.registration_info.mark_error(&reason) {
                    error!(identity = %self.identity, error = %reason, "Registration failed");
                    self.events.registration(
                        &self.identity,
                        RegistrationStatus::Failed,
                        Some(reason.clone()),
                    );
                    self.events.error(
                        ClientError::RegistrationFailed {
                            reason: reason.clone(),
                        },
                        None,
                    );
                    self.set_status(
                        format!("Registration error: {}", reason),
                        StatusCategory::RegistrationError,
                    );
                } else {
                    warn!(identity = %self.identity, error = %reason, "Rendezvous error");
                }
            }
            RegistrationEvent::Disconnected => {
                warn!(identity = %self.identity, "Lost connection to rendezvous server");
                self.registration_info.status = RegistrationStatus::Disconnected;
                self.events
                    .registration(&self.identity, RegistrationStatus::Disconnected, None);
            }
            RegistrationEvent::Closed => {
                info!(identity = %self.identity, "Registration closed");
                if self.registration_info.status != RegistrationStatus::Failed {
                    self.registration_info.status = RegistrationStatus::Closed;
                }
                self.events
                    .registration(&self.identity, RegistrationStatus::Closed, None);
            }
        }
    }

    /// Start acquiring local media unless an acquisition is already running
    pub(super) fn request_media(&mut self) {
        if self.media_pending {
            return;
        }
        self.media_pending = true;
        debug!("Requesting local media");
        let media = self.media.clone();
        let inputs = self.inputs.clone();
        let task = tokio::spawn(async move {
            let result = {
                let mut acquirer = media.lock().await;
                acquirer
                    .acquire_default()
                    .await
                    .map(|handle| handle.tracks().to_vec())
            };
            let _ = inputs.send(SessionInput::MediaAcquired(result));
        });
        self.track_task(task);
    }

    fn handle_media_acquired(&mut self, result: Result<Vec<MediaTrack>, MediaAccessError>) {
        self.media_pending = false;
        match result {
            Ok(tracks) => {
                info!(tracks = tracks.len(), "Local media ready");
                self.events.media(
                    self.call.as_ref().map(|c| c.info.call_id),
                    MediaEventType::LocalMediaAcquired {
                        tracks: tracks.len(),
                    },
                );
                self.local_tracks = tracks;
                self.drain_awaiting_media();
            }
            Err(e) => {
                warn!(error = %e, "Local media unavailable");
                self.events.media(
                    self.call.as_ref().map(|c| c.info.call_id),
                    MediaEventType::LocalMediaFailed {
                        reason: e.to_string(),
                    },
                );
                self.fail_awaiting_media(e);
            }
        }
    }

    fn handle_media_changed(
        &mut self,
        tracks: Vec<MediaTrack>,
        replaced: Vec<MediaTrack>,
        announce_video: Option<bool>,
        event: Option<MediaEventType>,
    ) {
        self.local_tracks = tracks;
        let call_id = self.call.as_ref().map(|c| c.info.call_id);
        if let Some(event) = event {
            self.events.media(call_id, event);
        }

        if !replaced.is_empty() {
            if let Some(connection) = self.call.as_ref().and_then(CallRecord::live_connection) {
                for track in replaced {
                    match connection.replace_track(track.clone()) {
                        Ok(()) => debug!(track = track.id(), kind = %track.kind(), "Replaced track on live connection"),
                        Err(e) => warn!(track = track.id(), error = %e, "Track replacement failed"),
                    }
                }
            }
        }

        if let Some(enabled) = announce_video {
            self.announce(ControlMessage::VideoEnabled(enabled));
        }
    }

    /// Sleep for `delay`, then post `input`
    pub(super) fn schedule(&self, delay: Duration, input: SessionInput) -> JoinHandle<()> {
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inputs.send(input);
        })
    }

    /// Keep a spawned helper so shutdown can abort it
    pub(super) fn track_task(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    /// Replace the status line, emitting an event when it changed
    pub(super) fn set_status(&mut self, text: impl Into<String>, category: StatusCategory) {
        let text = text.into();
        if text == self.status_text && category == self.status_category {
            return;
        }
        debug!(status = %text, category = ?category, "Status changed");
        self.events.status(&text, category);
        self.status_text = text;
        self.status_category = category;
    }

    pub(super) fn status_category(&self) -> StatusCategory {
        self.status_category
    }

    fn track_enabled(&self, kind: TrackKind) -> bool {
        self.local_tracks
            .iter()
            .any(|t| t.kind() == kind && t.is_live() && t.is_enabled())
    }

    fn snapshot(&self) -> SessionStatus {
        let call = self.call.as_ref();
        let phase = call.map(|c| c.info.phase);
        SessionStatus {
            text: self.status_text.clone(),
            category: self.status_category,
            call_id: call.map(|c| c.info.call_id),
            phase,
            connected: phase == Some(CallPhase::Connected),
            ringing: call.is_some_and(|c| c.info.phase == CallPhase::RingingInbound && !c.accepted),
            remote_identity: call.map(|c| c.info.remote.clone()),
            remote_video_enabled: self.remote_video_enabled,
            local_audio_enabled: self.track_enabled(TrackKind::Audio),
            local_video_enabled: self.track_enabled(TrackKind::Video),
            has_local_media: !self.local_tracks.is_empty(),
            stimulus_active: self.stimulus.is_active(),
            stimulus_settings: self.stimulus.settings().clone(),
            registered: self.registration_info.status.is_registered(),
            local_identity: Some(self.identity.clone()),
            remote_stream: call
                .filter(|c| c.info.phase == CallPhase::Connected)
                .and_then(|c| c.remote_stream.clone()),
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    async fn shutdown(&mut self) {
        self.terminate_call("session closed");
        self.awaiting_media.clear();
        self.control.close_all();
        self.stop_stimulus();
        if let Some(registration) = self.registration.take() {
            registration.destroy();
        }
        if self.registration_info.status != RegistrationStatus::Failed {
            self.registration_info.status = RegistrationStatus::Closed;
        }
        // An aborted acquisition stops its partial tracks when its future drops
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        self.media.lock().await.release();
        self.local_tracks.clear();
        self.set_status("Session closed", StatusCategory::Idle);
    }
}
