//! Call operations of the session loop
//!
//! ```text
//! idle ──place──► ringing-outbound ──remote stream──► connected
//! idle ──incoming──► ringing-inbound ──accept + media──► connected
//! ringing-inbound ──reject | ring timeout | caller gone──► ended
//! ringing-outbound ──declined──► failed
//! connected ──hang-up | remote close──► ended
//! any live ──transport failure──► failed ──(dialer, ≤ max attempts)──► ringing-outbound
//! ```
//!
//! A call that needs local media before it can be dialed or answered is
//! parked in `awaiting_media`. The queue is drained by the media completion,
//! which re-checks each record's phase before acting, so a call rejected or
//! hung up in the meantime is simply skipped.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::manager::{forward, SessionCore, SessionInput};
use super::recovery::ReconnectDecision;
use crate::call::{CallDirection, CallId, CallInfo, CallPhase};
use crate::control::LinkId;
use crate::error::{ClientError, ClientResult};
use crate::events::{MediaEventType, StatusCategory};
use crate::identity::LocalIdentity;
use crate::media::MediaAccessError;
use crate::registration::RegistrationStatus;
use crate::substrate::{
    ConnectionEvent, FailureKind, MediaConnection, MediaLink, RemoteStream,
};

/// The authoritative record of the current (or last) call
pub(crate) struct CallRecord {
    pub(super) info: CallInfo,
    pub(super) connection: Option<Arc<dyn MediaConnection>>,
    pub(super) link_id: LinkId,
    /// Local user (or auto-answer) agreed to take the inbound call
    pub(super) accepted: bool,
    /// Inbound call answered with local tracks
    pub(super) answered: bool,
    pub(super) remote_stream: Option<RemoteStream>,
    forwarder: Option<JoinHandle<()>>,
    ring_timer: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl CallRecord {
    fn new(remote: LocalIdentity, direction: CallDirection) -> Self {
        Self {
            info: CallInfo::new(remote, direction),
            connection: None,
            link_id: 0,
            accepted: false,
            answered: false,
            remote_stream: None,
            forwarder: None,
            ring_timer: None,
            reconnect_timer: None,
        }
    }

    /// Non-terminal, or failed with a re-dial scheduled
    pub(super) fn is_active(&self) -> bool {
        !self.info.phase.is_terminal() || self.reconnect_timer.is_some()
    }

    /// Connection currently carrying media, if any
    pub(super) fn live_connection(&self) -> Option<Arc<dyn MediaConnection>> {
        if self.info.phase.is_terminal() {
            return None;
        }
        self.connection.clone()
    }

    fn cancel_ring_timer(&mut self) {
        if let Some(timer) = self.ring_timer.take() {
            timer.abort();
        }
    }

    fn cancel_timers(&mut self) {
        self.cancel_ring_timer();
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    /// Close the connection and stop listening to it
    fn close_connection(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.remote_stream = None;
    }
}

impl Drop for CallRecord {
    fn drop(&mut self) {
        self.cancel_timers();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl SessionCore {
    fn current_call_id(&self) -> Option<CallId> {
        self.call.as_ref().map(|c| c.info.call_id)
    }

    /// Move the current record to `next`, emitting the change
    pub(super) fn transition(&mut self, next: CallPhase, reason: Option<String>) -> bool {
        let Some(call) = self.call.as_mut() else {
            return false;
        };
        let Some(previous) = call.info.transition(next) else {
            warn!(
                call_id = %call.info.call_id,
                from = %call.info.phase,
                to = %next,
                "Ignoring invalid call transition"
            );
            return false;
        };
        if next.is_terminal() {
            call.info.end_reason = reason.clone();
        }
        info!(
            call_id = %call.info.call_id,
            remote = %call.info.remote,
            from = %previous,
            to = %next,
            "Call phase changed"
        );
        self.events
            .call_state_changed(&call.info, Some(previous), reason);
        true
    }

    pub(super) fn place_call(&mut self, remote: LocalIdentity) -> ClientResult<CallId> {
        if remote == self.identity {
            return Err(ClientError::invalid_state("cannot call yourself"));
        }
        if self.registration.is_none()
            || matches!(
                self.registration_info.status,
                RegistrationStatus::Failed | RegistrationStatus::Closed
            )
        {
            return Err(ClientError::invalid_state(format!(
                "not registered ({})",
                self.registration_info.status
            )));
        }
        if let Some(call) = self.call.as_ref().filter(|c| c.is_active()) {
            return Err(ClientError::invalid_state(format!(
                "a call with {} is already in progress",
                call.info.remote
            )));
        }

        let record = CallRecord::new(remote.clone(), CallDirection::Outbound);
        let call_id = record.info.call_id;
        info!(call_id = %call_id, remote = %remote, "Placing call");
        self.events.call_state_changed(&record.info, None, None);
        self.call = Some(record);
        self.remote_video_enabled = true;

        if self.local_tracks.is_empty() {
            self.wait_for_media(call_id);
        } else {
            self.dial();
        }
        Ok(call_id)
    }

    /// Dial the current outbound record with the local tracks
    fn dial(&mut self) {
        let Some((call_id, remote, attempt)) = self.call.as_ref().map(|c| {
            (
                c.info.call_id,
                c.info.remote.clone(),
                c.info.reconnect_attempts,
            )
        }) else {
            return;
        };
        let Some(registration) = self.registration.clone() else {
            self.handle_transport_failure(
                call_id,
                FailureKind::Transport,
                "not registered".to_string(),
            );
            return;
        };

        match registration.dial(&remote, self.local_tracks.clone()) {
            Ok(link) => {
                debug!(call_id = %call_id, remote = %remote, attempt, "Dialed");
                self.attach_media_link(call_id, link);
                self.transition(CallPhase::RingingOutbound, None);
                if attempt == 0 {
                    self.set_status(format!("Calling {}…", remote), StatusCategory::Calling);
                }
                self.open_control_channel(&remote);
            }
            Err(e) => {
                warn!(call_id = %call_id, remote = %remote, error = %e, "Dial failed");
                self.handle_transport_failure(call_id, e.failure_kind(), e.to_string());
            }
        }
    }

    fn attach_media_link(&mut self, call_id: CallId, link: MediaLink) {
        self.next_link_id += 1;
        let link_id = self.next_link_id;
        let MediaLink { connection, events } = link;
        let forwarder = forward(events, self.inputs.clone(), move |event| {
            SessionInput::Connection {
                call_id,
                link_id,
                event,
            }
        });
        match self.call.as_mut() {
            Some(call) if call.info.call_id == call_id => {
                call.close_connection();
                call.connection = Some(connection);
                call.link_id = link_id;
                call.forwarder = Some(forwarder);
            }
            _ => {
                forwarder.abort();
                connection.close();
            }
        }
    }

    pub(super) fn handle_incoming_call(&mut self, remote: LocalIdentity, link: MediaLink) {
        let active = self.call.as_ref().filter(|c| c.is_active()).map(|c| {
            let same_ringing = c.info.remote == remote
                && c.info.direction == CallDirection::Inbound
                && c.info.phase == CallPhase::RingingInbound
                && !c.answered;
            (c.info.call_id, c.info.remote.clone(), same_ringing, c.accepted)
        });

        if let Some((call_id, current_remote, same_ringing, accepted)) = active {
            if same_ringing {
                info!(call_id = %call_id, remote = %remote, "Replacing stale inbound connection");
                self.attach_media_link(call_id, link);
                if accepted && !self.local_tracks.is_empty() {
                    self.answer();
                }
            } else {
                info!(
                    remote = %remote,
                    busy_with = %current_remote,
                    "Declining incoming call while another call is in progress"
                );
                link.connection.close();
            }
            return;
        }

        let record = CallRecord::new(remote.clone(), CallDirection::Inbound);
        let call_id = record.info.call_id;
        self.call = Some(record);
        self.remote_video_enabled = true;
        self.attach_media_link(call_id, link);
        self.transition(CallPhase::RingingInbound, None);

        let auto_answer = self.config.auto_answer;
        info!(call_id = %call_id, remote = %remote, auto_answer, "Incoming call");
        if let Some(call) = self.call.as_ref() {
            self.events.incoming_call(&call.info, auto_answer);
        }
        self.set_status(format!("Incoming call from {}", remote), StatusCategory::Ringing);

        if auto_answer {
            self.accept_record();
        } else {
            self.start_ring_timer();
        }
    }

    fn start_ring_timer(&mut self) {
        let Some(call_id) = self.current_call_id() else {
            return;
        };
        let timer = self.schedule(self.config.ring_timeout(), SessionInput::RingTimeout { call_id });
        if let Some(call) = self.call.as_mut() {
            call.cancel_ring_timer();
            call.ring_timer = Some(timer);
        }
    }

    pub(super) fn handle_ring_timeout(&mut self, call_id: CallId) {
        let Some(call) = self.call.as_mut().filter(|c| c.info.call_id == call_id) else {
            return;
        };
        if call.info.phase != CallPhase::RingingInbound || call.answered {
            return;
        }
        if call.accepted {
            // Waiting for media, not for the user
            return;
        }
        call.ring_timer = None;
        call.close_connection();
        let remote = call.info.remote.clone();
        info!(call_id = %call_id, remote = %remote, "Inbound call not answered in time");
        self.transition(CallPhase::Ended, Some("missed".into()));
        self.set_status(format!("Missed call from {}", remote), StatusCategory::Missed);
        self.release_call_resources();
    }

    fn accept_record(&mut self) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        call.accepted = true;
        call.cancel_ring_timer();
        let call_id = call.info.call_id;
        if self.local_tracks.is_empty() {
            self.wait_for_media(call_id);
        } else {
            self.answer();
        }
    }

    /// Answer the current inbound record with the local tracks
    fn answer(&mut self) {
        let tracks = self.local_tracks.clone();
        let Some(call) = self.call.as_mut() else {
            return;
        };
        let Some(connection) = call.connection.clone() else {
            return;
        };
        let call_id = call.info.call_id;
        let remote = call.info.remote.clone();

        match connection.answer(tracks) {
            Ok(()) => {
                call.answered = true;
                call.cancel_ring_timer();
                self.transition(CallPhase::Connected, None);
                self.set_status(format!("Connected to {}", remote), StatusCategory::Connected);
            }
            Err(e) => {
                warn!(call_id = %call_id, remote = %remote, error = %e, "Answer failed");
                self.handle_transport_failure(call_id, FailureKind::Transport, e.to_string());
            }
        }
    }

    pub(super) fn accept_call(&mut self) -> ClientResult<()> {
        match self.call.as_ref() {
            Some(call) if call.info.phase == CallPhase::RingingInbound && !call.accepted => {
                info!(call_id = %call.info.call_id, "Accepting call");
                self.accept_record();
            }
            _ => debug!("No ringing call to accept"),
        }
        Ok(())
    }

    pub(super) fn reject_call(&mut self) -> ClientResult<()> {
        let Some(call) = self
            .call
            .as_mut()
            .filter(|c| c.info.phase == CallPhase::RingingInbound)
        else {
            debug!("No ringing call to reject");
            return Ok(());
        };
        call.cancel_timers();
        call.close_connection();
        let remote = call.info.remote.clone();
        info!(call_id = %call.info.call_id, remote = %remote, "Rejecting call");
        self.transition(CallPhase::Ended, Some("rejected".into()));
        self.set_status(format!("Call from {} rejected", remote), StatusCategory::Rejected);
        self.release_call_resources();
        Ok(())
    }

    pub(super) fn hang_up(&mut self) -> ClientResult<()> {
        if self.terminate_call("hang-up") {
            self.set_status("Disconnected", StatusCategory::Ended);
        } else {
            debug!("No active call to hang up");
        }
        Ok(())
    }

    /// End the active call from our side; returns whether there was one
    pub(super) fn terminate_call(&mut self, reason: &str) -> bool {
        let Some(call) = self.call.as_mut().filter(|c| c.is_active()) else {
            return false;
        };
        call.cancel_timers();
        call.close_connection();
        call.info.reconnect_attempts = 0;
        info!(call_id = %call.info.call_id, remote = %call.info.remote, reason, "Ending call");
        self.transition(CallPhase::Ended, Some(reason.to_string()));
        self.release_call_resources();
        true
    }

    pub(super) fn handle_connection_event(
        &mut self,
        call_id: CallId,
        link_id: LinkId,
        event: ConnectionEvent,
    ) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        if call.info.call_id != call_id || call.link_id != link_id || call.info.phase.is_terminal() {
            debug!(call_id = %call_id, link_id, "Ignoring event from a stale connection");
            return;
        }

        match event {
            ConnectionEvent::RemoteStream(stream) => {
                let kinds = stream.kinds.clone();
                call.remote_stream = Some(stream);
                let phase = call.info.phase;
                let remote = call.info.remote.clone();
                self.events
                    .media(Some(call_id), MediaEventType::RemoteStreamStarted { kinds });
                if phase == CallPhase::RingingOutbound {
                    self.transition(CallPhase::Connected, None);
                    self.set_status(format!("Connected to {}", remote), StatusCategory::Connected);
                }
            }
            ConnectionEvent::Closed => self.handle_remote_close(),
            ConnectionEvent::Failed { kind, reason } => {
                self.handle_transport_failure(call_id, kind, reason)
            }
        }
    }

    /// Graceful close by the counterparty (or its substrate)
    fn handle_remote_close(&mut self) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        call.cancel_timers();
        call.close_connection();
        let remote = call.info.remote.clone();
        let phase = call.info.phase;
        match phase {
            CallPhase::RingingOutbound => {
                self.transition(CallPhase::Failed, Some("declined".into()));
                self.set_status(format!("{} declined the call", remote), StatusCategory::Rejected);
            }
            CallPhase::RingingInbound => {
                self.transition(CallPhase::Ended, Some("missed".into()));
                self.set_status(format!("Missed call from {}", remote), StatusCategory::Missed);
            }
            CallPhase::Connected => {
                self.transition(CallPhase::Ended, Some("remote closed".into()));
                self.set_status("Call ended", StatusCategory::Ended);
            }
            CallPhase::Idle | CallPhase::Ended | CallPhase::Failed => {}
        }
        self.release_call_resources();
    }

    /// Terminal bad state of the connection (or a dial that never started)
    ///
    /// An unreachable peer on a call that never connected fails at once;
    /// everything else on the dialing side goes through the reconnect policy.
    pub(super) fn handle_transport_failure(
        &mut self,
        call_id: CallId,
        kind: FailureKind,
        reason: String,
    ) {
        let Some(call) = self.call.as_mut().filter(|c| c.info.call_id == call_id) else {
            return;
        };
        if call.info.phase == CallPhase::Ended {
            return;
        }
        call.cancel_timers();
        call.close_connection();
        let remote = call.info.remote.clone();
        let direction = call.info.direction;
        let attempts = call.info.reconnect_attempts;
        let already_failed = call.info.phase == CallPhase::Failed;
        let ever_connected = call.info.connected_at.is_some();

        warn!(call_id = %call_id, remote = %remote, error = %reason, "Call transport failed");
        if !already_failed {
            self.transition(CallPhase::Failed, Some(reason.clone()));
        }
        self.events.error(
            ClientError::TransportNegotiation {
                reason: reason.clone(),
            },
            Some(call_id),
        );
        self.control.close(&remote);

        if direction == CallDirection::Inbound {
            // The dialer owns reconnection
            self.set_status(
                format!("Connection to {} lost", remote),
                StatusCategory::TransportError,
            );
            self.release_call_resources();
            return;
        }

        if kind == FailureKind::PeerUnavailable && !ever_connected {
            info!(call_id = %call_id, remote = %remote, "Remote peer is not registered");
            self.set_status(format!("{} is unavailable", remote), StatusCategory::Unavailable);
            self.release_call_resources();
            return;
        }

        let policy = self.config.reconnect.clone();
        match policy.decide(attempts) {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(call_id = %call_id, remote = %remote, attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                let timer = self.schedule(delay, SessionInput::ReconnectDue { call_id, attempt });
                if let Some(call) = self.call.as_mut() {
                    call.info.reconnect_attempts = attempt;
                    call.reconnect_timer = Some(timer);
                }
                self.set_status(
                    policy.reconnecting_status(remote.as_str(), attempt),
                    StatusCategory::Reconnecting,
                );
            }
            ReconnectDecision::GiveUp { attempts } => {
                error!(call_id = %call_id, remote = %remote, attempts, "Reconnection attempts exhausted");
                self.set_status(policy.exhausted_status(), StatusCategory::PermanentFailure);
                self.release_call_resources();
            }
        }
    }

    pub(super) fn handle_reconnect_due(&mut self, call_id: CallId, attempt: u32) {
        let Some(call) = self.call.as_mut().filter(|c| c.info.call_id == call_id) else {
            return;
        };
        if call.info.phase != CallPhase::Failed
            || call.info.reconnect_attempts != attempt
            || call.reconnect_timer.take().is_none()
        {
            debug!(call_id = %call_id, attempt, "Ignoring stale reconnect timer");
            return;
        }
        info!(call_id = %call_id, remote = %call.info.remote, attempt, "Reconnecting");
        self.dial();
    }

    /// Park `call_id` until local media exists
    fn wait_for_media(&mut self, call_id: CallId) {
        if !self.awaiting_media.contains(&call_id) {
            self.awaiting_media.push_back(call_id);
        }
        debug!(call_id = %call_id, queued = self.awaiting_media.len(), "Call waiting for local media");
        self.set_status("Getting camera access…", StatusCategory::AwaitingMedia);
        self.request_media();
    }

    pub(super) fn drain_awaiting_media(&mut self) {
        while let Some(call_id) = self.awaiting_media.pop_front() {
            let Some(call) = self.call.as_ref().filter(|c| c.info.call_id == call_id) else {
                debug!(call_id = %call_id, "Queued call no longer current");
                continue;
            };
            match (call.info.direction, call.info.phase) {
                (CallDirection::Outbound, CallPhase::Idle) => self.dial(),
                (CallDirection::Inbound, CallPhase::RingingInbound)
                    if call.accepted && !call.answered =>
                {
                    self.answer()
                }
                (_, phase) => {
                    debug!(call_id = %call_id, phase = %phase, "Queued call no longer waiting for media")
                }
            }
        }
    }

    pub(super) fn fail_awaiting_media(&mut self, err: MediaAccessError) {
        let status = format!("Media access error: {}", err);
        let mut affected = false;

        while let Some(call_id) = self.awaiting_media.pop_front() {
            let Some(call) = self.call.as_mut().filter(|c| c.info.call_id == call_id) else {
                continue;
            };
            match (call.info.direction, call.info.phase) {
                (CallDirection::Outbound, CallPhase::Idle) => {
                    affected = true;
                    self.events.error(err.clone().into(), Some(call_id));
                    self.transition(CallPhase::Failed, Some(status.clone()));
                    self.release_call_resources();
                }
                (CallDirection::Inbound, CallPhase::RingingInbound) if !call.answered => {
                    // Leave it ringing; the user can retry by accepting again
                    affected = true;
                    call.accepted = false;
                    self.events.error(err.clone().into(), Some(call_id));
                    self.start_ring_timer();
                }
                _ => {}
            }
        }

        let idle = !self.call.as_ref().is_some_and(CallRecord::is_active);
        if affected || idle || self.status_category() == StatusCategory::AwaitingMedia {
            self.set_status(status, StatusCategory::MediaError);
        }
    }

    /// Clear everything tied to the call that just ended
    fn release_call_resources(&mut self) {
        let Some(call_id) = self.current_call_id() else {
            return;
        };
        self.awaiting_media.retain(|id| *id != call_id);
        if let Some(call) = self.call.as_mut() {
            if !call.is_active() {
                call.cancel_timers();
            }
        }
        if let Some(remote) = self.call.as_ref().map(|c| c.info.remote.clone()) {
            self.control.close(&remote);
        }
        self.stop_stimulus();
        self.remote_video_enabled = true;
    }

    pub(super) fn current_remote(&self) -> Option<&LocalIdentity> {
        self.call
            .as_ref()
            .filter(|c| c.is_active())
            .map(|c| &c.info.remote)
    }
}
