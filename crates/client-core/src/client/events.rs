//! Event emission for the session event loop
//!
//! Wraps the broadcast sender shared by every incarnation of the session and
//! stamps each event with its priority and timestamp, so call sites only say
//! what happened.

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::call::{CallId, CallInfo, CallPhase};
use crate::control::ControlMessage;
use crate::error::ClientError;
use crate::events::{
    CallStatusInfo, ClientEvent, EventPriority, IncomingCallInfo, MediaEventInfo,
    MediaEventType, RegistrationStatusInfo, StatusCategory,
};
use crate::identity::LocalIdentity;
use crate::registration::RegistrationStatus;

/// Cloneable emitter over the session's broadcast channel
#[derive(Debug, Clone)]
pub(crate) struct SessionEvents {
    tx: broadcast::Sender<ClientEvent>,
}

impl SessionEvents {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Publish `event`; having no subscribers is not an error
    pub(crate) fn emit(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub(crate) fn incoming_call(&self, info: &CallInfo, auto_answer: bool) {
        self.emit(ClientEvent::IncomingCall {
            info: IncomingCallInfo {
                call_id: info.call_id,
                remote: info.remote.clone(),
                auto_answer,
                received_at: Utc::now(),
            },
            priority: EventPriority::High,
        });
    }

    pub(crate) fn call_state_changed(
        &self,
        info: &CallInfo,
        previous_phase: Option<CallPhase>,
        reason: Option<String>,
    ) {
        let priority = match info.phase {
            CallPhase::Failed => EventPriority::High,
            _ => EventPriority::Normal,
        };
        self.emit(ClientEvent::CallStateChanged {
            info: CallStatusInfo {
                call_id: info.call_id,
                remote: info.remote.clone(),
                new_phase: info.phase,
                previous_phase,
                reason,
                timestamp: Utc::now(),
            },
            priority,
        });
    }

    pub(crate) fn media(&self, call_id: Option<CallId>, event_type: MediaEventType) {
        let priority = match event_type {
            MediaEventType::LocalMediaFailed { .. } => EventPriority::High,
            _ => EventPriority::Normal,
        };
        self.emit(ClientEvent::MediaEvent {
            info: MediaEventInfo {
                call_id,
                event_type,
                timestamp: Utc::now(),
            },
            priority,
        });
    }

    pub(crate) fn registration(
        &self,
        identity: &LocalIdentity,
        status: RegistrationStatus,
        reason: Option<String>,
    ) {
        self.emit(ClientEvent::RegistrationStatusChanged {
            info: RegistrationStatusInfo {
                identity: identity.clone(),
                status,
                reason,
                timestamp: Utc::now(),
            },
            priority: EventPriority::High,
        });
    }

    pub(crate) fn control_message(&self, remote: &LocalIdentity, message: &ControlMessage) {
        self.emit(ClientEvent::ControlMessage {
            remote: remote.clone(),
            message: message.clone(),
            priority: EventPriority::Normal,
        });
    }

    pub(crate) fn status(&self, text: &str, category: StatusCategory) {
        let priority = if category.is_error() {
            EventPriority::High
        } else {
            EventPriority::Low
        };
        self.emit(ClientEvent::StatusChanged {
            text: text.to_string(),
            category,
            priority,
        });
    }

    pub(crate) fn error(&self, error: ClientError, call_id: Option<CallId>) {
        self.emit(ClientEvent::ClientError {
            error,
            call_id,
            priority: EventPriority::Critical,
        });
    }
}
