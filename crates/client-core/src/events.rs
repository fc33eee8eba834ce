//! Session events and the observable status snapshot
//!
//! Two surfaces feed the presentation layer:
//!
//! - [`SessionStatus`]: the latest state, published through a
//!   `tokio::sync::watch` channel. It carries the single human-readable
//!   status line, its machine-checkable [`StatusCategory`] and the flags a UI
//!   binds to (connected, ringing, remote video, local media, stimulus).
//! - [`ClientEvent`]: a history-free stream of everything that happened,
//!   published through a `tokio::sync::broadcast` channel.
//!
//! # Usage Examples
//!
//! ```rust
//! use emdr_client_core::events::{ClientEvent, EventPriority, StatusCategory};
//!
//! let event = ClientEvent::StatusChanged {
//!     text: "Ready".to_string(),
//!     category: StatusCategory::Ready,
//!     priority: EventPriority::Low,
//! };
//! assert_eq!(event.priority(), EventPriority::Low);
//! assert!(event.call_id().is_none());
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{CallId, CallPhase};
use crate::control::{ControlMessage, StimulusSettings};
use crate::error::ClientError;
use crate::identity::LocalIdentity;
use crate::media::TrackKind;
use crate::registration::RegistrationStatus;
use crate::substrate::RemoteStream;

/// Machine-checkable classification of the status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusCategory {
    /// Nothing started yet
    Idle,
    /// Registering with the rendezvous substrate
    Registering,
    /// Registered, no call in progress
    Ready,
    /// Outbound call ringing
    Calling,
    /// Inbound call ringing
    Ringing,
    /// A call is waiting for local media
    AwaitingMedia,
    Connected,
    /// Call finished normally
    Ended,
    /// Inbound call not answered in time
    Missed,
    /// Inbound call rejected locally
    Rejected,
    /// Waiting to re-dial after a transport failure
    Reconnecting,
    /// Camera or microphone could not be acquired
    MediaError,
    /// The substrate refused the registration
    RegistrationError,
    /// Connection-level failure of a call
    TransportError,
    /// Reconnection attempts exhausted
    PermanentFailure,
    /// The dialed identity is not registered with the substrate
    Unavailable,
}

impl StatusCategory {
    /// Whether this category reports a problem
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            StatusCategory::MediaError
                | StatusCategory::RegistrationError
                | StatusCategory::TransportError
                | StatusCategory::PermanentFailure
                | StatusCategory::Unavailable
        )
    }
}

/// Snapshot of everything the presentation layer displays
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    /// Single human-readable status line reflecting the most recent event
    pub text: String,
    pub category: StatusCategory,
    /// Authoritative call record, if any
    pub call_id: Option<CallId>,
    pub phase: Option<CallPhase>,
    pub connected: bool,
    /// An inbound call is waiting for accept/reject
    pub ringing: bool,
    pub remote_identity: Option<LocalIdentity>,
    /// Counterparty's camera state as last announced over the control channel
    pub remote_video_enabled: bool,
    pub local_audio_enabled: bool,
    pub local_video_enabled: bool,
    pub has_local_media: bool,
    pub stimulus_active: bool,
    pub stimulus_settings: StimulusSettings,
    pub registered: bool,
    pub local_identity: Option<LocalIdentity>,
    /// Media received from the counterparty
    pub remote_stream: Option<RemoteStream>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            text: "Initializing…".to_string(),
            category: StatusCategory::Idle,
            call_id: None,
            phase: None,
            connected: false,
            ringing: false,
            remote_identity: None,
            remote_video_enabled: true,
            local_audio_enabled: false,
            local_video_enabled: false,
            has_local_media: false,
            stimulus_active: false,
            stimulus_settings: StimulusSettings::default(),
            registered: false,
            local_identity: None,
            remote_stream: None,
        }
    }
}

/// Event priority, used by consumers to decide what to surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// Routine status updates
    Low,
    /// State changes, media and control events
    Normal,
    /// Incoming calls, registration changes
    High,
    /// Failures
    Critical,
}

/// Information about an incoming call
#[derive(Debug, Clone)]
pub struct IncomingCallInfo {
    pub call_id: CallId,
    /// Who is calling
    pub remote: LocalIdentity,
    /// Whether the session will answer without an explicit accept
    pub auto_answer: bool,
    pub received_at: DateTime<Utc>,
}

/// Information about a call phase change
#[derive(Debug, Clone)]
pub struct CallStatusInfo {
    pub call_id: CallId,
    pub remote: LocalIdentity,
    pub new_phase: CallPhase,
    pub previous_phase: Option<CallPhase>,
    /// Reason for the change (e.g. "Missed call from bob")
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Information about a registration status change
#[derive(Debug, Clone)]
pub struct RegistrationStatusInfo {
    pub identity: LocalIdentity,
    pub status: RegistrationStatus,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Local or remote media changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEventType {
    /// Local capture became available
    LocalMediaAcquired { tracks: usize },
    /// Local capture failed
    LocalMediaFailed { reason: String },
    /// A local track was muted or unmuted
    TrackEnabledChanged { kind: TrackKind, enabled: bool },
    /// A local track was replaced from another device
    DeviceSwitched { kind: TrackKind, device_id: String },
    /// Remote media started flowing
    RemoteStreamStarted { kinds: Vec<TrackKind> },
    /// The counterparty announced its camera state
    RemoteVideoChanged { enabled: bool },
    /// The shared stimulus turned on or off
    StimulusChanged { active: bool },
}

impl fmt::Display for MediaEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaEventType::LocalMediaAcquired { tracks } => {
                write!(f, "local media acquired ({} tracks)", tracks)
            }
            MediaEventType::LocalMediaFailed { reason } => write!(f, "local media failed: {}", reason),
            MediaEventType::TrackEnabledChanged { kind, enabled } => {
                write!(f, "{} {}", kind, if *enabled { "enabled" } else { "disabled" })
            }
            MediaEventType::DeviceSwitched { kind, device_id } => {
                write!(f, "{} switched to {}", kind, device_id)
            }
            MediaEventType::RemoteStreamStarted { kinds } => {
                write!(f, "remote stream started ({} tracks)", kinds.len())
            }
            MediaEventType::RemoteVideoChanged { enabled } => {
                write!(f, "remote video {}", if *enabled { "on" } else { "off" })
            }
            MediaEventType::StimulusChanged { active } => {
                write!(f, "stimulus {}", if *active { "started" } else { "stopped" })
            }
        }
    }
}

/// A media event with its call context
#[derive(Debug, Clone)]
pub struct MediaEventInfo {
    pub call_id: Option<CallId>,
    pub event_type: MediaEventType,
    pub timestamp: DateTime<Utc>,
}

/// Everything observable that happens in a session
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A peer is calling
    IncomingCall {
        info: IncomingCallInfo,
        priority: EventPriority,
    },
    /// A call record changed phase
    CallStateChanged {
        info: CallStatusInfo,
        priority: EventPriority,
    },
    /// Local or remote media changed
    MediaEvent {
        info: MediaEventInfo,
        priority: EventPriority,
    },
    /// Registration with the rendezvous substrate changed
    RegistrationStatusChanged {
        info: RegistrationStatusInfo,
        priority: EventPriority,
    },
    /// A decoded control message arrived from the counterparty
    ControlMessage {
        remote: LocalIdentity,
        message: ControlMessage,
        priority: EventPriority,
    },
    /// The status line changed
    StatusChanged {
        text: String,
        category: StatusCategory,
        priority: EventPriority,
    },
    /// An operation failed and was absorbed into a status change
    ClientError {
        error: ClientError,
        call_id: Option<CallId>,
        priority: EventPriority,
    },
}

impl ClientEvent {
    pub fn priority(&self) -> EventPriority {
        match self {
            ClientEvent::IncomingCall { priority, .. }
            | ClientEvent::CallStateChanged { priority, .. }
            | ClientEvent::MediaEvent { priority, .. }
            | ClientEvent::RegistrationStatusChanged { priority, .. }
            | ClientEvent::ControlMessage { priority, .. }
            | ClientEvent::StatusChanged { priority, .. }
            | ClientEvent::ClientError { priority, .. } => *priority,
        }
    }

    /// Call the event belongs to, if any
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            ClientEvent::IncomingCall { info, .. } => Some(info.call_id),
            ClientEvent::CallStateChanged { info, .. } => Some(info.call_id),
            ClientEvent::MediaEvent { info, .. } => info.call_id,
            ClientEvent::ClientError { call_id, .. } => *call_id,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_are_ordered() {
        assert!(EventPriority::Critical > EventPriority::High);
        assert!(EventPriority::High > EventPriority::Normal);
        assert!(EventPriority::Normal > EventPriority::Low);
    }

    #[test]
    fn error_categories() {
        assert!(StatusCategory::PermanentFailure.is_error());
        assert!(StatusCategory::Unavailable.is_error());
        assert!(StatusCategory::MediaError.is_error());
        assert!(!StatusCategory::Missed.is_error());
        assert!(!StatusCategory::Reconnecting.is_error());
    }

    #[test]
    fn call_events_carry_their_call_id() {
        let call_id = CallId::new_v4();
        let event = ClientEvent::CallStateChanged {
            info: CallStatusInfo {
                call_id,
                remote: LocalIdentity::parse("bob").unwrap(),
                new_phase: CallPhase::Connected,
                previous_phase: Some(CallPhase::RingingOutbound),
                reason: None,
                timestamp: Utc::now(),
            },
            priority: EventPriority::Normal,
        };
        assert_eq!(event.call_id(), Some(call_id));
    }

    #[test]
    fn media_event_descriptions() {
        let e = MediaEventType::TrackEnabledChanged {
            kind: TrackKind::Audio,
            enabled: false,
        };
        assert_eq!(e.to_string(), "audio disabled");
    }
}
