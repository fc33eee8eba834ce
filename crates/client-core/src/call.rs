//! Call records and the call phase state machine
//!
//! ```text
//! idle ──place──► ringing-outbound ──remote stream──► connected
//! idle ──inbound──► ringing-inbound ──accept──► connected
//! ringing-inbound ──reject | 30 s timeout──► ended
//! ringing-outbound ──remote close | error──► failed
//! connected ──close──► ended
//! connected ──transport failure──► failed
//! failed ──reconnect (≤3, 2 s apart)──► ringing-outbound
//! ```
//!
//! At most one record is ever outside `ended`/`failed`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::LocalIdentity;

/// Unique identifier of a call record
pub type CallId = uuid::Uuid;

/// Phase of a call record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallPhase {
    /// Record exists but nothing has been dialed yet (waiting for local media)
    Idle,
    /// A peer is calling us
    RingingInbound,
    /// We are calling a peer
    RingingOutbound,
    /// Remote media is flowing
    Connected,
    /// Finished normally (hang-up, reject, missed, remote close)
    Ended,
    /// Finished because of an error
    Failed,
}

impl CallPhase {
    /// `ended` or `failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallPhase::Ended | CallPhase::Failed)
    }

    /// Whether a transition from `self` to `next` is part of the state machine
    pub fn can_transition_to(&self, next: CallPhase) -> bool {
        use CallPhase::*;
        matches!(
            (self, next),
            (Idle, RingingOutbound)
                | (Idle, RingingInbound)
                | (Idle, Failed)
                | (Idle, Ended)
                | (RingingInbound, Connected)
                | (RingingInbound, Ended)
                | (RingingInbound, Failed)
                | (RingingOutbound, Connected)
                | (RingingOutbound, Failed)
                | (RingingOutbound, Ended)
                | (Connected, Ended)
                | (Connected, Failed)
                | (Failed, RingingOutbound)
                | (Failed, Ended)
        )
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallPhase::Idle => "idle",
            CallPhase::RingingInbound => "ringing-inbound",
            CallPhase::RingingOutbound => "ringing-outbound",
            CallPhase::Connected => "connected",
            CallPhase::Ended => "ended",
            CallPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Who started the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Read-only snapshot of a call record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    pub call_id: CallId,
    pub remote: LocalIdentity,
    pub direction: CallDirection,
    pub phase: CallPhase,
    /// Reconnection attempts made for this record
    pub reconnect_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Why the record reached its terminal phase
    pub end_reason: Option<String>,
}

impl CallInfo {
    pub fn new(remote: LocalIdentity, direction: CallDirection) -> Self {
        Self {
            call_id: CallId::new_v4(),
            remote,
            direction,
            phase: CallPhase::Idle,
            reconnect_attempts: 0,
            created_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            end_reason: None,
        }
    }

    /// Call duration so far, or total once finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.connected_at?;
        Some(self.ended_at.unwrap_or_else(Utc::now) - start)
    }

    /// Move to `next`, stamping timestamps; returns the previous phase
    ///
    /// Transitions outside the state machine are refused and return `None`.
    pub(crate) fn transition(&mut self, next: CallPhase) -> Option<CallPhase> {
        if !self.phase.can_transition_to(next) {
            return None;
        }
        let previous = self.phase;
        self.phase = next;
        match next {
            CallPhase::Connected => {
                if self.connected_at.is_none() {
                    self.connected_at = Some(Utc::now());
                }
            }
            CallPhase::Ended | CallPhase::Failed => self.ended_at = Some(Utc::now()),
            CallPhase::RingingOutbound => self.ended_at = None,
            _ => {}
        }
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CallInfo {
        CallInfo::new(LocalIdentity::parse("bob").unwrap(), CallDirection::Outbound)
    }

    #[test]
    fn terminal_phases() {
        assert!(CallPhase::Ended.is_terminal());
        assert!(CallPhase::Failed.is_terminal());
        assert!(!CallPhase::Connected.is_terminal());
        assert!(!CallPhase::Idle.is_terminal());
    }

    #[test]
    fn only_failed_can_return_to_ringing() {
        assert!(CallPhase::Failed.can_transition_to(CallPhase::RingingOutbound));
        assert!(CallPhase::Failed.can_transition_to(CallPhase::Ended), "hang-up while waiting to re-dial");
        assert!(!CallPhase::Ended.can_transition_to(CallPhase::RingingOutbound));
        assert!(!CallPhase::Ended.can_transition_to(CallPhase::Connected));
        assert!(!CallPhase::RingingInbound.can_transition_to(CallPhase::RingingOutbound));
    }

    #[test]
    fn transition_stamps_times() {
        let mut call = record();
        assert_eq!(call.transition(CallPhase::RingingOutbound), Some(CallPhase::Idle));
        assert_eq!(call.transition(CallPhase::Connected), Some(CallPhase::RingingOutbound));
        assert!(call.connected_at.is_some());
        assert_eq!(call.transition(CallPhase::Ended), Some(CallPhase::Connected));
        assert!(call.ended_at.is_some());
        assert!(call.duration().is_some());
        assert_eq!(call.transition(CallPhase::Connected), None);
        assert_eq!(call.phase, CallPhase::Ended);
    }

    #[test]
    fn phase_names_match_the_wire_form() {
        assert_eq!(CallPhase::RingingOutbound.to_string(), "ringing-outbound");
        let json = serde_json::to_string(&CallPhase::RingingInbound).unwrap();
        assert_eq!(json, "\"ringing-inbound\"");
    }
}
