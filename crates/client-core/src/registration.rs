//! Rendezvous registration state
//!
//! The session registers once per identity with the rendezvous substrate.
//! Registration never retries on its own: an error before the endpoint opens
//! is surfaced as a persistent status until the identity changes or the
//! process restarts.
//!
//! ```text
//! Pending ──opened──► Active ──disconnected──► Disconnected
//!    │                  │
//!    └──error──► Failed └──closed──► Closed
//! ```
//!
//! # Examples
//!
//! ```rust
//! use emdr_client_core::registration::RegistrationStatus;
//!
//! let status = RegistrationStatus::Active;
//! assert!(status.is_registered());
//! assert_eq!(status.to_string(), "Active");
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::LocalIdentity;

/// State of the endpoint's registration with the rendezvous substrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// Registration requested, not yet confirmed
    Pending,

    /// Reachable under the local identity
    ///
    /// Incoming calls and data connections can arrive.
    Active,

    /// The substrate refused or failed the registration
    ///
    /// Terminal until the identity changes.
    Failed,

    /// Lost the rendezvous server
    ///
    /// Established connections may survive, but no new peer can find us.
    Disconnected,

    /// Registration destroyed (teardown or identity change)
    Closed,
}

impl RegistrationStatus {
    /// Whether peers can currently dial this endpoint
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationStatus::Active)
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Pending => write!(f, "Pending"),
            RegistrationStatus::Active => write!(f, "Active"),
            RegistrationStatus::Failed => write!(f, "Failed"),
            RegistrationStatus::Disconnected => write!(f, "Disconnected"),
            RegistrationStatus::Closed => write!(f, "Closed"),
        }
    }
}

/// Details of the current registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    /// Identity registered under
    pub identity: LocalIdentity,

    pub status: RegistrationStatus,

    /// When registration was requested
    pub requested_at: DateTime<Utc>,

    /// When the substrate confirmed it (if it did)
    pub opened_at: Option<DateTime<Utc>>,

    /// Most recent substrate error
    pub last_error: Option<String>,

    /// Relay entries in the transport configuration used
    pub relay_servers: usize,
}

impl RegistrationInfo {
    pub fn pending(identity: LocalIdentity, relay_servers: usize) -> Self {
        Self {
            identity,
            status: RegistrationStatus::Pending,
            requested_at: Utc::now(),
            opened_at: None,
            last_error: None,
            relay_servers,
        }
    }

    pub(crate) fn mark_opened(&mut self) {
        self.status = RegistrationStatus::Active;
        self.opened_at = Some(Utc::now());
    }

    /// Record a substrate error, returning whether it happened before the
    /// registration ever opened
    pub(crate) fn mark_error(&mut self, reason: &str) -> bool {
        self.last_error = Some(reason.to_string());
        let before_open = self.opened_at.is_none();
        if before_open {
            self.status = RegistrationStatus::Failed;
        }
        before_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_before_open_fails_registration() {
        let mut info = RegistrationInfo::pending(LocalIdentity::random(), 0);
        assert!(info.mark_error("id taken"));
        assert_eq!(info.status, RegistrationStatus::Failed);
        assert!(!info.status.is_registered());
    }

    #[test]
    fn error_after_open_keeps_registration() {
        let mut info = RegistrationInfo::pending(LocalIdentity::random(), 2);
        info.mark_opened();
        assert!(!info.mark_error("transient"));
        assert_eq!(info.status, RegistrationStatus::Active);
        assert_eq!(info.last_error.as_deref(), Some("transient"));
    }
}
