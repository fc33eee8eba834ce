//! Reconnection policy for calls that lose their transport
//!
//! A call whose connection enters a terminal bad state is re-dialed a bounded
//! number of times with a fixed delay in between. The attempt counter belongs
//! to the call record and is never reset while that record lives, so a call
//! that keeps flapping still stops after `max_attempts`.
//!
//! ```text
//! failure ──► attempts < max? ──yes──► wait `delay` ──► re-dial (attempt n)
//!                    │
//!                    └──no──► permanent failure, nothing scheduled
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for reconnection behavior
///
/// # Examples
///
/// ```rust
/// use emdr_client_core::client::recovery::{ReconnectDecision, ReconnectPolicy};
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
/// assert_eq!(policy.delay, Duration::from_secs(2));
///
/// assert_eq!(
///     policy.decide(0),
///     ReconnectDecision::Retry { attempt: 1, delay: Duration::from_secs(2) }
/// );
/// assert_eq!(policy.decide(3), ReconnectDecision::GiveUp { attempts: 3 });
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum re-dials per call record
    pub max_attempts: u32,
    /// Fixed delay before each re-dial
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// What to do after a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule re-dial number `attempt` after `delay`
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted
    GiveUp { attempts: u32 },
}

impl ReconnectPolicy {
    /// Never reconnect
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
        }
    }

    /// Decide given how many re-dials were already made for the record
    pub fn decide(&self, attempts_made: u32) -> ReconnectDecision {
        if attempts_made < self.max_attempts {
            ReconnectDecision::Retry {
                attempt: attempts_made + 1,
                delay: self.delay,
            }
        } else {
            ReconnectDecision::GiveUp {
                attempts: attempts_made,
            }
        }
    }

    /// Status line shown while waiting for a re-dial
    pub fn reconnecting_status(&self, remote: &str, attempt: u32) -> String {
        format!(
            "Reconnecting to {} (attempt {} of {})…",
            remote, attempt, self.max_attempts
        )
    }

    /// Status line once attempts are exhausted
    pub fn exhausted_status(&self) -> String {
        format!("Connection failed after {} attempts", self.max_attempts)
    }
}
