//! Control channel: small application signals alongside the media connection
//!
//! ```text
//!  facade ── send(remote, msg) ──► ControlChannel ── encode ──► DataConnection
//!                                       │ (buffer until open)
//!  subscribers ◄── decode ◄──────────── DataEvent::Message
//! ```

pub mod channel;
pub mod message;
pub mod stimulus;

use thiserror::Error;

pub use channel::{AttachedLink, ControlChannel, LinkId, MessageHandler};
pub use message::{ControlDecodeError, ControlMessage, StimulusSettings};
pub use stimulus::Stimulus;

/// Control channel failures; logged by the session, never escalated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlChannelError {
    #[error("no registration to open a control channel through")]
    NotRegistered,

    #[error("sending to {remote} failed: {reason}")]
    SendFailed { remote: String, reason: String },

    #[error("control message could not be encoded: {reason}")]
    Encode { reason: String },
}
