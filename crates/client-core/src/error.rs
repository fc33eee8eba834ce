//! Error types for the session core
//!
//! Every fallible operation in this crate reports one of the enums below.
//! Network, media and registration trouble is absorbed by the session event
//! loop and turned into a status line (see [`crate::events::SessionStatus`]);
//! only caller mistakes surface as `Err` from the facade.

use thiserror::Error;

use crate::control::ControlChannelError;
use crate::media::MediaAccessError;
use crate::substrate::SubstrateError;

/// Result type for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Top-level error type of the session core
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Local capture could not be obtained for a call attempt
    #[error("Media unavailable: {source}")]
    MediaUnavailable {
        #[source]
        source: MediaAccessError,
    },

    /// The rendezvous substrate failed to register this endpoint
    #[error("Registration failed: {reason}")]
    RegistrationFailed { reason: String },

    /// A connection-level failure during a specific call
    #[error("Transport negotiation failed: {reason}")]
    TransportNegotiation { reason: String },

    /// Control channel send or decode failure
    #[error("Control channel error: {0}")]
    ControlChannel(#[from] ControlChannelError),

    /// Operation not valid in the current call phase
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Operation not allowed for the local participant role
    #[error("Not permitted: {action} requires the {required} role")]
    NotPermitted { action: String, required: String },

    /// Stimulus settings outside the accepted ranges
    #[error("Invalid settings: {field} {reason}")]
    InvalidSettings { field: String, reason: String },

    /// Configuration value rejected by validation
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// The session event loop has shut down
    #[error("Session is closed")]
    SessionClosed,

    /// Internal error
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl ClientError {
    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an invalid settings error
    pub fn invalid_settings(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSettings {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later can succeed without the
    /// caller changing anything
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::MediaUnavailable { source } => source.is_recoverable(),
            ClientError::TransportNegotiation { .. } => true,
            ClientError::ControlChannel(_) => true,
            ClientError::RegistrationFailed { .. }
            | ClientError::InvalidState { .. }
            | ClientError::NotPermitted { .. }
            | ClientError::InvalidSettings { .. }
            | ClientError::InvalidConfiguration { .. }
            | ClientError::SessionClosed
            | ClientError::InternalError { .. } => false,
        }
    }

    /// Stable category name used in structured logs
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::MediaUnavailable { .. } => "media",
            ClientError::RegistrationFailed { .. } => "registration",
            ClientError::TransportNegotiation { .. } => "transport",
            ClientError::ControlChannel(_) => "control_channel",
            ClientError::InvalidState { .. } => "state",
            ClientError::NotPermitted { .. } => "permission",
            ClientError::InvalidSettings { .. } => "settings",
            ClientError::InvalidConfiguration { .. } => "configuration",
            ClientError::SessionClosed => "lifecycle",
            ClientError::InternalError { .. } => "internal",
        }
    }
}

impl From<MediaAccessError> for ClientError {
    fn from(source: MediaAccessError) -> Self {
        ClientError::MediaUnavailable { source }
    }
}

impl From<SubstrateError> for ClientError {
    fn from(err: SubstrateError) -> Self {
        match err {
            SubstrateError::UnavailableId { .. } => ClientError::RegistrationFailed {
                reason: err.to_string(),
            },
            other => ClientError::TransportNegotiation {
                reason: other.to_string(),
            },
        }
    }
}
