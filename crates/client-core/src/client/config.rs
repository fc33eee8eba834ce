//! Session configuration
//!
//! [`ClientConfig`] collects every tunable of a session with defaults that
//! match the behavior of the hosted application:
//!
//! | Setting | Default |
//! |---------|---------|
//! | ring timeout | 30 s |
//! | reconnection | 3 attempts, 2 s apart |
//! | auto-answer | on |
//! | acquire media at start | on |
//! | video off | mute (camera stays open) |
//! | video | 1280×720 @ 30 fps ideal, 640×480 @ 15 fps minimum |
//! | relay credentials | none (discovery-only fallback) |
//! | stimulus | `#169976`, 100 px, 20 s |
//!
//! # Examples
//!
//! ```rust
//! use emdr_client_core::client::config::{ClientConfig, ParticipantRole};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new()
//!     .with_email("therapist@clinic.example")
//!     .with_role(ParticipantRole::Therapist)
//!     .with_ring_timeout(Duration::from_secs(45));
//!
//! assert_eq!(config.ring_timeout(), Duration::from_secs(45));
//! assert!(config.validate().is_ok());
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::recovery::ReconnectPolicy;
use crate::control::StimulusSettings;
use crate::error::{ClientError, ClientResult};
use crate::media::MediaConstraints;

pub const ENV_RELAY_CREDENTIALS_URL: &str = "EMDR_RELAY_CREDENTIALS_URL";
pub const ENV_RING_TIMEOUT_SECS: &str = "EMDR_RING_TIMEOUT_SECS";
pub const ENV_ROLE: &str = "EMDR_ROLE";

/// Public discovery-only servers used when relay credentials are unavailable
pub const DEFAULT_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Role of the local participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// Drives the stimulus
    Therapist,
    /// Follows the stimulus
    Client,
}

impl ParticipantRole {
    /// Whether this role may start, stop or configure the stimulus
    pub fn controls_stimulus(&self) -> bool {
        matches!(self, ParticipantRole::Therapist)
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantRole::Therapist => write!(f, "therapist"),
            ParticipantRole::Client => write!(f, "client"),
        }
    }
}

impl FromStr for ParticipantRole {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "therapist" => Ok(ParticipantRole::Therapist),
            "client" => Ok(ParticipantRole::Client),
            other => Err(ClientError::InvalidConfiguration {
                field: "role".into(),
                reason: format!("unknown role '{}'", other),
            }),
        }
    }
}

/// What turning local video off does to the camera
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoDisablePolicy {
    /// Disable the track; the camera stays open and turning video back on is
    /// instant
    #[default]
    Mute,
    /// Stop the camera track; turning video back on re-opens the device and
    /// replaces the track on live connections
    Release,
}

/// Relay credential endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Token service URL; `None` uses the fallback directly
    pub credentials_url: Option<String>,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Discovery-only servers used when credentials are unavailable
    pub fallback_stun_urls: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            credentials_url: None,
            request_timeout_secs: 5,
            fallback_stun_urls: DEFAULT_STUN_URLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Complete session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Authenticated e-mail the local identity is derived from
    pub email: Option<String>,
    pub role: ParticipantRole,
    /// Seconds an inbound call may ring before it is missed
    pub ring_timeout_secs: u64,
    pub reconnect: ReconnectPolicy,
    /// Answer inbound calls without waiting for an explicit accept
    pub auto_answer: bool,
    /// Try to open camera and microphone during bootstrap
    pub acquire_media_on_start: bool,
    pub video_disable_policy: VideoDisablePolicy,
    pub media: MediaConstraints,
    pub relay: RelayConfig,
    /// Initial stimulus settings
    pub stimulus: StimulusSettings,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            email: None,
            role: ParticipantRole::Client,
            ring_timeout_secs: 30,
            reconnect: ReconnectPolicy::default(),
            auto_answer: true,
            acquire_media_on_start: true,
            video_disable_policy: VideoDisablePolicy::Mute,
            media: MediaConstraints::audio_video(),
            relay: RelayConfig::default(),
            stimulus: StimulusSettings::default(),
            event_buffer: 256,
        }
    }

    /// Defaults overlaid with `EMDR_*` environment variables
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> ClientResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();
        if let Some(url) = lookup(ENV_RELAY_CREDENTIALS_URL).filter(|v| !v.trim().is_empty()) {
            config.relay.credentials_url = Some(url.trim().to_string());
        }
        if let Some(secs) = lookup(ENV_RING_TIMEOUT_SECS) {
            config.ring_timeout_secs =
                secs.trim()
                    .parse()
                    .map_err(|_| ClientError::InvalidConfiguration {
                        field: ENV_RING_TIMEOUT_SECS.into(),
                        reason: format!("'{}' is not a number of seconds", secs),
                    })?;
        }
        if let Some(role) = lookup(ENV_ROLE) {
            config.role = role.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_role(mut self, role: ParticipantRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_auto_answer(mut self, auto_answer: bool) -> Self {
        self.auto_answer = auto_answer;
        self
    }

    pub fn with_acquire_media_on_start(mut self, acquire: bool) -> Self {
        self.acquire_media_on_start = acquire;
        self
    }

    pub fn with_video_disable_policy(mut self, policy: VideoDisablePolicy) -> Self {
        self.video_disable_policy = policy;
        self
    }

    pub fn with_media(mut self, media: MediaConstraints) -> Self {
        self.media = media;
        self
    }

    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// Set the relay credential endpoint
    pub fn with_credentials_url(mut self, url: impl Into<String>) -> Self {
        self.relay.credentials_url = Some(url.into());
        self
    }

    pub fn with_stimulus(mut self, settings: StimulusSettings) -> Self {
        self.stimulus = settings;
        self
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> ClientResult<()> {
        let invalid = |field: &str, reason: String| ClientError::InvalidConfiguration {
            field: field.to_string(),
            reason,
        };

        if self.ring_timeout_secs == 0 {
            return Err(invalid("ring_timeout_secs", "must be positive".into()));
        }
        if self.event_buffer == 0 {
            return Err(invalid("event_buffer", "must be positive".into()));
        }
        if self.media.kinds().is_empty() {
            return Err(invalid("media", "at least one of audio or video is required".into()));
        }
        if let Some(url) = &self.relay.credentials_url {
            Url::parse(url).map_err(|e| invalid("relay.credentials_url", e.to_string()))?;
        }
        if self.relay.fallback_stun_urls.is_empty() {
            return Err(invalid(
                "relay.fallback_stun_urls",
                "at least one discovery server is required".into(),
            ));
        }
        self.stimulus.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.ring_timeout(), Duration::from_secs(30));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.delay, Duration::from_secs(2));
        assert!(config.auto_answer);
        assert_eq!(config.video_disable_policy, VideoDisablePolicy::Mute);
        assert_eq!(config.relay.fallback_stun_urls.len(), 2);
        assert!(config.relay.credentials_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overlay() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_RELAY_CREDENTIALS_URL, "https://relay.example/token"),
            (ENV_RING_TIMEOUT_SECS, "12"),
            (ENV_ROLE, "Therapist"),
        ]))
        .unwrap();
        assert_eq!(
            config.relay.credentials_url.as_deref(),
            Some("https://relay.example/token")
        );
        assert_eq!(config.ring_timeout_secs, 12);
        assert_eq!(config.role, ParticipantRole::Therapist);
    }

    #[test]
    fn bad_environment_values_are_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[(ENV_RING_TIMEOUT_SECS, "soon")])).unwrap_err();
        assert_eq!(err.category(), "configuration");
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_ROLE, "observer")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_RELAY_CREDENTIALS_URL, "not a url")])).is_err());
    }

    #[test]
    fn validation_catches_unusable_values() {
        assert!(ClientConfig::new().with_ring_timeout(Duration::ZERO).validate().is_err());
        assert!(ClientConfig::new()
            .with_media(MediaConstraints::default())
            .validate()
            .is_err());
        assert!(ClientConfig::new()
            .with_stimulus(StimulusSettings::new("#169976", 10, 20))
            .validate()
            .is_err());
    }

    #[test]
    fn serde_round_trip_keeps_policy_names() {
        let config = ClientConfig::new().with_video_disable_policy(VideoDisablePolicy::Release);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["video_disable_policy"], "release");
        assert_eq!(json["role"], "client");
        let back: ClientConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn only_therapists_control_the_stimulus() {
        assert!(ParticipantRole::Therapist.controls_stimulus());
        assert!(!ParticipantRole::Client.controls_stimulus());
    }
}
