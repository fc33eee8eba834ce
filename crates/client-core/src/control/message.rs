//! Control message codec and stimulus settings
//!
//! Zero-payload events travel as bare tags (`stimulus-start`,
//! `stimulus-stop`, `video-enabled`, `video-disabled`); settings travel as a
//! JSON object tagged `"type": "settings"`. The decoder also accepts the JSON
//! form of every message.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ClientError, ClientResult};

pub const TAG_STIMULUS_START: &str = "stimulus-start";
pub const TAG_STIMULUS_STOP: &str = "stimulus-stop";
pub const TAG_VIDEO_ENABLED: &str = "video-enabled";
pub const TAG_VIDEO_DISABLED: &str = "video-disabled";

pub const MIN_SIZE_PX: u32 = 50;
pub const MAX_SIZE_PX: u32 = 200;
pub const MIN_DURATION_SECS: u32 = 5;
pub const MAX_DURATION_SECS: u32 = 60;

/// Appearance and timing of the shared stimulus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StimulusSettings {
    /// `#rrggbb`
    pub color: String,
    /// Diameter in pixels
    pub size: u32,
    /// How long one activation lasts
    #[serde(rename = "durationSeconds", alias = "duration")]
    pub duration_seconds: u32,
}

impl Default for StimulusSettings {
    fn default() -> Self {
        Self {
            color: "#169976".to_string(),
            size: 100,
            duration_seconds: 20,
        }
    }
}

impl StimulusSettings {
    pub fn new(color: impl Into<String>, size: u32, duration_seconds: u32) -> Self {
        Self {
            color: color.into(),
            size,
            duration_seconds,
        }
    }

    /// Activation length as a [`std::time::Duration`]
    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.duration_seconds))
    }

    /// Check colour format and numeric ranges
    pub fn validate(&self) -> ClientResult<()> {
        let hex = self.color.strip_prefix('#').unwrap_or("");
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ClientError::invalid_settings(
                "color",
                format!("'{}' is not a #rrggbb colour", self.color),
            ));
        }
        if !(MIN_SIZE_PX..=MAX_SIZE_PX).contains(&self.size) {
            return Err(ClientError::invalid_settings(
                "size",
                format!("must be {}-{} px, got {}", MIN_SIZE_PX, MAX_SIZE_PX, self.size),
            ));
        }
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&self.duration_seconds) {
            return Err(ClientError::invalid_settings(
                "durationSeconds",
                format!(
                    "must be {}-{} s, got {}",
                    MIN_DURATION_SECS, MAX_DURATION_SECS, self.duration_seconds
                ),
            ));
        }
        Ok(())
    }
}

/// Application signal exchanged over the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    StimulusStart,
    StimulusStop,
    /// The sender's camera was turned on (`true`) or off (`false`)
    VideoEnabled(bool),
    Settings(StimulusSettings),
}

/// Why an inbound payload was dropped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlDecodeError {
    #[error("empty payload")]
    Empty,

    #[error("unknown control tag '{0}'")]
    UnknownTag(String),

    #[error("malformed control payload: {0}")]
    Malformed(String),

    #[error("settings rejected: {0}")]
    InvalidSettings(String),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WireMessage {
    StimulusStart,
    StimulusStop,
    VideoEnabled {
        #[serde(default = "enabled_by_default")]
        enabled: bool,
    },
    VideoDisabled,
    Settings(StimulusSettings),
}

fn enabled_by_default() -> bool {
    true
}

impl ControlMessage {
    /// Compact wire form
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            ControlMessage::StimulusStart => Ok(TAG_STIMULUS_START.to_string()),
            ControlMessage::StimulusStop => Ok(TAG_STIMULUS_STOP.to_string()),
            ControlMessage::VideoEnabled(true) => Ok(TAG_VIDEO_ENABLED.to_string()),
            ControlMessage::VideoEnabled(false) => Ok(TAG_VIDEO_DISABLED.to_string()),
            ControlMessage::Settings(settings) => {
                serde_json::to_string(&WireMessage::Settings(settings.clone()))
            }
        }
    }

    /// Whether sending this message drives the shared stimulus
    pub fn controls_stimulus(&self) -> bool {
        matches!(
            self,
            ControlMessage::StimulusStart
                | ControlMessage::StimulusStop
                | ControlMessage::Settings(_)
        )
    }

    /// Parse a received payload
    pub fn decode(payload: &str) -> Result<Self, ControlDecodeError> {
        let text = payload.trim();
        if text.is_empty() {
            return Err(ControlDecodeError::Empty);
        }

        if !text.starts_with('{') {
            return match text {
                TAG_STIMULUS_START => Ok(ControlMessage::StimulusStart),
                TAG_STIMULUS_STOP => Ok(ControlMessage::StimulusStop),
                TAG_VIDEO_ENABLED => Ok(ControlMessage::VideoEnabled(true)),
                TAG_VIDEO_DISABLED => Ok(ControlMessage::VideoEnabled(false)),
                other => Err(ControlDecodeError::UnknownTag(truncate(other))),
            };
        }

        let wire: WireMessage = serde_json::from_str(text)
            .map_err(|e| ControlDecodeError::Malformed(e.to_string()))?;
        Ok(match wire {
            WireMessage::StimulusStart => ControlMessage::StimulusStart,
            WireMessage::StimulusStop => ControlMessage::StimulusStop,
            WireMessage::VideoEnabled { enabled } => ControlMessage::VideoEnabled(enabled),
            WireMessage::VideoDisabled => ControlMessage::VideoEnabled(false),
            WireMessage::Settings(settings) => {
                settings
                    .validate()
                    .map_err(|e| ControlDecodeError::InvalidSettings(e.to_string()))?;
                ControlMessage::Settings(settings)
            }
        })
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::StimulusStart => f.write_str(TAG_STIMULUS_START),
            ControlMessage::StimulusStop => f.write_str(TAG_STIMULUS_STOP),
            ControlMessage::VideoEnabled(true) => f.write_str(TAG_VIDEO_ENABLED),
            ControlMessage::VideoEnabled(false) => f.write_str(TAG_VIDEO_DISABLED),
            ControlMessage::Settings(s) => write!(
                f,
                "settings({}, {}px, {}s)",
                s.color, s.size, s.duration_seconds
            ),
        }
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_encode_to_bare_words() {
        assert_eq!(ControlMessage::StimulusStart.encode().unwrap(), "stimulus-start");
        assert_eq!(ControlMessage::VideoEnabled(false).encode().unwrap(), "video-disabled");
    }

    #[test]
    fn settings_encode_as_tagged_json() {
        let encoded = ControlMessage::Settings(StimulusSettings::default())
            .encode()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "settings");
        assert_eq!(value["color"], "#169976");
        assert_eq!(value["size"], 100);
        assert_eq!(value["durationSeconds"], 20);
        assert_eq!(
            ControlMessage::decode(&encoded).unwrap(),
            ControlMessage::Settings(StimulusSettings::default())
        );
    }

    #[test]
    fn json_forms_are_accepted() {
        assert_eq!(
            ControlMessage::decode(r#"{"type":"stimulus-stop"}"#).unwrap(),
            ControlMessage::StimulusStop
        );
        assert_eq!(
            ControlMessage::decode(r#"{"type":"video-enabled","enabled":false}"#).unwrap(),
            ControlMessage::VideoEnabled(false)
        );
        assert_eq!(
            ControlMessage::decode(r##"{"type":"settings","color":"#ff0000","size":80,"duration":30}"##)
                .unwrap(),
            ControlMessage::Settings(StimulusSettings::new("#ff0000", 80, 30))
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(ControlMessage::decode("  "), Err(ControlDecodeError::Empty));
        assert!(matches!(
            ControlMessage::decode("Hi from caller"),
            Err(ControlDecodeError::UnknownTag(_))
        ));
        assert!(matches!(
            ControlMessage::decode("{\"type\":\"settings\",\"color\":"),
            Err(ControlDecodeError::Malformed(_))
        ));
        assert!(matches!(
            ControlMessage::decode(r#"{"type":"teleport"}"#),
            Err(ControlDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn out_of_range_settings_are_rejected() {
        let json = r##"{"type":"settings","color":"#169976","size":500,"durationSeconds":20}"##;
        assert!(matches!(
            ControlMessage::decode(json),
            Err(ControlDecodeError::InvalidSettings(_))
        ));
    }

    #[test]
    fn settings_validation_ranges() {
        assert!(StimulusSettings::default().validate().is_ok());
        assert!(StimulusSettings::new("169976", 100, 20).validate().is_err());
        assert!(StimulusSettings::new("#16997g", 100, 20).validate().is_err());
        assert!(StimulusSettings::new("#169976", 49, 20).validate().is_err());
        assert!(StimulusSettings::new("#169976", 200, 60).validate().is_ok());
        assert!(StimulusSettings::new("#169976", 100, 4).validate().is_err());
    }
}
