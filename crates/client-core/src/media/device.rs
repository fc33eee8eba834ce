//! Capture device abstraction
//!
//! This module defines the seam between the session core and whatever
//! actually owns cameras and microphones (a browser bridge, a native capture
//! library, or the simulated backend used by tests).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::track::{MediaTrack, TrackKind};

/// Why local capture could not be obtained
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaAccessError {
    #[error("permission to use the camera or microphone was denied")]
    PermissionDenied,

    #[error("no {kind} input device is available")]
    NoDevice { kind: TrackKind },

    #[error("device {device_id} was not found")]
    DeviceNotFound { device_id: String },

    #[error("device {device} is busy")]
    DeviceBusy { device: String },

    #[error("constraint {constraint} cannot be satisfied")]
    ConstraintNotSatisfied { constraint: String },

    #[error("no local capture is active")]
    NotAcquired,

    #[error("capture backend error: {message}")]
    Backend { message: String },
}

impl MediaAccessError {
    /// Whether an identical request may succeed later on its own
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MediaAccessError::DeviceBusy { .. } | MediaAccessError::Backend { .. }
        )
    }
}

/// Information about one capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Backend device identifier
    pub id: String,
    /// Human-readable name (may be empty before permission is granted)
    pub label: String,
    /// Audio or video input
    pub kind: TrackKind,
    /// Whether this is the system default for its kind
    pub is_default: bool,
}

impl DeviceInfo {
    /// Label to show, falling back to "Camera N" / "Microphone N" like the
    /// device picker does when the backend hides names
    pub fn display_label(&self, index: usize) -> String {
        if !self.label.is_empty() {
            return self.label.clone();
        }
        match self.kind {
            TrackKind::Video => format!("Camera {}", index + 1),
            TrackKind::Audio => format!("Microphone {}", index + 1),
        }
    }
}

/// Ideal/minimum video capture parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub ideal_width: u32,
    pub min_width: u32,
    pub ideal_height: u32,
    pub min_height: u32,
    pub ideal_frame_rate: u32,
    pub min_frame_rate: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            min_width: 640,
            ideal_height: 720,
            min_height: 480,
            ideal_frame_rate: 30,
            min_frame_rate: 15,
        }
    }
}

/// Audio processing requested from the capture backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Constraints for a capture request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// `None` disables video capture
    pub video: Option<VideoConstraints>,
    /// `None` disables audio capture
    pub audio: Option<AudioConstraints>,
}

impl MediaConstraints {
    /// Camera and microphone with default quality targets
    pub fn audio_video() -> Self {
        Self {
            video: Some(VideoConstraints::default()),
            audio: Some(AudioConstraints::default()),
        }
    }

    /// Kinds requested, video first
    pub fn kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.video.is_some() {
            kinds.push(TrackKind::Video);
        }
        if self.audio.is_some() {
            kinds.push(TrackKind::Audio);
        }
        kinds
    }
}

/// Capture backend trait
///
/// Implementations open hardware tracks. Each returned [`MediaTrack`] holds
/// the device until its source is stopped.
#[async_trait]
pub trait CaptureBackend: Send + Sync + fmt::Debug {
    /// List input devices
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaAccessError>;

    /// Open one track of `kind`, from `device_id` or the default device
    async fn open_track(
        &self,
        kind: TrackKind,
        device_id: Option<&str>,
        constraints: &MediaConstraints,
    ) -> Result<MediaTrack, MediaAccessError>;
}
