//! Local capture tracks and the capture handle that groups them

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Kind of a capture track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Microphone
    Audio,
    /// Camera
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Hardware side of a track, implemented by capture backends
///
/// `stop` must release the device (and its indicator light) and be safe to
/// call more than once.
pub trait TrackSource: Send + Sync + fmt::Debug {
    /// Pause or resume frame delivery without releasing the device
    fn set_enabled(&self, enabled: bool);
    /// Release the device
    fn stop(&self);
    /// Whether the device is still held
    fn is_live(&self) -> bool;
}

#[derive(Debug)]
struct TrackInfo {
    id: String,
    kind: TrackKind,
    device_id: String,
    label: String,
}

/// Cheaply clonable handle to one live capture track
///
/// Clones share state: disabling one clone disables the track everywhere it
/// is attached. Only the [`MediaAcquirer`](crate::media::MediaAcquirer) may
/// stop a track.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    info: Arc<TrackInfo>,
    enabled: Arc<AtomicBool>,
    source: Arc<dyn TrackSource>,
}

impl MediaTrack {
    /// Wrap a backend source
    pub fn new(
        id: impl Into<String>,
        kind: TrackKind,
        device_id: impl Into<String>,
        label: impl Into<String>,
        source: Arc<dyn TrackSource>,
    ) -> Self {
        Self {
            info: Arc::new(TrackInfo {
                id: id.into(),
                kind,
                device_id: device_id.into(),
                label: label.into(),
            }),
            enabled: Arc::new(AtomicBool::new(true)),
            source,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn kind(&self) -> TrackKind {
        self.info.kind
    }

    pub fn device_id(&self) -> &str {
        &self.info.device_id
    }

    pub fn label(&self) -> &str {
        &self.info.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        self.source.is_live()
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.source.set_enabled(enabled);
    }

    pub(crate) fn stop(&self) {
        self.source.stop();
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.info.id == other.info.id
    }
}

impl Eq for MediaTrack {}

/// The local capture stream: zero or more live tracks
#[derive(Debug, Clone, Default)]
pub struct MediaCaptureHandle {
    tracks: Vec<MediaTrack>,
}

impl MediaCaptureHandle {
    pub(crate) fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    /// All tracks, video first
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Tracks of one kind
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub(crate) fn push(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    /// Stop and remove every track of `kind`, returning how many were removed
    pub(crate) fn stop_kind(&mut self, kind: TrackKind) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|t| {
            if t.kind() == kind {
                t.stop();
                false
            } else {
                true
            }
        });
        before - self.tracks.len()
    }

    pub(crate) fn stop_all(&mut self) {
        for track in self.tracks.drain(..) {
            track.stop();
        }
    }
}
