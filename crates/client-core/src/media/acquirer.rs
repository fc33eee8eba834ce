//! Media Acquirer
//!
//! Owns the single local [`MediaCaptureHandle`]. Every start, stop, mute and
//! device switch goes through here so no hardware track is ever left running
//! behind the session's back.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::device::{CaptureBackend, DeviceInfo, MediaAccessError, MediaConstraints};
use super::track::{MediaCaptureHandle, MediaTrack, TrackKind};

/// Acquires and manages the local capture stream
#[derive(Debug)]
pub struct MediaAcquirer {
    backend: Arc<dyn CaptureBackend>,
    constraints: MediaConstraints,
    handle: Option<MediaCaptureHandle>,
    /// Device chosen per kind; `None` means the backend default
    preferred: HashMap<TrackKind, String>,
}

impl MediaAcquirer {
    /// Create an acquirer that requests `constraints` by default
    pub fn new(backend: Arc<dyn CaptureBackend>, constraints: MediaConstraints) -> Self {
        Self {
            backend,
            constraints,
            handle: None,
            preferred: HashMap::new(),
        }
    }

    /// Acquire camera and microphone using the default constraints
    pub async fn acquire_default(&mut self) -> Result<&MediaCaptureHandle, MediaAccessError> {
        let constraints = self.constraints.clone();
        self.acquire(&constraints).await
    }

    /// Acquire a fresh capture handle
    ///
    /// Any existing handle is released first. If one kind fails to open, or
    /// the attempt is dropped before it completes, the tracks it already
    /// opened are stopped.
    pub async fn acquire(
        &mut self,
        constraints: &MediaConstraints,
    ) -> Result<&MediaCaptureHandle, MediaAccessError> {
        self.release();

        let mut opened = PendingTracks::default();
        for kind in constraints.kinds() {
            let device = self.preferred.get(&kind).cloned();
            match self
                .backend
                .open_track(kind, device.as_deref(), constraints)
                .await
            {
                Ok(track) => {
                    debug!(kind = %kind, device = track.device_id(), "Opened capture track");
                    opened.0.push(track);
                }
                Err(e) => {
                    warn!(
                        kind = %kind,
                        error = %e,
                        stopped = opened.0.len(),
                        "Media acquisition failed"
                    );
                    return Err(e);
                }
            }
        }

        let tracks = opened.into_tracks();
        info!(tracks = tracks.len(), "Local media acquired");
        Ok(self.handle.insert(MediaCaptureHandle::new(tracks)))
    }

    /// Toggle `enabled` on existing tracks without releasing hardware
    ///
    /// Returns the number of tracks touched.
    pub fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) -> usize {
        let Some(handle) = self.handle.as_ref() else {
            return 0;
        };
        let mut touched = 0;
        for track in handle.tracks_of(kind) {
            track.set_enabled(enabled);
            touched += 1;
        }
        debug!(kind = %kind, enabled, touched, "Track enabled state changed");
        touched
    }

    /// Replace the tracks of `kind` with one from `device_id`
    ///
    /// Old tracks of that kind are stopped before the new one is opened, so at
    /// most one track of the kind is live at any time. Without an active
    /// handle only the preference is stored (for the next acquisition) and
    /// `Ok(None)` is returned.
    pub async fn switch_device(
        &mut self,
        kind: TrackKind,
        device_id: &str,
    ) -> Result<Option<MediaTrack>, MediaAccessError> {
        let Some(handle) = self.handle.as_mut() else {
            self.preferred.insert(kind, device_id.to_string());
            return Ok(None);
        };

        let was_enabled = handle
            .tracks_of(kind)
            .next()
            .map(MediaTrack::is_enabled)
            .unwrap_or(true);
        let stopped = handle.stop_kind(kind);
        debug!(kind = %kind, stopped, device = device_id, "Switching capture device");

        let track = self
            .backend
            .open_track(kind, Some(device_id), &self.constraints)
            .await?;

        // The handle may have been released while the backend was opening.
        let Some(handle) = self.handle.as_mut() else {
            track.stop();
            return Err(MediaAccessError::NotAcquired);
        };
        track.set_enabled(was_enabled);
        handle.push(track.clone());
        self.preferred.insert(kind, device_id.to_string());
        info!(kind = %kind, device = device_id, "Capture device switched");
        Ok(Some(track))
    }

    /// Stop and drop the tracks of one kind, keeping the rest of the handle
    pub fn stop_kind(&mut self, kind: TrackKind) -> usize {
        match self.handle.as_mut() {
            Some(handle) => handle.stop_kind(kind),
            None => 0,
        }
    }

    /// Re-open a track of `kind` from the preferred device after [`stop_kind`]
    ///
    /// [`stop_kind`]: MediaAcquirer::stop_kind
    pub async fn restore_kind(&mut self, kind: TrackKind) -> Result<MediaTrack, MediaAccessError> {
        if self.handle.is_none() {
            return Err(MediaAccessError::NotAcquired);
        }
        let device = self.preferred.get(&kind).cloned();
        let track = self
            .backend
            .open_track(kind, device.as_deref(), &self.constraints)
            .await?;
        let Some(handle) = self.handle.as_mut() else {
            track.stop();
            return Err(MediaAccessError::NotAcquired);
        };
        handle.stop_kind(kind);
        handle.push(track.clone());
        Ok(track)
    }

    /// Stop every track; safe to call repeatedly
    pub fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            let count = handle.tracks().len();
            handle.stop_all();
            info!(tracks = count, "Local media released");
        }
    }

    /// List input devices, optionally of one kind
    pub async fn list_devices(
        &self,
        kind: Option<TrackKind>,
    ) -> Result<Vec<DeviceInfo>, MediaAccessError> {
        let devices = self.backend.enumerate_devices().await?;
        Ok(devices
            .into_iter()
            .filter(|d| kind.map_or(true, |k| d.kind == k))
            .collect())
    }

    pub fn handle(&self) -> Option<&MediaCaptureHandle> {
        self.handle.as_ref()
    }

    /// Whether a non-empty capture handle exists
    pub fn has_media(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_empty())
    }

    /// Clones of the current tracks (empty without a handle)
    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.handle
            .as_ref()
            .map(|h| h.tracks().to_vec())
            .unwrap_or_default()
    }

    /// Whether a live, enabled track of `kind` exists
    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        self.handle.as_ref().is_some_and(|h| {
            h.tracks_of(kind)
                .any(|t| t.is_enabled() && t.is_live())
        })
    }
}

impl Drop for MediaAcquirer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Tracks opened by an acquisition that has not finished yet
///
/// Stops whatever it still holds when dropped.
#[derive(Default)]
struct PendingTracks(Vec<MediaTrack>);

impl PendingTracks {
    fn into_tracks(mut self) -> Vec<MediaTrack> {
        std::mem::take(&mut self.0)
    }
}

impl Drop for PendingTracks {
    fn drop(&mut self) {
        for track in &self.0 {
            track.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::media::simulated::SimulatedCaptureBackend;

    fn acquirer(backend: &Arc<SimulatedCaptureBackend>) -> MediaAcquirer {
        MediaAcquirer::new(backend.clone(), MediaConstraints::audio_video())
    }

    #[tokio::test]
    async fn acquire_opens_video_then_audio() {
        let backend = Arc::new(SimulatedCaptureBackend::new());
        let mut media = acquirer(&backend);

        let handle = media.acquire_default().await.unwrap();
        let kinds: Vec<_> = handle.tracks().iter().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec![TrackKind::Video, TrackKind::Audio]);
        assert_eq!(backend.live_tracks(TrackKind::Video), 1);
        assert_eq!(backend.live_tracks(TrackKind::Audio), 1);
    }

    #[tokio::test]
    async fn failed_acquisition_leaves_nothing_live() {
        let backend = Arc::new(SimulatedCaptureBackend::new());
        backend.fail_kind(TrackKind::Audio, MediaAccessError::DeviceBusy {
            device: "mic-0".into(),
        });
        let mut media = acquirer(&backend);

        let err = media.acquire_default().await.unwrap_err();
        assert!(matches!(err, MediaAccessError::DeviceBusy { .. }));
        assert!(!media.has_media());
        assert_eq!(backend.live_tracks(TrackKind::Video), 0);
        assert_eq!(backend.live_tracks(TrackKind::Audio), 0);
    }

    #[tokio::test]
    async fn reacquire_stops_the_previous_handle() {
        let backend = Arc::new(SimulatedCaptureBackend::new());
        let mut media = acquirer(&backend);
        media.acquire_default().await.unwrap();
        media.acquire_default().await.unwrap();

        assert_eq!(backend.live_tracks(TrackKind::Video), 1);
        assert_eq!(backend.max_live_observed(TrackKind::Video), 1);
    }

    #[tokio::test]
    async fn mute_keeps_hardware_live() {
        let backend = Arc::new(SimulatedCaptureBackend::new());
        let mut media = acquirer(&backend);
        media.acquire_default().await.unwrap();

        assert_eq!(media.set_track_enabled(TrackKind::Audio, false), 1);
        assert!(!media.is_enabled(TrackKind::Audio));
        assert_eq!(backend.live_tracks(TrackKind::Audio), 1);

        media.set_track_enabled(TrackKind::Audio, true);
        assert!(media.is_enabled(TrackKind::Audio));
    }

    #[tokio::test]
    async fn switch_device_never_overlaps_tracks() {
        let backend = Arc::new(SimulatedCaptureBackend::new());
        let mut media = acquirer(&backend);
        media.acquire_default().await.unwrap();
        media.set_track_enabled(TrackKind::Video, false);

        let track = media
            .switch_device(TrackKind::Video, "cam-1")
            .await
            .unwrap()
            .expect("handle is active");

        assert_eq!(track.device_id(), "cam-1");
        assert!(!track.is_enabled(), "enabled flag carries over");
        assert_eq!(backend.live_tracks(TrackKind::Video), 1);
        assert_eq!(backend.max_live_observed(TrackKind::Video), 1);
        assert_eq!(media.handle().unwrap().tracks_of(TrackKind::Video).count(), 1);
    }

    #[tokio::test]
    async fn failed_switch_leaves_no_track_of_that_kind() {
        let backend = Arc::new(SimulatedCaptureBackend::new());
        let mut media = acquirer(&backend);
        media.acquire_default().await.unwrap();

        let err = media.switch_device(TrackKind::Video, "missing").await;
        assert!(matches!(err, Err(MediaAccessError::DeviceNotFound { .. })));
        assert_eq!(backend.live_tracks(TrackKind::Video), 0);
        assert_eq!(backend.live_tracks(TrackKind::Audio), 1);
    }

    #[tokio::test]
    async fn switch_without_handle_only_records_preference() {
        let backend = Arc::new(SimulatedCaptureBackend::new());
        let mut media = acquirer(&backend);

        assert!(media.switch_device(TrackKind::Video, "cam-1").await.unwrap().is_none());
        let handle = media.acquire_default().await.unwrap();
        let video = handle.tracks_of(TrackKind::Video).next().unwrap();
        assert_eq!(video.device_id(), "cam-1");
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_acquisition_stops_opened_tracks() {
        let backend = Arc::new(SimulatedCaptureBackend::new());
        backend.set_open_delay(Some(Duration::from_secs(1)));
        let media = Arc::new(tokio::sync::Mutex::new(acquirer(&backend)));

        let task = tokio::spawn({
            let media = media.clone();
            async move {
                let _ = media.lock().await.acquire_default().await;
            }
        });
        // Video is open, audio still pending
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(backend.live_tracks(TrackKind::Video), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(backend.live_tracks(TrackKind::Video), 0);
        assert_eq!(backend.live_tracks(TrackKind::Audio), 0);
        assert!(!media.lock().await.has_media());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let backend = Arc::new(SimulatedCaptureBackend::new());
        let mut media = acquirer(&backend);
        media.acquire_default().await.unwrap();

        media.release();
        media.release();
        assert!(!media.has_media());
        assert_eq!(backend.live_tracks(TrackKind::Video), 0);
        assert_eq!(backend.live_tracks(TrackKind::Audio), 0);
    }

    #[tokio::test]
    async fn stop_and_restore_video() {
        let backend = Arc::new(SimulatedCaptureBackend::new());
        let mut media = acquirer(&backend);
        media.acquire_default().await.unwrap();

        assert_eq!(media.stop_kind(TrackKind::Video), 1);
        assert_eq!(backend.live_tracks(TrackKind::Video), 0);

        let track = media.restore_kind(TrackKind::Video).await.unwrap();
        assert!(track.is_live());
        assert_eq!(backend.live_tracks(TrackKind::Video), 1);
    }
}
