//! Simulated capture backend
//!
//! Stands in for real cameras and microphones in tests and the loopback demo.
//! It keeps count of how many tracks per kind hold "hardware" so tests can
//! check that nothing is left running, and it can be told to deny access,
//! fail a single open, or take a while before granting a device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::device::{CaptureBackend, DeviceInfo, MediaAccessError, MediaConstraints};
use super::track::{MediaTrack, TrackKind, TrackSource};

#[derive(Debug, Default)]
struct LiveCounters {
    live: HashMap<TrackKind, usize>,
    max_live: HashMap<TrackKind, usize>,
    opened: HashMap<TrackKind, usize>,
}

impl LiveCounters {
    fn started(&mut self, kind: TrackKind) {
        let live = self.live.entry(kind).or_default();
        *live += 1;
        let current = *live;
        let max = self.max_live.entry(kind).or_default();
        *max = (*max).max(current);
        *self.opened.entry(kind).or_default() += 1;
    }

    fn stopped(&mut self, kind: TrackKind) {
        if let Some(live) = self.live.get_mut(&kind) {
            *live = live.saturating_sub(1);
        }
    }
}

#[derive(Debug)]
struct SimulatedSource {
    kind: TrackKind,
    live: AtomicBool,
    enabled: AtomicBool,
    counters: Arc<Mutex<LiveCounters>>,
}

impl TrackSource for SimulatedSource {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.counters.lock().stopped(self.kind);
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// In-process capture backend with two cameras and two microphones
#[derive(Debug)]
pub struct SimulatedCaptureBackend {
    devices: Vec<DeviceInfo>,
    counters: Arc<Mutex<LiveCounters>>,
    denied: AtomicBool,
    delay: Mutex<Option<Duration>>,
    fail_next: Mutex<HashMap<TrackKind, MediaAccessError>>,
    next_id: AtomicU64,
}

impl Default for SimulatedCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCaptureBackend {
    pub fn new() -> Self {
        let device = |id: &str, label: &str, kind, is_default| DeviceInfo {
            id: id.to_string(),
            label: label.to_string(),
            kind,
            is_default,
        };
        Self {
            devices: vec![
                device("cam-0", "Built-in Camera", TrackKind::Video, true),
                device("cam-1", "USB Camera", TrackKind::Video, false),
                device("mic-0", "Built-in Microphone", TrackKind::Audio, true),
                device("mic-1", "", TrackKind::Audio, false),
            ],
            counters: Arc::new(Mutex::new(LiveCounters::default())),
            denied: AtomicBool::new(false),
            delay: Mutex::new(None),
            fail_next: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Refuse every open with [`MediaAccessError::PermissionDenied`]
    pub fn deny_access(&self) {
        self.denied.store(true, Ordering::SeqCst);
    }

    /// Undo [`deny_access`](Self::deny_access)
    pub fn allow_access(&self) {
        self.denied.store(false, Ordering::SeqCst);
    }

    /// Wait this long inside every `open_track`
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Fail the next open of `kind` with `error`
    pub fn fail_kind(&self, kind: TrackKind, error: MediaAccessError) {
        self.fail_next.lock().insert(kind, error);
    }

    /// Tracks of `kind` currently holding a device
    pub fn live_tracks(&self, kind: TrackKind) -> usize {
        self.counters.lock().live.get(&kind).copied().unwrap_or(0)
    }

    /// Highest number of simultaneously live tracks of `kind` seen so far
    pub fn max_live_observed(&self, kind: TrackKind) -> usize {
        self.counters.lock().max_live.get(&kind).copied().unwrap_or(0)
    }

    /// Total tracks of `kind` ever opened
    pub fn opened_tracks(&self, kind: TrackKind) -> usize {
        self.counters.lock().opened.get(&kind).copied().unwrap_or(0)
    }
}

#[async_trait]
impl CaptureBackend for SimulatedCaptureBackend {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaAccessError> {
        Ok(self.devices.clone())
    }

    async fn open_track(
        &self,
        kind: TrackKind,
        device_id: Option<&str>,
        _constraints: &MediaConstraints,
    ) -> Result<MediaTrack, MediaAccessError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.denied.load(Ordering::SeqCst) {
            return Err(MediaAccessError::PermissionDenied);
        }
        if let Some(err) = self.fail_next.lock().remove(&kind) {
            return Err(err);
        }

        let device = match device_id {
            Some(id) => self
                .devices
                .iter()
                .find(|d| d.kind == kind && d.id == id)
                .ok_or_else(|| MediaAccessError::DeviceNotFound {
                    device_id: id.to_string(),
                })?,
            None => self
                .devices
                .iter()
                .find(|d| d.kind == kind && d.is_default)
                .ok_or(MediaAccessError::NoDevice { kind })?,
        };

        self.counters.lock().started(kind);
        let source = Arc::new(SimulatedSource {
            kind,
            live: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            counters: self.counters.clone(),
        });
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(MediaTrack::new(
            format!("{}-{}", kind, n),
            kind,
            device.id.clone(),
            device.label.clone(),
            source,
        ))
    }
}
