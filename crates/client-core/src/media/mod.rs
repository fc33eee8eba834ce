//! Local media capture
//!
//! - [`track`]: tracks and the capture handle grouping them
//! - [`device`]: device listing, constraints and the backend seam
//! - [`acquirer`]: the only component allowed to start or stop hardware
//! - [`simulated`]: an in-process backend for tests and demos

pub mod acquirer;
pub mod device;
pub mod simulated;
pub mod track;

pub use acquirer::MediaAcquirer;
pub use device::{
    AudioConstraints, CaptureBackend, DeviceInfo, MediaAccessError, MediaConstraints,
    VideoConstraints,
};
pub use simulated::SimulatedCaptureBackend;
pub use track::{MediaCaptureHandle, MediaTrack, TrackKind, TrackSource};
