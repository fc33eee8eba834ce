//! Stimulus activation with deterministic auto-expiry
//!
//! Both ends arm the stimulus for the current settings duration whenever a
//! start is issued or received, so a lost stop message still clears the
//! visual on both sides. Every arm or stop bumps a generation counter; an
//! expiry carrying an older generation is ignored.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::message::StimulusSettings;

/// Local stimulus state
#[derive(Debug)]
pub struct Stimulus {
    active: bool,
    settings: StimulusSettings,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Stimulus {
    pub fn new(settings: StimulusSettings) -> Self {
        Self {
            active: false,
            settings,
            generation: 0,
            timer: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn settings(&self) -> &StimulusSettings {
        &self.settings
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Activate, replacing any pending expiry
    ///
    /// `schedule` receives the new generation and the activation length and
    /// must arrange for [`expire`](Self::expire) to be called with that
    /// generation once the time has passed.
    pub fn arm<F>(&mut self, schedule: F) -> u64
    where
        F: FnOnce(u64, Duration) -> JoinHandle<()>,
    {
        self.cancel_timer();
        self.generation += 1;
        self.active = true;
        let duration = self.settings.duration();
        self.timer = Some(schedule(self.generation, duration));
        debug!(
            generation = self.generation,
            duration_secs = duration.as_secs(),
            "Stimulus armed"
        );
        self.generation
    }

    /// Deactivate now; returns whether it was active
    pub fn stop(&mut self) -> bool {
        self.cancel_timer();
        self.generation += 1;
        std::mem::replace(&mut self.active, false)
    }

    /// Timer callback; only the latest generation deactivates
    pub fn expire(&mut self, generation: u64) -> bool {
        if generation != self.generation || !self.active {
            return false;
        }
        self.timer = None;
        self.active = false;
        debug!(generation, "Stimulus expired");
        true
    }

    /// Settings used by the next activation
    pub fn apply_settings(&mut self, settings: StimulusSettings) {
        self.settings = settings;
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Stimulus {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
