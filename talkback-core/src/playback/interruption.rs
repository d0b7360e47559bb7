//! Barge-in: the service says the user is talking over the response.

use tracing::info;

use crate::playback::PlaybackScheduler;

#[derive(Debug, Default)]
pub struct InterruptionHandler {
    interruptions: u64,
    flushed_units: u64,
}

impl InterruptionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop every scheduled unit and pull the clock back to the device's
    /// current time, so the next response starts immediately. Returns how
    /// many units were cut.
    pub fn on_interrupted(&mut self, scheduler: &mut PlaybackScheduler) -> usize {
        let flushed = scheduler.flush();
        let now = scheduler.current_time();
        scheduler.rewind_to(now);

        self.interruptions += 1;
        self.flushed_units += flushed as u64;
        info!(flushed, resume_at = now, "playback interrupted");
        flushed
    }

    pub fn interruptions(&self) -> u64 {
        self.interruptions
    }

    pub fn flushed_units(&self) -> u64 {
        self.flushed_units
    }
}
