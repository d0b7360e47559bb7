//! Gapless playback scheduling on the output device timeline.
//!
//! ```text
//! start_i   = max(next_start_time, device.current_time())
//! next_start_time = start_i + duration_i
//! ```
//!
//! Units are never reordered and never overlap. Only the interruption and
//! session-reset paths may move `next_start_time` backwards.

pub mod interruption;

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::{
    audio::output::{OutputDevice, VoiceId},
    buffering::chunk::PlaybackUnit,
    error::Result,
};

pub use interruption::InterruptionHandler;

/// Timeline interval of one scheduled unit, in device seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUnit {
    pub voice: VoiceId,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledUnit {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub struct PlaybackScheduler {
    device: Box<dyn OutputDevice>,
    next_start_time: f64,
    active: BTreeMap<VoiceId, ScheduledUnit>,
    next_voice: u64,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        info!(
            sample_rate = device.sample_rate(),
            channels = device.channels(),
            "playback scheduler ready"
        );
        Self {
            device,
            next_start_time: 0.0,
            active: BTreeMap::new(),
            next_voice: 0,
        }
    }

    pub fn output_rate(&self) -> u32 {
        self.device.sample_rate()
    }

    pub fn output_channels(&self) -> u16 {
        self.device.channels()
    }

    pub fn current_time(&self) -> f64 {
        self.device.current_time()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Scheduled-but-unfinished units in start order.
    pub fn active_units(&self) -> Vec<ScheduledUnit> {
        let mut units: Vec<_> = self.active.values().copied().collect();
        units.sort_by(|a, b| a.start.total_cmp(&b.start));
        units
    }

    /// Place `unit` right after everything already scheduled, or at the
    /// device's current time if the timeline has drained.
    ///
    /// Returns `None` for an empty unit.
    ///
    /// # Errors
    /// A `Device`-kind error if the output stream refused the unit; the clock
    /// is left untouched in that case.
    pub fn enqueue(&mut self, unit: PlaybackUnit) -> Result<Option<ScheduledUnit>> {
        if unit.is_empty() {
            debug!("ignoring zero-length playback unit");
            return Ok(None);
        }

        let now = self.device.current_time();
        let start = self.next_start_time.max(now);
        let duration = unit.duration();
        let voice = VoiceId(self.next_voice);

        self.device.schedule(voice, unit, start)?;
        self.next_voice += 1;
        self.next_start_time = start + duration;

        let scheduled = ScheduledUnit {
            voice,
            start,
            duration,
        };
        self.active.insert(voice, scheduled);
        debug!(
            ?voice,
            start,
            duration,
            lead = start - now,
            "unit scheduled"
        );
        Ok(Some(scheduled))
    }

    /// Natural completion reported by the output device. Returns `false` for
    /// a voice that is no longer active.
    pub fn on_unit_finished(&mut self, voice: VoiceId) -> bool {
        let known = self.active.remove(&voice).is_some();
        if !known {
            // Already flushed by an interruption; the report raced the stop.
            debug!(?voice, "finish report for unknown voice");
        }
        known
    }

    /// Session reset: drop everything and restart the timeline at "now".
    pub fn reset(&mut self) -> usize {
        let flushed = self.flush();
        let now = self.device.current_time();
        self.rewind_to(now);
        flushed
    }

    /// Force-stop every active unit in one device call. Returns how many
    /// were stopped.
    pub(crate) fn flush(&mut self) -> usize {
        let active: Vec<VoiceId> = std::mem::take(&mut self.active).into_keys().collect();
        self.device.flush(&active);
        active.len()
    }

    pub(crate) fn rewind_to(&mut self, t: f64) {
        self.next_start_time = t.max(0.0);
    }
}
