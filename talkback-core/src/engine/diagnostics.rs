//! Engine counters, readable from any thread.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct EngineDiagnostics {
    pub samples_captured: AtomicUsize,
    pub frames_encoded: AtomicUsize,
    pub frames_sent: AtomicUsize,
    /// Frames produced while the session was not accepting sends.
    pub frames_dropped: AtomicUsize,
    pub chunks_received: AtomicUsize,
    pub units_scheduled: AtomicUsize,
    pub units_finished: AtomicUsize,
    /// Completions the output callback could not report.
    pub reports_dropped: AtomicUsize,
    pub decode_errors: AtomicUsize,
    pub schedule_errors: AtomicUsize,
    pub interruptions: AtomicUsize,
    pub units_flushed: AtomicUsize,
}

impl EngineDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            units_scheduled: self.units_scheduled.load(Ordering::Relaxed),
            units_finished: self.units_finished.load(Ordering::Relaxed),
            reports_dropped: self.reports_dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            schedule_errors: self.schedule_errors.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            units_flushed: self.units_flushed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn counters(&self) -> [&AtomicUsize; 12] {
        [
            &self.samples_captured,
            &self.frames_encoded,
            &self.frames_sent,
            &self.frames_dropped,
            &self.chunks_received,
            &self.units_scheduled,
            &self.units_finished,
            &self.reports_dropped,
            &self.decode_errors,
            &self.schedule_errors,
            &self.interruptions,
            &self.units_flushed,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub samples_captured: usize,
    pub frames_encoded: usize,
    pub frames_sent: usize,
    pub frames_dropped: usize,
    pub chunks_received: usize,
    pub units_scheduled: usize,
    pub units_finished: usize,
    pub reports_dropped: usize,
    pub decode_errors: usize,
    pub schedule_errors: usize,
    pub interruptions: usize,
    pub units_flushed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_every_counter() {
        let diag = EngineDiagnostics::default();
        for counter in diag.counters() {
            EngineDiagnostics::bump(counter);
        }
        assert_eq!(diag.snapshot().units_flushed, 1);
        diag.reset();
        assert_eq!(diag.snapshot(), DiagnosticsSnapshot::default());
    }
}
