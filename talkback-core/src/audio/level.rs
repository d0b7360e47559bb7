//! Shared volume-control handles.
//!
//! One tap sits on the captured input, one on the mixed output. Each carries a
//! gain the UI may set and the RMS level of the most recent block, both stored
//! as f32 bits in atomics so the real-time callbacks never lock.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

#[derive(Debug)]
struct TapInner {
    gain: AtomicU32,
    level: AtomicU32,
}

/// Cloneable handle; all clones observe the same gain and level.
#[derive(Debug, Clone)]
pub struct VolumeTap {
    inner: Arc<TapInner>,
}

impl VolumeTap {
    pub fn new(gain: f32) -> Self {
        Self {
            inner: Arc::new(TapInner {
                gain: AtomicU32::new(sanitize_gain(gain).to_bits()),
                level: AtomicU32::new(0f32.to_bits()),
            }),
        }
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.inner.gain.load(Ordering::Relaxed))
    }

    /// Negative and non-finite gains are treated as 0.
    pub fn set_gain(&self, gain: f32) {
        self.inner
            .gain
            .store(sanitize_gain(gain).to_bits(), Ordering::Relaxed);
    }

    /// RMS of the last processed block, after gain.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.inner.level.load(Ordering::Relaxed))
    }

    /// Apply gain in place and record the resulting level. Allocation-free.
    pub fn process(&self, samples: &mut [f32]) {
        let gain = self.gain();
        if gain != 1.0 {
            for s in samples.iter_mut() {
                *s *= gain;
            }
        }
        self.record_level(samples);
    }

    /// Record the level of an already-processed block.
    pub fn record_level(&self, samples: &[f32]) {
        self.inner
            .level
            .store(compute_rms(samples).to_bits(), Ordering::Relaxed);
    }

    pub fn reset_level(&self) {
        self.inner.level.store(0f32.to_bits(), Ordering::Relaxed);
    }
}

impl Default for VolumeTap {
    fn default() -> Self {
        Self::new(1.0)
    }
}

fn sanitize_gain(gain: f32) -> f32 {
    if gain.is_finite() {
        gain.max(0.0)
    } else {
        0.0
    }
}

pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_scales_and_meters() {
        let tap = VolumeTap::new(0.5);
        let mut block: Vec<f32> = (0..256).map(|i| if i % 2 == 0 { 0.8 } else { -0.8 }).collect();
        tap.process(&mut block);
        assert!((block[0] - 0.4).abs() < 1e-6);
        assert!((tap.level() - 0.4).abs() < 1e-5, "level={}", tap.level());
    }

    #[test]
    fn clones_share_state() {
        let tap = VolumeTap::default();
        let ui_handle = tap.clone();
        ui_handle.set_gain(2.0);
        assert_eq!(tap.gain(), 2.0);
        tap.record_level(&[0.5, -0.5]);
        assert!((ui_handle.level() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn bogus_gain_is_sanitized() {
        let tap = VolumeTap::default();
        tap.set_gain(f32::NAN);
        assert_eq!(tap.gain(), 0.0);
        tap.set_gain(-1.0);
        assert_eq!(tap.gain(), 0.0);
    }

    #[test]
    fn empty_block_reads_silent() {
        assert_eq!(compute_rms(&[]), 0.0);
    }
}
