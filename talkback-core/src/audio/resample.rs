//! Sample-rate conversion with rubato `FastFixedIn` resamplers.
//!
//! Two shapes are needed:
//!
//! - [`RateConverter`] is streaming: the capture side feeds it whatever the
//!   device callback delivered and gets 16 kHz mono back, with partial input
//!   carried over between calls.
//! - [`resample_block`] is one-shot: an inbound chunk is a complete segment, so
//!   it is converted in a single pass and flushed, producing exactly
//!   `round(frames * to / from)` output frames.
//!
//! Both are zero-work passthroughs when the rates already match.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, TalkbackError};

/// Converts f32 mono audio from one fixed sample rate to another, incrementally.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `AudioDevice` if either rate is zero or rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(TalkbackError::AudioDevice(format!(
                "unusable sample rate pair {source_rate} -> {target_rate}"
            )));
        }
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler =
            FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
                .map_err(|e| TalkbackError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        tracing::info!(source_rate, target_rate, chunk_size, "capture resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Resample a complete planar buffer (`planes[channel][frame]`) in one pass.
///
/// # Errors
/// `Decode` if rubato rejects the conversion.
pub fn resample_block(planes: Vec<Vec<f32>>, from: u32, to: u32) -> Result<Vec<Vec<f32>>> {
    let frames = planes.first().map(Vec::len).unwrap_or(0);
    if from == to || frames == 0 {
        return Ok(planes);
    }

    let expected = ((frames as u64 * to as u64 + from as u64 / 2) / from as u64) as usize;
    let ratio = to as f64 / from as f64;
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, frames, planes.len())
            .map_err(|e| TalkbackError::Decode(format!("resampler init: {e}")))?;

    let mut out = resampler
        .process(&planes[..], None)
        .map_err(|e| TalkbackError::Decode(format!("resample: {e}")))?;

    // Flush the interpolator tail so short chunks keep their full length.
    if out.first().map(Vec::len).unwrap_or(0) < expected {
        let tail = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| TalkbackError::Decode(format!("resample flush: {e}")))?;
        for (plane, extra) in out.iter_mut().zip(tail) {
            plane.extend(extra);
        }
    }

    for plane in &mut out {
        plane.resize(expected, 0.0);
    }
    Ok(out)
}
