//! Sample buffers on either side of the codec.

use crate::error::{Result, TalkbackError};

/// One fixed-size block of captured mono samples, before encoding.
///
/// Frames are moved into the encoder, so each one is consumed exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A decoded PCM buffer ready for the output device.
///
/// Samples are interleaved f32 in [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackUnit {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackUnit {
    /// # Errors
    /// `Decode` when `channels` is zero, `sample_rate` is zero, or the sample
    /// count does not divide evenly into frames.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if channels == 0 || sample_rate == 0 {
            return Err(TalkbackError::Decode(format!(
                "invalid playback layout: {sample_rate} Hz x {channels} ch"
            )));
        }
        if samples.len() % channels as usize != 0 {
            return Err(TalkbackError::Decode(format!(
                "{} samples do not split into {channels}-channel frames",
                samples.len()
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
