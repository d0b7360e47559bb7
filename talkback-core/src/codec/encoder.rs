//! Capture frame → 16-bit PCM wire chunk.

use crate::{
    buffering::chunk::AudioFrame,
    codec::{MimeDescriptor, WireChunk},
    error::{Result, TalkbackError},
};

/// Quantises fixed-length mono frames into `audio/pcm;rate=<capture rate>` chunks.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    frame_len: usize,
    descriptor: MimeDescriptor,
}

impl FrameEncoder {
    pub fn new(frame_len: usize, sample_rate: u32) -> Self {
        Self {
            frame_len,
            descriptor: MimeDescriptor::pcm16_mono(sample_rate),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Encode one frame. Out-of-range amplitudes are clamped before
    /// quantisation, so the output is a pure function of the input.
    ///
    /// # Errors
    /// `FrameLength` if the frame is not exactly `frame_len` samples.
    pub fn encode(&self, frame: AudioFrame) -> Result<WireChunk> {
        if frame.len() != self.frame_len {
            return Err(TalkbackError::FrameLength {
                expected: self.frame_len,
                actual: frame.len(),
            });
        }

        let mut data = Vec::with_capacity(frame.len() * 2);
        for &sample in frame.samples() {
            data.extend_from_slice(&quantize(sample).to_le_bytes());
        }
        Ok(WireChunk::new(self.descriptor, data))
    }
}

/// Map [-1.0, 1.0] onto i16 with a 1/32768 step. NaN encodes as silence.
fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * 32768.0)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
