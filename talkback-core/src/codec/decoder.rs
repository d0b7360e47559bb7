//! Wire chunk → device-native playback buffer.

use crate::{
    audio::resample::resample_block,
    buffering::chunk::PlaybackUnit,
    codec::{SampleEncoding, WireChunk},
    error::{Result, TalkbackError},
};

/// Stateless decoder; every chunk is independent.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode `chunk` into interleaved f32 at `target_rate` × `target_channels`.
    ///
    /// # Errors
    /// `Decode` when the payload is not a whole number of frames for its
    /// descriptor, or the target layout is unusable. Callers drop the chunk
    /// and keep going.
    pub fn decode(
        &self,
        chunk: &WireChunk,
        target_rate: u32,
        target_channels: u16,
    ) -> Result<PlaybackUnit> {
        if target_rate == 0 || target_channels == 0 {
            return Err(TalkbackError::Decode(format!(
                "unusable target layout {target_rate} Hz x {target_channels} ch"
            )));
        }

        let descriptor = chunk.descriptor();
        let frame_width = descriptor.frame_width();
        if chunk.len() % frame_width != 0 {
            return Err(TalkbackError::Decode(format!(
                "{} payload bytes is not a multiple of the {frame_width}-byte frame ({descriptor})",
                chunk.len()
            )));
        }

        let samples = to_f32(chunk.data(), descriptor.encoding);
        let planes = remap_channels(&samples, descriptor.channels as usize, target_channels as usize);
        let planes = resample_block(planes, descriptor.sample_rate, target_rate)?;

        PlaybackUnit::new(interleave(&planes), target_rate, target_channels)
    }
}

fn to_f32(data: &[u8], encoding: SampleEncoding) -> Vec<f32> {
    match encoding {
        SampleEncoding::S16Le => data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        SampleEncoding::F32Le => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    }
}

/// Split interleaved `samples` into `target` planes. Mono is duplicated;
/// any other mismatch goes through a mono average first.
fn remap_channels(samples: &[f32], source: usize, target: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / source;
    if source == target {
        return (0..source)
            .map(|c| samples.iter().skip(c).step_by(source).copied().collect())
            .collect();
    }

    let mono: Vec<f32> = if source == 1 {
        samples.to_vec()
    } else {
        (0..frames)
            .map(|f| samples[f * source..(f + 1) * source].iter().sum::<f32>() / source as f32)
            .collect()
    };
    vec![mono; target]
}

fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    let channels = planes.len();
    let frames = planes.first().map(Vec::len).unwrap_or(0);
    let mut out = Vec::with_capacity(frames * channels);
    for f in 0..frames {
        for plane in planes {
            out.push(plane[f]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::chunk::AudioFrame;
    use crate::codec::{FrameEncoder, MimeDescriptor};
    use approx::assert_abs_diff_eq;

    #[test]
    fn round_trip_within_one_quantisation_step() {
        let encoder = FrameEncoder::new(4096, 16_000);
        let mut samples: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.013).sin() * 0.999)
            .collect();
        samples[0] = 1.0;
        samples[1] = -1.0;
        samples[2] = 0.0;

        let chunk = encoder.encode(AudioFrame::new(samples.clone(), 16_000)).unwrap();
        let unit = FrameDecoder::new().decode(&chunk, 16_000, 1).unwrap();

        assert_eq!(unit.samples().len(), samples.len());
        for (got, want) in unit.samples().iter().zip(&samples) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1.0 / 32768.0 + f32::EPSILON);
        }
    }

    #[test]
    fn odd_byte_count_is_a_decode_error() {
        let chunk = WireChunk::new(MimeDescriptor::pcm16_mono(24_000), vec![0, 0, 0]);
        let err = FrameDecoder::new().decode(&chunk, 24_000, 1).unwrap_err();
        assert!(matches!(err, TalkbackError::Decode(_)));
    }

    #[test]
    fn float_payload_is_read_raw() {
        let descriptor: MimeDescriptor = "audio/pcm;rate=24000;encoding=f32le".parse().unwrap();
        let data: Vec<u8> = [0.25f32, -0.75].iter().flat_map(|s| s.to_le_bytes()).collect();
        let unit = FrameDecoder::new()
            .decode(&WireChunk::new(descriptor, data), 24_000, 1)
            .unwrap();
        assert_eq!(unit.samples(), &[0.25, -0.75]);
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let data: Vec<u8> = [16384i16, -16384].iter().flat_map(|s| s.to_le_bytes()).collect();
        let unit = FrameDecoder::new()
            .decode(&WireChunk::new(MimeDescriptor::pcm16_mono(24_000), data), 24_000, 2)
            .unwrap();
        assert_eq!(unit.channels(), 2);
        assert_eq!(unit.samples(), &[0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn service_rate_is_upsampled_to_device_rate() {
        let data = vec![0u8; 24_000 * 2 / 10]; // 100 ms at 24 kHz
        let unit = FrameDecoder::new()
            .decode(&WireChunk::new(MimeDescriptor::pcm16_mono(24_000), data), 48_000, 2)
            .unwrap();
        assert_eq!(unit.sample_rate(), 48_000);
        assert_eq!(unit.frames(), 4_800);
        assert_abs_diff_eq!(unit.duration(), 0.1, epsilon = 1e-9);
    }

    #[test]
    fn empty_chunk_decodes_to_empty_unit() {
        let chunk = WireChunk::new(MimeDescriptor::pcm16_mono(24_000), Vec::new());
        let unit = FrameDecoder::new().decode(&chunk, 48_000, 2).unwrap();
        assert!(unit.is_empty());
        assert_eq!(unit.duration(), 0.0);
    }
}
