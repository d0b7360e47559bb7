//! PCM framing between sample buffers and the wire.
//!
//! A [`WireChunk`] is raw PCM bytes tagged with a MIME-like
//! [`MimeDescriptor`] such as `audio/pcm;rate=16000`. No compression is
//! involved: the encoder quantises to 16-bit little-endian, the decoder turns
//! either 16-bit or 32-bit-float payloads back into f32.
//!
//! Chunks serialise to `{"mimeType": "...", "data": "<base64>"}` so that a
//! JSON-framed transport can carry them unchanged.

pub mod decoder;
pub mod encoder;

pub use decoder::FrameDecoder;
pub use encoder::FrameEncoder;

use std::{fmt, str::FromStr};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::TalkbackError;

/// Sample rate the remote service produces when a descriptor omits `rate`.
pub const DEFAULT_DESCRIPTOR_RATE: u32 = 24_000;

/// On-the-wire sample representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Signed 16-bit little-endian.
    S16Le,
    /// IEEE-754 32-bit float little-endian.
    F32Le,
}

impl SampleEncoding {
    /// Bytes per single-channel sample.
    pub fn sample_width(self) -> usize {
        match self {
            Self::S16Le => 2,
            Self::F32Le => 4,
        }
    }

    fn as_param(self) -> &'static str {
        match self {
            Self::S16Le => "s16le",
            Self::F32Le => "f32le",
        }
    }
}

/// Format tag carried alongside every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MimeDescriptor {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
}

impl MimeDescriptor {
    /// 16-bit mono PCM at `sample_rate`.
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            encoding: SampleEncoding::S16Le,
        }
    }

    /// Bytes per interleaved frame.
    pub fn frame_width(&self) -> usize {
        self.encoding.sample_width() * self.channels as usize
    }
}

impl fmt::Display for MimeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audio/pcm;rate={}", self.sample_rate)?;
        if self.channels != 1 {
            write!(f, ";channels={}", self.channels)?;
        }
        if self.encoding != SampleEncoding::S16Le {
            write!(f, ";encoding={}", self.encoding.as_param())?;
        }
        Ok(())
    }
}

impl FromStr for MimeDescriptor {
    type Err = TalkbackError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let unrecognized = || TalkbackError::Decode(format!("unrecognized descriptor '{raw}'"));

        let mut parts = raw.split(';').map(str::trim);
        let essence = parts.next().unwrap_or_default().to_ascii_lowercase();
        if essence != "audio/pcm" && essence != "audio/l16" {
            return Err(unrecognized());
        }

        let mut descriptor = Self::pcm16_mono(DEFAULT_DESCRIPTOR_RATE);
        for param in parts.filter(|p| !p.is_empty()) {
            let (key, value) = param.split_once('=').ok_or_else(unrecognized)?;
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "rate" => {
                    descriptor.sample_rate = value
                        .parse()
                        .ok()
                        .filter(|r| *r > 0)
                        .ok_or_else(unrecognized)?;
                }
                "channels" => {
                    descriptor.channels = value
                        .parse()
                        .ok()
                        .filter(|c| *c > 0)
                        .ok_or_else(unrecognized)?;
                }
                "encoding" => {
                    descriptor.encoding = match value.to_ascii_lowercase().as_str() {
                        "s16le" | "pcm_s16le" | "int16" => SampleEncoding::S16Le,
                        "f32le" | "pcm_f32le" | "float32" | "float" => SampleEncoding::F32Le,
                        _ => return Err(unrecognized()),
                    };
                }
                // Unknown parameters (codecs=, etc.) are tolerated.
                _ => {}
            }
        }
        Ok(descriptor)
    }
}

/// One independently decodable unit of encoded audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireChunkRepr", into = "WireChunkRepr")]
pub struct WireChunk {
    descriptor: MimeDescriptor,
    data: Vec<u8>,
}

impl WireChunk {
    pub fn new(descriptor: MimeDescriptor, data: Vec<u8>) -> Self {
        Self { descriptor, data }
    }

    /// Build a chunk from a MIME string and base64 payload, as JSON
    /// transports deliver them.
    ///
    /// # Errors
    /// `Decode` for an unrecognised descriptor or invalid base64.
    pub fn from_base64(mime_type: &str, data: &str) -> crate::error::Result<Self> {
        let descriptor = mime_type.parse()?;
        let data = STANDARD
            .decode(data)
            .map_err(|e| TalkbackError::Decode(format!("invalid base64 payload: {e}")))?;
        Ok(Self { descriptor, data })
    }

    pub fn descriptor(&self) -> &MimeDescriptor {
        &self.descriptor
    }

    pub fn mime_type(&self) -> String {
        self.descriptor.to_string()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChunkRepr {
    mime_type: String,
    data: String,
}

impl From<WireChunk> for WireChunkRepr {
    fn from(chunk: WireChunk) -> Self {
        Self {
            data: chunk.data_base64(),
            mime_type: chunk.mime_type(),
        }
    }
}

impl TryFrom<WireChunkRepr> for WireChunk {
    type Error = TalkbackError;

    fn try_from(repr: WireChunkRepr) -> Result<Self, Self::Error> {
        WireChunk::from_base64(&repr.mime_type, &repr.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults_to_mono_s16() {
        let d: MimeDescriptor = "audio/pcm;rate=16000".parse().unwrap();
        assert_eq!(d, MimeDescriptor::pcm16_mono(16_000));
        assert_eq!(d.to_string(), "audio/pcm;rate=16000");
    }

    #[test]
    fn descriptor_without_rate_assumes_service_rate() {
        let d: MimeDescriptor = "audio/pcm".parse().unwrap();
        assert_eq!(d.sample_rate, DEFAULT_DESCRIPTOR_RATE);
    }

    #[test]
    fn descriptor_parses_float_stereo() {
        let d: MimeDescriptor = "Audio/L16; rate=48000; channels=2; encoding=f32le"
            .parse()
            .unwrap();
        assert_eq!(d.sample_rate, 48_000);
        assert_eq!(d.channels, 2);
        assert_eq!(d.encoding, SampleEncoding::F32Le);
        assert_eq!(d.frame_width(), 8);
        assert_eq!(d.to_string(), "audio/pcm;rate=48000;channels=2;encoding=f32le");
    }

    #[test]
    fn descriptor_rejects_foreign_formats() {
        assert!("audio/opus;rate=48000".parse::<MimeDescriptor>().is_err());
        assert!("audio/pcm;rate=abc".parse::<MimeDescriptor>().is_err());
        assert!("audio/pcm;rate=0".parse::<MimeDescriptor>().is_err());
        assert!("audio/pcm;encoding=mulaw".parse::<MimeDescriptor>().is_err());
    }

    #[test]
    fn chunk_serializes_as_mime_and_base64() {
        let chunk = WireChunk::new(MimeDescriptor::pcm16_mono(16_000), vec![0x01, 0x00, 0xff, 0x7f]);
        let json = serde_json::to_value(&chunk).expect("serialize chunk");
        assert_eq!(json["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["data"], "AQD/fw==");

        let back: WireChunk = serde_json::from_value(json).expect("deserialize chunk");
        assert_eq!(back, chunk);
    }

    #[test]
    fn chunk_with_bad_base64_fails_to_deserialize() {
        let raw = r#"{"mimeType":"audio/pcm;rate=24000","data":"***"}"#;
        assert!(serde_json::from_str::<WireChunk>(raw).is_err());
    }
}
