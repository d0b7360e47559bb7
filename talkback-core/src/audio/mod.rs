//! Audio device I/O via the cpal backend.
//!
//! # Design constraints
//!
//! cpal callbacks run on OS audio threads at elevated priority. They **must not**:
//! - Allocate heap memory in the steady state
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! The input callback downmixes to mono and writes into an SPSC ring buffer
//! producer (`push_slice` is lock-free). The output callback renders a
//! [`output::Mixer`] fed over a bounded channel and publishes its clock through
//! an atomic.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on macOS).
//! Backends are therefore `Send` factories: the engine moves them onto its
//! loop thread and opens the streams there, so every stream is created and
//! dropped on the same thread.

pub mod device;
pub mod level;
pub mod output;
pub mod resample;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{buffering::AudioProducer, error::Result};

#[cfg(feature = "audio-cpal")]
use crate::{buffering::Producer, error::TalkbackError};
#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// A live microphone stream. Dropping it releases the device.
pub trait InputStream {
    /// Native capture rate of the device (Hz).
    fn sample_rate(&self) -> u32;
}

/// Factory for input streams; lives on the engine thread.
pub trait InputBackend: Send {
    /// Acquire the microphone and start pushing mono f32 samples into `producer`
    /// while `running` is set.
    ///
    /// # Errors
    /// A `Device`-kind error when the device is missing, denied or unsupported.
    fn open(
        &mut self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn InputStream>>;
}

/// cpal-backed microphone selection.
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    /// Exact device name to prefer; falls back to the default input.
    pub preferred_device: Option<String>,
}

impl CpalInput {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

impl InputBackend for CpalInput {
    fn open(
        &mut self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn InputStream>> {
        let capture =
            AudioCapture::open_with_preference(producer, running, self.preferred_device.as_deref())?;
        Ok(Box::new(capture))
    }
}

/// Handle to an active cpal capture stream.
///
/// **Not `Send`**: create and drop on the same OS thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
    pub sample_rate: u32,
}

impl AudioCapture {
    /// Open an input device by preferred name, otherwise the default input.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let device = device::select_device(device::DeviceKind::Input, preferred_device_name)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| TalkbackError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "input config selected");

        let config: StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_input::<f32>(&device, &config, producer, Arc::clone(&running)),
            SampleFormat::I16 => build_input::<i16>(&device, &config, producer, Arc::clone(&running)),
            SampleFormat::U16 => build_input::<u16>(&device, &config, producer, Arc::clone(&running)),
            SampleFormat::U8 => build_input::<u8>(&device, &config, producer, Arc::clone(&running)),
            fmt => {
                return Err(TalkbackError::AudioStream(format!(
                    "unsupported input sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| TalkbackError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(crate::error::TalkbackError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl InputStream for AudioCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "audio-cpal")]
fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ch = config.channels as usize;
    // Grows to the device's callback size once, then is reused.
    let mut mono: Vec<f32> = Vec::with_capacity(4096);

    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / ch;
                mono.resize(frames, 0.0);
                for (f, out) in mono.iter_mut().enumerate() {
                    let base = f * ch;
                    let sum: f32 = data[base..base + ch]
                        .iter()
                        .map(|s| s.to_sample::<f32>())
                        .sum();
                    *out = sum / ch as f32;
                }
                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    warn!("capture ring full: dropped {} samples", mono.len() - written);
                }
            },
            |err| error!("input stream error: {err}"),
            None,
        )
        .map_err(|e| TalkbackError::AudioStream(e.to_string()))
}
