//! Capture pipeline: microphone → fixed frames → encoder → session.
//!
//! ## Per tick
//!
//! ```text
//! 1. Drain the SPSC ring (mono f32 at the device rate)
//! 2. Resample to the capture rate (passthrough when equal)
//! 3. Input volume tap: gain + level meter
//! 4. Slice into frame_len frames, encode, SessionManager::send
//! ```
//!
//! Frames the session refuses are counted and dropped; they never set the
//! error field.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{debug, info, warn};

use crate::{
    audio::{level::VolumeTap, resample::RateConverter, InputBackend, InputStream},
    buffering::{chunk::AudioFrame, create_audio_ring, AudioConsumer, Consumer},
    codec::FrameEncoder,
    engine::diagnostics::EngineDiagnostics,
    error::{ErrorKind, Result, TalkbackError},
    ipc::status::StatusBoard,
    session::SessionManager,
};

/// Samples popped from the ring per read.
/// 20 ms at 48 kHz = 960 samples.
const DRAIN_CHUNK: usize = 960;

const PERMISSION_DENIED: &str =
    "Microphone permission denied. Please allow access in your system settings.";

struct ActiveCapture {
    /// Dropping this releases the device.
    stream: Box<dyn InputStream>,
    consumer: AudioConsumer,
    running: Arc<AtomicBool>,
    converter: RateConverter,
    raw: Vec<f32>,
    pending: Vec<f32>,
}

pub struct CapturePipeline {
    backend: Box<dyn InputBackend>,
    encoder: FrameEncoder,
    sample_rate: u32,
    tap: VolumeTap,
    status: StatusBoard,
    diagnostics: Arc<EngineDiagnostics>,
    active: Option<ActiveCapture>,
}

impl CapturePipeline {
    pub fn new(
        backend: Box<dyn InputBackend>,
        frame_len: usize,
        sample_rate: u32,
        tap: VolumeTap,
        status: StatusBoard,
        diagnostics: Arc<EngineDiagnostics>,
    ) -> Self {
        Self {
            backend,
            encoder: FrameEncoder::new(frame_len, sample_rate),
            sample_rate,
            tap,
            status,
            diagnostics,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Acquire the microphone and begin producing frames.
    ///
    /// # Errors
    /// - `AlreadyRunning` if capture is active; the live capture is untouched.
    /// - A `Device`-kind error if the microphone cannot be opened. Nothing
    ///   acquired along the way is kept.
    pub fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Err(TalkbackError::AlreadyRunning);
        }

        self.status.set_status("Requesting microphone access...");
        self.status.clear_error();

        let (producer, consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));

        let opened = self
            .backend
            .open(producer, Arc::clone(&running))
            .and_then(|stream| {
                let converter =
                    RateConverter::new(stream.sample_rate(), self.sample_rate, DRAIN_CHUNK)?;
                Ok((stream, converter))
            });

        let (stream, converter) = match opened {
            Ok(parts) => parts,
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                self.status.set_recording(false);
                self.status.set_error(describe_start_error(&e));
                return Err(e);
            }
        };

        info!(
            device_rate = stream.sample_rate(),
            capture_rate = self.sample_rate,
            frame_len = self.encoder.frame_len(),
            "capture started"
        );

        self.active = Some(ActiveCapture {
            stream,
            consumer,
            running,
            converter,
            raw: vec![0.0; DRAIN_CHUNK],
            pending: Vec::with_capacity(self.encoder.frame_len() * 2),
        });
        self.status.set_recording(true);
        self.status.set_status("Recording... say something!");
        Ok(())
    }

    /// Release the microphone. Safe to call when not capturing.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        self.status.set_status("Stopping recording...");
        active.running.store(false, Ordering::SeqCst);
        let discarded = active.pending.len();
        drop(active.stream);
        self.tap.reset_level();

        info!(discarded, "capture stopped");
        self.status.set_recording(false);
        if !self.status.has_error() {
            self.status.set_status("Recording stopped. Ready to start again.");
        }
    }

    /// Move everything the device produced since the last call through to the
    /// session. Returns the number of frames handed to `send`.
    pub fn pump(&mut self, session: &mut SessionManager) -> usize {
        let Some(active) = self.active.as_mut() else {
            return 0;
        };

        loop {
            let n = active.consumer.pop_slice(&mut active.raw);
            if n == 0 {
                break;
            }
            self.diagnostics
                .samples_captured
                .fetch_add(n, Ordering::Relaxed);
            let mut converted = active.converter.process(&active.raw[..n]);
            self.tap.process(&mut converted);
            active.pending.extend_from_slice(&converted);
        }

        let frame_len = self.encoder.frame_len();
        let mut handed_off = 0;
        while active.pending.len() >= frame_len {
            let samples: Vec<f32> = active.pending.drain(..frame_len).collect();
            let chunk = match self.encoder.encode(AudioFrame::new(samples, self.sample_rate)) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("frame encode failed: {e}");
                    continue;
                }
            };
            EngineDiagnostics::bump(&self.diagnostics.frames_encoded);
            handed_off += 1;

            match session.send(&chunk) {
                Ok(()) => EngineDiagnostics::bump(&self.diagnostics.frames_sent),
                Err(e) => {
                    EngineDiagnostics::bump(&self.diagnostics.frames_dropped);
                    if e.kind() == ErrorKind::Send {
                        debug!("frame dropped: {e}");
                    } else {
                        warn!("frame dropped: {e}");
                    }
                }
            }
        }
        handed_off
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.running.store(false, Ordering::SeqCst);
        }
    }
}

fn describe_start_error(e: &TalkbackError) -> String {
    let text = e.to_string().to_ascii_lowercase();
    if ["permission", "denied", "not allowed"]
        .iter()
        .any(|needle| text.contains(needle))
    {
        PERMISSION_DENIED.to_string()
    } else {
        format!("Error starting recording: {e}")
    }
}
