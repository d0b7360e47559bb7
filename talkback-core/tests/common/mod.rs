//! Injected device backends and polling helpers for engine tests.

#![allow(dead_code)]

use std::sync::{atomic::AtomicBool, Arc};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use talkback_core::audio::level::VolumeTap;
use talkback_core::audio::output::{OutputBackend, OutputDevice, VoiceId};
use talkback_core::audio::{InputBackend, InputStream};
use talkback_core::buffering::chunk::PlaybackUnit;
use talkback_core::buffering::{AudioProducer, Producer};
use talkback_core::engine::diagnostics::EngineDiagnostics;
use talkback_core::error::Result;
use talkback_core::TalkbackError;

// ── Microphone ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MicState {
    pub producer: Option<AudioProducer>,
    pub opens: usize,
    pub releases: usize,
}

/// Microphone whose samples the test pushes by hand.
#[derive(Clone, Default)]
pub struct Mic {
    pub state: Arc<Mutex<MicState>>,
    pub rate: u32,
}

impl Mic {
    pub fn at(rate: u32) -> Self {
        Self {
            state: Arc::default(),
            rate,
        }
    }

    pub fn speak(&self, samples: &[f32]) {
        let mut state = self.state.lock();
        let producer = state.producer.as_mut().expect("microphone is not open");
        assert_eq!(producer.push_slice(samples), samples.len());
    }

    pub fn releases(&self) -> usize {
        self.state.lock().releases
    }
}

struct MicStream {
    rate: u32,
    state: Arc<Mutex<MicState>>,
}

impl InputStream for MicStream {
    fn sample_rate(&self) -> u32 {
        self.rate
    }
}

impl Drop for MicStream {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.releases += 1;
        state.producer = None;
    }
}

impl InputBackend for Mic {
    fn open(
        &mut self,
        producer: AudioProducer,
        _running: Arc<AtomicBool>,
    ) -> Result<Box<dyn InputStream>> {
        let mut state = self.state.lock();
        state.opens += 1;
        state.producer = Some(producer);
        Ok(Box::new(MicStream {
            rate: self.rate,
            state: Arc::clone(&self.state),
        }))
    }
}

// ── Speaker ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placed {
    pub voice: VoiceId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Default)]
pub struct SpeakerLog {
    pub now: f64,
    pub placed: Vec<Placed>,
    pub stopped: Vec<VoiceId>,
    pub finished: Option<Sender<VoiceId>>,
}

/// Output device with a hand-driven clock. Units never finish on their own.
#[derive(Clone, Default)]
pub struct Speaker {
    pub log: Arc<Mutex<SpeakerLog>>,
    pub fail_open: bool,
}

impl Speaker {
    pub fn placed(&self) -> Vec<Placed> {
        self.log.lock().placed.clone()
    }

    pub fn stopped(&self) -> Vec<VoiceId> {
        self.log.lock().stopped.clone()
    }

    pub fn set_now(&self, now: f64) {
        self.log.lock().now = now;
    }

    /// Report `voice` as having played to the end.
    pub fn finish(&self, voice: VoiceId) {
        let log = self.log.lock();
        if let Some(tx) = &log.finished {
            tx.send(voice).expect("engine stopped listening");
        }
    }
}

pub const SPEAKER_RATE: u32 = 24_000;

struct SpeakerDevice {
    log: Arc<Mutex<SpeakerLog>>,
}

impl OutputDevice for SpeakerDevice {
    fn sample_rate(&self) -> u32 {
        SPEAKER_RATE
    }

    fn channels(&self) -> u16 {
        1
    }

    fn current_time(&self) -> f64 {
        self.log.lock().now
    }

    fn schedule(&mut self, voice: VoiceId, unit: PlaybackUnit, start_at: f64) -> Result<()> {
        self.log.lock().placed.push(Placed {
            voice,
            start: start_at,
            duration: unit.duration(),
        });
        Ok(())
    }

    fn flush(&mut self, active: &[VoiceId]) {
        self.log.lock().stopped.extend_from_slice(active);
    }
}

impl OutputBackend for Speaker {
    fn open(
        self: Box<Self>,
        finished: Sender<VoiceId>,
        _tap: VolumeTap,
        _diagnostics: Arc<EngineDiagnostics>,
    ) -> Result<Box<dyn OutputDevice>> {
        if self.fail_open {
            return Err(TalkbackError::NoDefaultOutputDevice);
        }
        self.log.lock().finished = Some(finished);
        Ok(Box::new(SpeakerDevice {
            log: Arc::clone(&self.log),
        }))
    }
}

// ── Polling ──────────────────────────────────────────────────────────────────

/// Poll `cond` every few milliseconds until it holds or `timeout` elapses.
pub fn wait_for(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() >= timeout {
            panic!("timed out waiting for {what}");
        }
        thread::sleep(Duration::from_millis(5));
    }
}

pub const TIMEOUT: Duration = Duration::from_secs(3);
