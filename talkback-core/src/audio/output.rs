//! Audio output: a timeline-scheduled voice mixer.
//!
//! The playback scheduler talks to an [`OutputDevice`]: "play this unit
//! starting at device time `t`", "silence everything scheduled so far", "what
//! time is it". The cpal implementation answers with a [`Mixer`] rendered
//! inside the output callback:
//!
//! ```text
//! engine thread ── PlayCommand (bounded) ──► callback: Mixer::render
//!   MixerHandle   ── flush epoch (atomic) ──►      │
//!      ▲ ▲                                          │
//!      │ └────────── finished VoiceId ◄─────────────┤
//!      └──────────── spent Vec<f32>  ◄──────────────┘
//!                    clock: AtomicU64 frames rendered
//! ```
//!
//! Voices are placed by absolute frame index, so two units scheduled back to
//! back render with no gap and no overlap.
//!
//! A flush is a single epoch bump. It cannot be lost to a full queue, and the
//! callback drops every voice queued before it on its next block. Sample
//! buffers are returned to the engine thread to be freed there, and at most
//! [`MAX_VOICES`] are in flight, so the callback never allocates or frees.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::{
    audio::level::VolumeTap,
    buffering::chunk::PlaybackUnit,
    engine::diagnostics::EngineDiagnostics,
    error::{Result, TalkbackError},
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info};

/// Capacity of the engine → callback command queue.
pub const MIXER_QUEUE_CAP: usize = 256;

/// Voices queued or playing at once. Also sizes the finished-report channel.
pub const MAX_VOICES: usize = 1024;

/// Identifies one scheduled playback unit on the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

/// The output device as the playback scheduler sees it.
pub trait OutputDevice {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Device timeline position in seconds. Never goes backwards.
    fn current_time(&self) -> f64;

    /// Start `unit` at device time `start_at`. Natural completion is reported
    /// on the `finished` channel handed to the backend.
    fn schedule(&mut self, voice: VoiceId, unit: PlaybackUnit, start_at: f64) -> Result<()>;

    /// Silence every voice scheduled so far, in one step. `active` lists the
    /// voices the scheduler still tracks. Flushed voices are not reported as
    /// finished.
    fn flush(&mut self, active: &[VoiceId]);
}

/// Factory for the output device; opened on the engine thread.
pub trait OutputBackend: Send {
    fn open(
        self: Box<Self>,
        finished: Sender<VoiceId>,
        tap: VolumeTap,
        diagnostics: Arc<EngineDiagnostics>,
    ) -> Result<Box<dyn OutputDevice>>;
}

/// One voice handed from the engine thread to the render callback.
#[derive(Debug)]
pub struct PlayCommand {
    voice: VoiceId,
    start_frame: u64,
    epoch: u64,
    samples: Vec<f32>,
}

#[derive(Debug)]
struct Voice {
    id: VoiceId,
    start_frame: u64,
    epoch: u64,
    samples: Vec<f32>,
}

/// Build a connected engine-side handle and render-side mixer.
pub fn mixer(
    channels: u16,
    finished: Sender<VoiceId>,
    tap: VolumeTap,
    diagnostics: Arc<EngineDiagnostics>,
) -> (MixerHandle, Mixer) {
    let (commands, command_rx) = crossbeam_channel::bounded(MIXER_QUEUE_CAP);
    let (spent_tx, spent) = crossbeam_channel::bounded(MAX_VOICES * 2);
    let clock = Arc::new(AtomicU64::new(0));
    let flush_epoch = Arc::new(AtomicU64::new(0));
    let in_flight = Arc::new(AtomicUsize::new(0));

    let handle = MixerHandle {
        commands,
        spent,
        clock: Arc::clone(&clock),
        flush_epoch: Arc::clone(&flush_epoch),
        in_flight: Arc::clone(&in_flight),
    };
    let mixer = Mixer {
        channels: channels.max(1) as usize,
        voices: Vec::with_capacity(MAX_VOICES),
        commands: command_rx,
        finished,
        spent: spent_tx,
        clock,
        flush_epoch,
        in_flight,
        tap,
        diagnostics,
    };
    (handle, mixer)
}

/// Engine-side end of a [`Mixer`].
pub struct MixerHandle {
    commands: Sender<PlayCommand>,
    spent: Receiver<Vec<f32>>,
    clock: Arc<AtomicU64>,
    flush_epoch: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
}

impl MixerHandle {
    /// Frames rendered so far.
    pub fn frames_rendered(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Voices queued or playing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Queue `samples` (interleaved) to start at `start_frame`.
    ///
    /// # Errors
    /// `AudioStream` when the queue is full, the voice limit is reached, or
    /// the callback side is gone.
    pub fn play(&self, voice: VoiceId, start_frame: u64, samples: Vec<f32>) -> Result<()> {
        self.reclaim();
        if self.in_flight.load(Ordering::Acquire) >= MAX_VOICES {
            return Err(TalkbackError::AudioStream("output voice limit reached".into()));
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let command = PlayCommand {
            voice,
            start_frame,
            epoch: self.flush_epoch.load(Ordering::Relaxed),
            samples,
        };
        self.commands.try_send(command).map_err(|e| {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            match e {
                TrySendError::Full(_) => TalkbackError::AudioStream("output queue full".into()),
                TrySendError::Disconnected(_) => {
                    TalkbackError::AudioStream("output stream is gone".into())
                }
            }
        })
    }

    /// Drop every voice queued or playing before this call.
    pub fn flush(&self) {
        self.flush_epoch.fetch_add(1, Ordering::Release);
        self.reclaim();
    }

    /// Free buffers the callback has finished with. Returns how many.
    pub fn reclaim(&self) -> usize {
        self.spent.try_iter().count()
    }
}

/// Render-side state. Owned by the output callback.
pub struct Mixer {
    channels: usize,
    voices: Vec<Voice>,
    commands: Receiver<PlayCommand>,
    finished: Sender<VoiceId>,
    spent: Sender<Vec<f32>>,
    clock: Arc<AtomicU64>,
    flush_epoch: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
    tap: VolumeTap,
    diagnostics: Arc<EngineDiagnostics>,
}

impl Mixer {
    /// Fill one interleaved output block and advance the clock by its frames.
    pub fn render(&mut self, out: &mut [f32]) {
        let base = self.clock.load(Ordering::Acquire);

        // `voices` never outgrows its capacity: every queued voice counts
        // against MAX_VOICES until it is retired.
        while let Ok(cmd) = self.commands.try_recv() {
            self.voices.push(Voice {
                id: cmd.voice,
                // A start that is already behind the clock plays immediately.
                start_frame: cmd.start_frame.max(base),
                epoch: cmd.epoch,
                samples: cmd.samples,
            });
        }

        // Read after draining: a command sent after a flush carries the new
        // epoch, so the flush that preceded it is visible here.
        let epoch = self.flush_epoch.load(Ordering::Acquire);
        let (spent, in_flight) = (&self.spent, &*self.in_flight);
        self.voices.retain_mut(|v| {
            let live = v.epoch >= epoch;
            if !live {
                retire(spent, in_flight, std::mem::take(&mut v.samples));
            }
            live
        });

        out.fill(0.0);
        let ch = self.channels;
        let frames = (out.len() / ch) as u64;
        let end = base + frames;

        for voice in &self.voices {
            let voice_frames = (voice.samples.len() / ch) as u64;
            let voice_end = voice.start_frame + voice_frames;
            let from = voice.start_frame.max(base);
            let to = voice_end.min(end);
            if from >= to {
                continue;
            }
            let src = ((from - voice.start_frame) as usize) * ch;
            let dst = ((from - base) as usize) * ch;
            let len = ((to - from) as usize) * ch;
            for (o, s) in out[dst..dst + len]
                .iter_mut()
                .zip(&voice.samples[src..src + len])
            {
                *o += *s;
            }
        }

        self.tap.process(out);
        self.clock.store(end, Ordering::Release);

        let (finished, diagnostics) = (&self.finished, &self.diagnostics);
        self.voices.retain_mut(|v| {
            let done = v.start_frame + (v.samples.len() / ch) as u64 <= end;
            if done {
                if finished.try_send(v.id).is_err() {
                    EngineDiagnostics::bump(&diagnostics.reports_dropped);
                }
                retire(spent, in_flight, std::mem::take(&mut v.samples));
            }
            !done
        });
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }
}

fn retire(spent: &Sender<Vec<f32>>, in_flight: &AtomicUsize, samples: Vec<f32>) {
    // The spent channel holds twice the voice limit, so this only fails
    // once the engine side is gone.
    let _ = spent.try_send(samples);
    in_flight.fetch_sub(1, Ordering::AcqRel);
}

/// Engine-side handle to a running cpal output stream.
///
/// **Not `Send`**: create and drop on the same OS thread.
pub struct CpalOutput {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    mixer: MixerHandle,
    sample_rate: u32,
    channels: u16,
}

impl CpalOutput {
    /// Open an output device by preferred name, otherwise the default output.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        preferred_device_name: Option<&str>,
        finished: Sender<VoiceId>,
        tap: VolumeTap,
        diagnostics: Arc<EngineDiagnostics>,
    ) -> Result<Self> {
        use crate::audio::device::{select_device, DeviceKind};

        let device = select_device(DeviceKind::Output, preferred_device_name)?;
        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening output device"
        );

        let supported = device
            .default_output_config()
            .map_err(|e| TalkbackError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "output config selected");

        let (handle, render) = mixer(channels, finished, tap, diagnostics);

        let config: StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_output::<f32>(&device, &config, render),
            SampleFormat::I16 => build_output::<i16>(&device, &config, render),
            SampleFormat::U16 => build_output::<u16>(&device, &config, render),
            fmt => {
                return Err(TalkbackError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| TalkbackError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            mixer: handle,
            sample_rate,
            channels,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open_with_preference(
        _preferred_device_name: Option<&str>,
        _finished: Sender<VoiceId>,
        _tap: VolumeTap,
        _diagnostics: Arc<EngineDiagnostics>,
    ) -> Result<Self> {
        Err(TalkbackError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

impl OutputDevice for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn current_time(&self) -> f64 {
        self.mixer.frames_rendered() as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, voice: VoiceId, unit: PlaybackUnit, start_at: f64) -> Result<()> {
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        self.mixer.play(voice, start_frame, unit.into_samples())
    }

    fn flush(&mut self, active: &[VoiceId]) {
        tracing::debug!(active = active.len(), "flushing output voices");
        self.mixer.flush();
    }
}

/// cpal output selection, opened on the engine thread.
#[derive(Debug, Clone, Default)]
pub struct CpalOutputBackend {
    pub preferred_device: Option<String>,
}

impl CpalOutputBackend {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

impl OutputBackend for CpalOutputBackend {
    fn open(
        self: Box<Self>,
        finished: Sender<VoiceId>,
        tap: VolumeTap,
        diagnostics: Arc<EngineDiagnostics>,
    ) -> Result<Box<dyn OutputDevice>> {
        let output = CpalOutput::open_with_preference(
            self.preferred_device.as_deref(),
            finished,
            tap,
            diagnostics,
        )?;
        Ok(Box::new(output))
    }
}

#[cfg(feature = "audio-cpal")]
fn build_output<T>(device: &cpal::Device, config: &StreamConfig, mut mixer: Mixer) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::with_capacity(8192);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch);
                for (o, s) in data.iter_mut().zip(&scratch) {
                    *o = T::from_sample(s.clamp(-1.0, 1.0));
                }
            },
            |err| error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| TalkbackError::AudioStream(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rig {
        handle: MixerHandle,
        mixer: Mixer,
        finished: Receiver<VoiceId>,
        diagnostics: Arc<EngineDiagnostics>,
    }

    fn rig_with(channels: u16, finished_cap: usize) -> Rig {
        let (finished_tx, finished) = crossbeam_channel::bounded(finished_cap);
        let diagnostics = Arc::new(EngineDiagnostics::default());
        let (handle, mixer) = mixer(
            channels,
            finished_tx,
            VolumeTap::default(),
            Arc::clone(&diagnostics),
        );
        Rig {
            handle,
            mixer,
            finished,
            diagnostics,
        }
    }

    fn rig(channels: u16) -> Rig {
        rig_with(channels, 16)
    }

    fn play(rig: &Rig, id: u64, start_frame: u64, samples: Vec<f32>) {
        rig.handle.play(VoiceId(id), start_frame, samples).unwrap();
    }

    #[test]
    fn back_to_back_voices_are_gapless() {
        let mut rig = rig(1);
        play(&rig, 1, 2, vec![0.1; 3]);
        play(&rig, 2, 5, vec![0.2; 2]);

        let mut out = vec![9.0; 8];
        rig.mixer.render(&mut out);

        assert_eq!(out, vec![0.0, 0.0, 0.1, 0.1, 0.1, 0.2, 0.2, 0.0]);
        assert_eq!(rig.handle.frames_rendered(), 8);
        let done: Vec<_> = rig.finished.try_iter().collect();
        assert_eq!(done, vec![VoiceId(1), VoiceId(2)]);
        assert_eq!(rig.handle.in_flight(), 0);
        assert_eq!(rig.handle.reclaim(), 2);
    }

    #[test]
    fn voice_spans_blocks_and_finishes_once() {
        let mut rig = rig(2);
        play(&rig, 7, 0, vec![0.5; 12]); // 6 stereo frames

        let mut out = vec![0.0; 8]; // 4 frames
        rig.mixer.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.5));
        assert!(rig.finished.try_recv().is_err());

        rig.mixer.render(&mut out);
        assert_eq!(&out[..4], &[0.5; 4]);
        assert_eq!(&out[4..], &[0.0; 4]);
        assert_eq!(rig.finished.try_recv().unwrap(), VoiceId(7));
        assert_eq!(rig.mixer.active_voices(), 0);
    }

    #[test]
    fn flushed_voice_goes_silent_without_finishing() {
        let mut rig = rig(1);
        play(&rig, 3, 0, vec![0.3; 100]);
        let mut out = vec![0.0; 4];
        rig.mixer.render(&mut out);
        rig.handle.flush();
        rig.mixer.render(&mut out);
        assert_eq!(out, vec![0.0; 4]);
        assert!(rig.finished.try_recv().is_err());
        assert_eq!(rig.handle.in_flight(), 0);
    }

    #[test]
    fn flush_silences_more_voices_than_the_queue_holds() {
        let mut rig = rig_with(1, MAX_VOICES);
        let mut out = vec![0.0; 4];
        let voices = MIXER_QUEUE_CAP as u64 + 44;
        for i in 0..voices {
            play(&rig, i, i * 100, vec![0.1; 100]);
            rig.mixer.render(&mut out);
        }
        assert!(rig.mixer.active_voices() > MIXER_QUEUE_CAP);

        rig.handle.flush();
        let now = rig.handle.frames_rendered();
        play(&rig, 10_000, now, vec![0.5; 4]);
        rig.mixer.render(&mut out);

        // Only the post-flush voice is heard.
        assert_eq!(out, vec![0.5; 4]);
        assert_eq!(rig.mixer.active_voices(), 0);
        assert_eq!(rig.handle.in_flight(), 0);
    }

    #[test]
    fn voice_limit_is_enforced_before_the_callback() {
        let mut rig = rig_with(1, MAX_VOICES);
        let mut out = vec![0.0; 1];
        for i in 0..MAX_VOICES as u64 {
            play(&rig, i, 1_000_000, vec![0.1; 4]);
            if i % 128 == 127 {
                rig.mixer.render(&mut out);
            }
        }
        let err = rig
            .handle
            .play(VoiceId(u64::MAX), 1_000_000, vec![0.1; 4])
            .unwrap_err();
        assert!(matches!(err, TalkbackError::AudioStream(_)));

        rig.mixer.render(&mut out);
        assert_eq!(rig.mixer.active_voices(), MAX_VOICES);
    }

    #[test]
    fn lost_finish_reports_are_counted() {
        let mut rig = rig_with(1, 1);
        play(&rig, 1, 0, vec![0.1; 2]);
        play(&rig, 2, 2, vec![0.1; 2]);
        let mut out = vec![0.0; 4];
        rig.mixer.render(&mut out);

        assert_eq!(rig.finished.try_recv().unwrap(), VoiceId(1));
        assert_eq!(rig.diagnostics.snapshot().reports_dropped, 1);
        assert_eq!(rig.handle.in_flight(), 0);
    }

    #[test]
    fn late_start_plays_from_the_top() {
        let mut rig = rig(1);
        let mut out = vec![0.0; 4];
        rig.mixer.render(&mut out);
        play(&rig, 1, 1, vec![0.1, 0.2]);
        rig.mixer.render(&mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.0, 0.0]);
    }
}
