//! `TalkbackEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! TalkbackEngine::new()
//!     └─► start(backends)      → output open, session connecting
//!         ├─► start_recording() → microphone open (session must be Ready)
//!         ├─► stop_recording()  → microphone released
//!         ├─► reset()           → recording stopped, playback flushed, reconnect
//!         └─► shutdown()        → everything released, loop joined
//! ```
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! Backends are therefore moved *into* the `spawn_blocking` closure and opened
//! there, so no stream ever crosses a thread boundary. A sync oneshot channel
//! propagates output-device errors back to the `start()` caller. After that,
//! the handle talks to the loop only through a command channel.

pub mod capture;
pub mod diagnostics;
pub(crate) mod event_loop;
pub mod router;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    audio::{
        level::VolumeTap,
        output::{CpalOutputBackend, OutputBackend, MAX_VOICES},
        CpalInput, InputBackend,
    },
    engine::{
        capture::CapturePipeline,
        diagnostics::{DiagnosticsSnapshot, EngineDiagnostics},
        event_loop::{Command, LoopContext},
        router::InboundRouter,
    },
    error::{Result, TalkbackError},
    ipc::{
        events::{StatusEvent, UiState},
        status::StatusBoard,
    },
    playback::PlaybackScheduler,
    session::{SessionConfig, SessionManager, SessionState, Transport},
};

/// Configuration for `TalkbackEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EngineConfig {
    /// Samples per outbound frame. Default: 4096 (256 ms at 16 kHz).
    pub frame_len: usize,
    /// Rate outbound frames are encoded at (Hz). Default: 16000.
    pub capture_sample_rate: u32,
    /// Capture-ring drain interval. Default: 10 ms.
    pub tick_ms: u64,
    /// Exact input device name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub input_gain: f32,
    pub output_gain: f32,
    pub session: SessionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_len: 4096,
            capture_sample_rate: 16_000,
            tick_ms: 10,
            preferred_input_device: None,
            preferred_output_device: None,
            input_gain: 1.0,
            output_gain: 1.0,
            session: SessionConfig::default(),
        }
    }
}

/// The device and service implementations an engine runs against.
pub struct EngineBackends {
    pub input: Box<dyn InputBackend>,
    pub output: Box<dyn OutputBackend>,
    pub transport: Box<dyn Transport>,
}

impl EngineBackends {
    /// cpal microphone and speakers, honouring the configured device names.
    pub fn cpal(config: &EngineConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            input: Box::new(CpalInput::new(config.preferred_input_device.clone())),
            output: Box::new(CpalOutputBackend::new(
                config.preferred_output_device.clone(),
            )),
            transport,
        }
    }
}

/// The top-level engine handle.
///
/// `TalkbackEngine` is `Send + Sync`; wrap in `Arc` to share between the host
/// and event-forwarding tasks.
pub struct TalkbackEngine {
    config: EngineConfig,
    status: StatusBoard,
    input_tap: VolumeTap,
    output_tap: VolumeTap,
    diagnostics: Arc<EngineDiagnostics>,
    /// `true` while the engine loop is alive.
    running: Arc<AtomicBool>,
    commands: Mutex<Option<Sender<Command>>>,
}

impl TalkbackEngine {
    /// Create an engine. Nothing is opened until `start()`.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            input_tap: VolumeTap::new(config.input_gain),
            output_tap: VolumeTap::new(config.output_gain),
            config,
            status: StatusBoard::new(),
            diagnostics: Arc::new(EngineDiagnostics::default()),
            running: Arc::new(AtomicBool::new(false)),
            commands: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open the output device, spawn the engine loop and begin connecting.
    ///
    /// Blocks until the output device is confirmed open (or fails). Must be
    /// called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `AlreadyRunning` if already started.
    /// - A `Device`-kind error if the output device cannot be opened.
    pub fn start(&self, backends: EngineBackends) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TalkbackError::AlreadyRunning);
        }
        self.diagnostics.reset();

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (transport_tx, transport_rx) = crossbeam_channel::unbounded();
        let (finished_tx, finished_rx) = crossbeam_channel::bounded(MAX_VOICES);

        let config = self.config.clone();
        let status = self.status.clone();
        let input_tap = self.input_tap.clone();
        let output_tap = self.output_tap.clone();
        let diagnostics = Arc::clone(&self.diagnostics);
        let running = Arc::clone(&self.running);

        // Sync oneshot: loop thread reports output-open success/failure to start().
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

        tokio::task::spawn_blocking(move || {
            let EngineBackends {
                input,
                output,
                transport,
            } = backends;

            // ── Open output (must happen on THIS thread; cpal::Stream is !Send) ──
            let device = match output.open(finished_tx, output_tap, Arc::clone(&diagnostics)) {
                Ok(device) => device,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let router = InboundRouter::new(PlaybackScheduler::new(device), Arc::clone(&diagnostics));
            let session =
                SessionManager::new(transport, config.session.clone(), transport_tx, status.clone());
            let capture = CapturePipeline::new(
                input,
                config.frame_len,
                config.capture_sample_rate,
                input_tap,
                status.clone(),
                diagnostics,
            );

            let _ = open_tx.send(Ok(()));

            event_loop::run(LoopContext {
                session,
                capture,
                router,
                commands: command_rx,
                transport_events: transport_rx,
                finished: finished_rx,
                status,
                running,
                tick_ms: config.tick_ms,
            });
        });

        match open_rx.recv() {
            Ok(Ok(())) => {
                *self.commands.lock() = Some(command_tx);
                info!("engine started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.status
                    .set_error(format!("Failed to open audio output: {e}"));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent; spawn_blocking panicked?
                self.running.store(false, Ordering::SeqCst);
                self.status.set_error("Engine failed to start.");
                Err(TalkbackError::Other(anyhow::anyhow!(
                    "engine loop died unexpectedly"
                )))
            }
        }
    }

    /// Open the microphone and stream frames to the session.
    ///
    /// # Errors
    /// - `NotRunning` before `start()`.
    /// - `AlreadyRunning` while recording.
    /// - `Send` if the session is not `Ready` (the error field says so).
    /// - A `Device`-kind error if the microphone cannot be opened.
    pub fn start_recording(&self) -> Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send_command(Command::StartRecording(tx))?;
        rx.recv().map_err(|_| TalkbackError::NotRunning)?
    }

    /// Release the microphone. A no-op when not recording.
    pub fn stop_recording(&self) -> Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send_command(Command::StopRecording(tx))?;
        rx.recv().map_err(|_| TalkbackError::NotRunning)
    }

    /// Stop recording, flush playback, close the session and reconnect.
    pub fn reset(&self) -> Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send_command(Command::Reset(tx))?;
        rx.recv().map_err(|_| TalkbackError::NotRunning)
    }

    /// Stop everything and wait for the engine loop to release its devices.
    pub fn shutdown(&self) -> Result<()> {
        let Some(commands) = self.commands.lock().take() else {
            return Err(TalkbackError::NotRunning);
        };
        let (tx, rx) = crossbeam_channel::bounded(1);
        if commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.recv();
        }
        self.running.store(false, Ordering::SeqCst);
        info!("engine shut down");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current UI state (snapshot).
    pub fn ui_state(&self) -> UiState {
        self.status.snapshot()
    }

    pub fn session_state(&self) -> SessionState {
        self.status.snapshot().session_state
    }

    /// Subscribe to UI state changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    /// Gain and level of the captured input.
    pub fn input_tap(&self) -> VolumeTap {
        self.input_tap.clone()
    }

    /// Gain and level of the mixed output.
    pub fn output_tap(&self) -> VolumeTap {
        self.output_tap.clone()
    }

    /// Snapshot of engine counters for observability.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn send_command(&self, command: Command) -> Result<()> {
        let guard = self.commands.lock();
        let commands = guard.as_ref().ok_or(TalkbackError::NotRunning)?;
        commands
            .send(command)
            .map_err(|_| TalkbackError::NotRunning)
    }
}

impl Drop for TalkbackEngine {
    fn drop(&mut self) {
        // Dropping the sender ends the loop, which releases every device.
        self.commands.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_the_wire_format() {
        let config = EngineConfig::default();
        assert_eq!(config.frame_len, 4096);
        assert_eq!(config.capture_sample_rate, 16_000);
        assert_eq!(config.session.voice_name, "Orus");
    }

    #[test]
    fn config_deserializes_partially_with_camel_case() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"frameLen": 2048, "session": {"voiceName": "Puck"}}"#).unwrap();
        assert_eq!(config.frame_len, 2048);
        assert_eq!(config.tick_ms, 10);
        assert_eq!(config.session.voice_name, "Puck");
        assert_eq!(config.session.model, SessionConfig::default().model);
    }

    #[test]
    fn commands_before_start_are_rejected() {
        let engine = TalkbackEngine::new(EngineConfig::default());
        assert!(matches!(
            engine.start_recording(),
            Err(TalkbackError::NotRunning)
        ));
        assert!(matches!(engine.shutdown(), Err(TalkbackError::NotRunning)));
        assert!(!engine.is_running());
    }
}
