//! # talkback-core
//!
//! Real-time duplex audio engine for conversational voice sessions.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer ─┐
//!                                              │   engine loop (spawn_blocking)
//!                      CapturePipeline ◄───────┘
//!                            │  FrameEncoder
//!                            ▼
//!                      SessionManager ──send──► Transport ──► remote service
//!                            ▲                                     │
//!                            └──── TransportEnvelope ◄─────────────┘
//!                            │
//!                      InboundRouter ── interrupted ──► InterruptionHandler
//!                            │  FrameDecoder                  │ flush
//!                            ▼                                ▼
//!                      PlaybackScheduler ──► OutputDevice (Mixer in cpal callback)
//! ```
//!
//! The audio callbacks are zero-alloc and lock-free. All heap work happens on
//! the engine thread. UI state is published on a broadcast channel.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod session;

// Convenience re-exports for downstream crates
pub use audio::device::{list_devices, DeviceInfo, DeviceKind};
pub use audio::level::VolumeTap;
pub use codec::{FrameDecoder, FrameEncoder, MimeDescriptor, WireChunk};
pub use engine::{
    diagnostics::DiagnosticsSnapshot, EngineBackends, EngineConfig, TalkbackEngine,
};
pub use error::{ErrorKind, TalkbackError};
pub use ipc::events::{StatusEvent, UiState};
pub use session::{
    LoopbackTransport, SessionConfig, SessionHandler, SessionManager, SessionState, Transport,
};
