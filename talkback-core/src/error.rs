use thiserror::Error;

use crate::session::SessionState;

/// All errors produced by talkback-core.
#[derive(Debug, Error)]
pub enum TalkbackError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("send rejected: session is {state}")]
    Send { state: SessionState },

    #[error("frame length mismatch: expected {expected} samples, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    #[error("capture is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse error classes used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Capture or output device unavailable/denied. Shown to the user.
    Device,
    /// Remote session failed to open, errored, or closed. Shown to the user.
    Transport,
    /// Malformed inbound chunk. Logged only.
    Decode,
    /// Outbound send while the session is not ready. Logged only.
    Send,
    /// Control-flow and miscellaneous failures.
    Other,
}

impl TalkbackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AudioDevice(_)
            | Self::AudioStream(_)
            | Self::NoDefaultInputDevice
            | Self::NoDefaultOutputDevice => ErrorKind::Device,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Send { .. } => ErrorKind::Send,
            Self::FrameLength { .. }
            | Self::AlreadyRunning
            | Self::NotRunning
            | Self::Io(_)
            | Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether this failure should reach the user-facing `error` field.
    pub fn is_user_facing(&self) -> bool {
        matches!(self.kind(), ErrorKind::Device | ErrorKind::Transport)
    }
}

pub type Result<T> = std::result::Result<T, TalkbackError>;
