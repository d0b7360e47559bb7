//! `SessionManager`: lifecycle of the one live connection to the service.
//!
//! ## State machine
//!
//! ```text
//! Uninitialized ──initialize()──► Connecting ──Open──► Ready
//!                                     │                  │
//!                          connect err│/Error       Error│
//!                                     ▼                  ▼
//!                                  Degraded ◄────────────┘
//!                                     │
//!          Closed event / reset() ────┴──► Closing ──► Closed
//!                                                        │
//!                              reset() ◄─────────────────┘ (→ Connecting)
//! ```
//!
//! Transport callbacks arrive as [`TransportEnvelope`]s and are fed through
//! [`SessionManager::handle_event`], which updates the state and dispatches
//! audio/interruption/error/close to a [`SessionHandler`]. Envelopes from any
//! connection other than the live one are discarded, so a superseded connect
//! can never resurrect itself.

pub mod loopback;
pub mod transport;

pub use loopback::LoopbackTransport;
pub use transport::{
    Connection, ConnectionId, ServerMessage, Transport, TransportEnvelope, TransportEvent,
    TransportEvents,
};

use std::fmt;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    codec::WireChunk,
    error::{Result, TalkbackError},
    ipc::status::StatusBoard,
};

/// Lifecycle of the session with the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Uninitialized,
    Connecting,
    Ready,
    /// Open or half-open, but not usable for sending until `reset()`.
    Degraded,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Passed through to the transport untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SessionConfig {
    pub model: String,
    pub voice_name: String,
    pub language_code: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "native-audio-dialog".into(),
            voice_name: "Orus".into(),
            language_code: None,
        }
    }
}

/// Receives inbound session events, in transport delivery order.
pub trait SessionHandler {
    fn on_audio_chunk(&mut self, chunk: WireChunk);

    fn on_interrupted(&mut self);

    fn on_error(&mut self, _reason: &str) {}

    fn on_closed(&mut self, _reason: &str) {}

    /// Called by `reset()` after the old connection is closed and before the
    /// new one is attempted. Pending playback must be flushed here.
    fn on_reset(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub chunks_sent: u64,
    pub sends_rejected: u64,
    pub stale_events: u64,
    pub connects: u64,
}

struct LiveConnection {
    id: ConnectionId,
    conn: Box<dyn Connection>,
}

pub struct SessionManager {
    transport: Box<dyn Transport>,
    config: SessionConfig,
    state: SessionState,
    live: Option<LiveConnection>,
    next_id: u64,
    events_tx: Sender<TransportEnvelope>,
    last_error: Option<String>,
    status: StatusBoard,
    stats: SessionStats,
}

impl SessionManager {
    pub fn new(
        transport: Box<dyn Transport>,
        config: SessionConfig,
        events_tx: Sender<TransportEnvelope>,
        status: StatusBoard,
    ) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Uninitialized,
            live: None,
            next_id: 0,
            events_tx,
            last_error: None,
            status,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Id of the live connection, if any.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.live.as_ref().map(|l| l.id)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Open the first connection. Only acts from `Uninitialized`; any other
    /// state (notably a pending connect) makes this a no-op.
    pub fn initialize(&mut self) {
        match self.state {
            SessionState::Uninitialized => self.connect(),
            SessionState::Connecting => {
                debug!("initialize ignored: connect already pending");
            }
            state => {
                debug!(%state, "initialize ignored: use reset() to reconnect");
            }
        }
    }

    /// Send one chunk on the live connection.
    ///
    /// # Errors
    /// - `Send` when the session is not `Ready`. Expected during reconnects;
    ///   callers drop the chunk.
    /// - `Transport` when the connection rejects the chunk; the session is
    ///   then `Degraded`.
    pub fn send(&mut self, chunk: &WireChunk) -> Result<()> {
        let live = match (self.state, self.live.as_mut()) {
            (SessionState::Ready, Some(live)) => live,
            (state, _) => {
                self.stats.sends_rejected += 1;
                debug!(%state, bytes = chunk.len(), "dropping outbound chunk");
                return Err(TalkbackError::Send { state });
            }
        };

        match live.conn.send(chunk) {
            Ok(()) => {
                self.stats.chunks_sent += 1;
                Ok(())
            }
            Err(e) => {
                let msg = format!("Error sending audio: {e}");
                self.degrade(msg);
                Err(TalkbackError::Transport(e.to_string()))
            }
        }
    }

    /// Tear down whatever is live and connect again. Safe in every state,
    /// including while a connect is still pending.
    pub fn reset<H: SessionHandler + ?Sized>(&mut self, handler: &mut H) {
        info!(state = %self.state, "session reset requested");
        self.status.set_status("Resetting session...");
        self.status.clear_error();
        self.last_error = None;

        self.close_live();
        handler.on_reset();
        self.connect();
    }

    /// Close without reconnecting (engine shutdown).
    pub fn close(&mut self) {
        if self.state == SessionState::Closed && self.live.is_none() {
            return;
        }
        self.close_live();
        self.status.set_status("Session closed: shutdown");
    }

    /// Single entry point for everything the transport reports.
    pub fn handle_event<H: SessionHandler + ?Sized>(
        &mut self,
        envelope: TransportEnvelope,
        handler: &mut H,
    ) {
        if self.connection() != Some(envelope.connection) {
            self.stats.stale_events += 1;
            debug!(
                connection = ?envelope.connection,
                live = ?self.connection(),
                "discarding event from superseded connection"
            );
            return;
        }

        match envelope.event {
            TransportEvent::Open => {
                if self.state == SessionState::Connecting {
                    self.transition(SessionState::Ready);
                    self.last_error = None;
                    self.status.clear_error();
                    self.status.set_status("Session opened. Ready to record.");
                } else {
                    warn!(state = %self.state, "ignoring open event outside of connect");
                }
            }
            TransportEvent::Message(message) => {
                if let Some(chunk) = message.audio {
                    handler.on_audio_chunk(chunk);
                }
                if message.interrupted {
                    handler.on_interrupted();
                }
            }
            TransportEvent::Error(reason) => {
                let msg = if self.state == SessionState::Connecting {
                    format!("Failed to initialize session: {reason}")
                } else {
                    format!("Session error: {reason}")
                };
                self.degrade(msg);
                handler.on_error(&reason);
            }
            TransportEvent::Closed(reason) => {
                let reason = if reason.trim().is_empty() {
                    "unknown reason".to_string()
                } else {
                    reason
                };
                // Closed by the peer: nothing left to close on our side.
                self.live = None;
                if matches!(self.state, SessionState::Ready | SessionState::Degraded) {
                    self.transition(SessionState::Closing);
                }
                self.transition(SessionState::Closed);
                self.status.set_status(format!("Session closed: {reason}"));
                handler.on_closed(&reason);
            }
        }
    }

    fn connect(&mut self) {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.stats.connects += 1;

        self.transition(SessionState::Connecting);
        self.status.set_status("Initializing session...");

        let events = TransportEvents::new(id, self.events_tx.clone());
        match self.transport.connect(&self.config, events) {
            Ok(conn) => {
                info!(connection = ?id, model = %self.config.model, "connect started");
                self.live = Some(LiveConnection { id, conn });
            }
            Err(e) => {
                self.degrade(format!("Failed to initialize session: {e}"));
            }
        }
    }

    fn close_live(&mut self) {
        if let Some(mut live) = self.live.take() {
            self.transition(SessionState::Closing);
            live.conn.close();
            info!(connection = ?live.id, "connection closed");
        }
        self.transition(SessionState::Closed);
    }

    fn degrade(&mut self, msg: String) {
        if matches!(self.state, SessionState::Connecting | SessionState::Ready) {
            self.transition(SessionState::Degraded);
        }
        self.last_error = Some(msg.clone());
        self.status.set_error(msg);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        info!(from = %self.state, to = %next, "session state");
        self.state = next;
        self.status.set_session_state(next);
    }
}
