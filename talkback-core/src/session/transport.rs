//! The remote service as an opaque bidirectional channel.
//!
//! A [`Transport`] opens [`Connection`]s. Everything the remote side does
//! (open, message, error, close) comes back as a [`TransportEvent`] on the
//! sink handed to `connect`, tagged with the id of the connection that
//! produced it. The session manager consumes those envelopes one at a time on
//! the engine thread.

use crossbeam_channel::Sender;
use tracing::warn;

use crate::{codec::WireChunk, error::Result, session::SessionConfig};

/// Identifies one connect attempt. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// One inbound payload from the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMessage {
    pub audio: Option<WireChunk>,
    /// The service detected the user talking over the current response.
    pub interrupted: bool,
}

impl ServerMessage {
    pub fn audio(chunk: WireChunk) -> Self {
        Self {
            audio: Some(chunk),
            interrupted: false,
        }
    }

    pub fn interrupted() -> Self {
        Self {
            audio: None,
            interrupted: true,
        }
    }
}

/// The four callback shapes a transport can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(ServerMessage),
    Error(String),
    Closed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEnvelope {
    pub connection: ConnectionId,
    pub event: TransportEvent,
}

/// Sink a connection uses to report events. Cheap to clone, `Send`.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    connection: ConnectionId,
    tx: Sender<TransportEnvelope>,
}

impl TransportEvents {
    pub fn new(connection: ConnectionId, tx: Sender<TransportEnvelope>) -> Self {
        Self { connection, tx }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn open(&self) {
        self.emit(TransportEvent::Open);
    }

    pub fn message(&self, message: ServerMessage) {
        self.emit(TransportEvent::Message(message));
    }

    pub fn error(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Error(reason.into()));
    }

    pub fn closed(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Closed(reason.into()));
    }

    fn emit(&self, event: TransportEvent) {
        let envelope = TransportEnvelope {
            connection: self.connection,
            event,
        };
        if self.tx.send(envelope).is_err() {
            warn!(connection = ?self.connection, "transport event dropped: engine is gone");
        }
    }
}

/// Opens connections to the remote service.
pub trait Transport: Send {
    /// Start connecting. May return before the connection is usable; readiness
    /// is signalled by an `Open` event on `events`.
    ///
    /// # Errors
    /// A `Transport` error when the attempt fails synchronously.
    fn connect(&mut self, config: &SessionConfig, events: TransportEvents)
        -> Result<Box<dyn Connection>>;
}

/// One live connection. Owned by the session manager.
pub trait Connection {
    fn send(&mut self, chunk: &WireChunk) -> Result<()>;

    /// Close the connection. Must be safe to call more than once.
    fn close(&mut self);
}
