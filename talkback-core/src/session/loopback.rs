//! In-process transport that plays the remote side.
//!
//! Every connect opens immediately and every outbound chunk comes straight back
//! as inbound audio. Optionally flags every Nth echo as an interruption so the
//! barge-in path can be exercised without a real service.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tracing::debug;

use crate::{
    codec::WireChunk,
    error::{Result, TalkbackError},
    session::{
        transport::{Connection, ServerMessage, Transport, TransportEvents},
        SessionConfig,
    },
};

#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    interrupt_every: Option<u64>,
    /// Connects never resolve; models a service that hangs during handshake.
    hang_on_connect: bool,
    echoed: Arc<AtomicU64>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every `n`th echoed chunk as interrupted. `0` disables.
    pub fn with_interrupt_every(mut self, n: u64) -> Self {
        self.interrupt_every = (n > 0).then_some(n);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang_on_connect = true;
        self
    }

    /// Chunks echoed across all connections.
    pub fn echoed(&self) -> u64 {
        self.echoed.load(Ordering::Relaxed)
    }
}

impl Transport for LoopbackTransport {
    fn connect(
        &mut self,
        config: &SessionConfig,
        events: TransportEvents,
    ) -> Result<Box<dyn Connection>> {
        debug!(
            connection = ?events.connection(),
            model = %config.model,
            voice = %config.voice_name,
            "loopback connect"
        );
        if !self.hang_on_connect {
            events.open();
        }
        Ok(Box::new(LoopbackConnection {
            events,
            interrupt_every: self.interrupt_every,
            sent: 0,
            echoed: Arc::clone(&self.echoed),
            closed: false,
        }))
    }
}

struct LoopbackConnection {
    events: TransportEvents,
    interrupt_every: Option<u64>,
    sent: u64,
    echoed: Arc<AtomicU64>,
    closed: bool,
}

impl Connection for LoopbackConnection {
    fn send(&mut self, chunk: &WireChunk) -> Result<()> {
        if self.closed {
            return Err(TalkbackError::Transport("loopback connection is closed".into()));
        }
        self.sent += 1;
        let interrupted = self
            .interrupt_every
            .map(|n| self.sent % n == 0)
            .unwrap_or(false);
        self.events.message(ServerMessage {
            audio: Some(chunk.clone()),
            interrupted,
        });
        self.echoed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.events.closed("closed by client");
    }
}
