//! `StatusBoard`: the single writer-facing handle for UI state.
//!
//! Components hold clones and call the setters; every change is stored in a
//! `parking_lot::Mutex` snapshot and broadcast as a [`StatusEvent`].

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::{
    ipc::events::{StatusEvent, UiState},
    session::SessionState,
};

/// Broadcast channel capacity: slow UI consumers may lag this many events.
const BROADCAST_CAP: usize = 256;

#[derive(Clone)]
pub struct StatusBoard {
    state: Arc<Mutex<UiState>>,
    tx: broadcast::Sender<StatusEvent>,
    seq: Arc<AtomicU64>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            state: Arc::new(Mutex::new(UiState::default())),
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn snapshot(&self) -> UiState {
        self.state.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Progress text. Leaves any error in place.
    pub fn set_status(&self, msg: impl Into<String>) {
        let msg = msg.into();
        debug!(status = %msg, "status");
        self.update(|s| s.status = msg);
    }

    /// Error text. Clears the progress text so the error is what shows.
    pub fn set_error(&self, msg: impl Into<String>) {
        let msg = msg.into();
        error!("{msg}");
        self.update(|s| {
            s.error = msg;
            s.status.clear();
        });
    }

    pub fn clear_error(&self) {
        self.update(|s| s.error.clear());
    }

    pub fn has_error(&self) -> bool {
        !self.state.lock().error.is_empty()
    }

    pub fn set_recording(&self, is_recording: bool) {
        self.update(|s| s.is_recording = is_recording);
    }

    pub fn set_session_state(&self, session_state: SessionState) {
        self.update(|s| s.session_state = session_state);
    }

    fn update(&self, f: impl FnOnce(&mut UiState)) {
        let snapshot = {
            let mut guard = self.state.lock();
            let before = guard.clone();
            f(&mut *guard);
            if *guard == before {
                return;
            }
            guard.clone()
        };
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(StatusEvent {
            seq,
            state: snapshot,
        });
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatusBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBoard")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_clears_status_but_status_keeps_error() {
        let board = StatusBoard::new();
        board.set_status("Initializing session...");
        board.set_error("Session error: boom");
        let s = board.snapshot();
        assert_eq!(s.status, "");
        assert_eq!(s.error, "Session error: boom");

        board.set_status("Session closed: unknown reason");
        let s = board.snapshot();
        assert_eq!(s.status, "Session closed: unknown reason");
        assert!(board.has_error());
    }

    #[test]
    fn every_change_is_broadcast_in_order() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();
        board.set_recording(true);
        board.set_session_state(SessionState::Connecting);

        let first = rx.try_recv().expect("first event");
        let second = rx.try_recv().expect("second event");
        assert!(first.seq < second.seq);
        assert!(first.state.is_recording);
        assert_eq!(second.state.session_state, SessionState::Connecting);
    }

    #[test]
    fn unchanged_writes_are_not_broadcast() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();
        board.set_recording(false);
        board.clear_error();
        assert!(rx.try_recv().is_err());
    }
}
