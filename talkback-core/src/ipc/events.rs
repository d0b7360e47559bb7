//! Event types published to the UI layer.

use serde::{Deserialize, Serialize};

use crate::session::SessionState;

/// The three fields the UI renders, plus the session state they derive from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub is_recording: bool,
    /// Human-readable progress text.
    pub status: String,
    /// Human-readable error text, empty when healthy.
    pub error: String,
    pub session_state: SessionState,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            is_recording: false,
            status: String::new(),
            error: String::new(),
            session_state: SessionState::Uninitialized,
        }
    }
}

/// Emitted whenever any field of [`UiState`] changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    #[serde(flatten)]
    pub state: UiState,
}
