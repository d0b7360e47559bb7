//! Types and handles shared with the UI layer.
//!
//! All event types derive `serde::Serialize` + `serde::Deserialize` so a host
//! can forward them over whatever bus it uses.

pub mod events;
pub mod status;
