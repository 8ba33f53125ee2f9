//! WebSocket Session Management
//!
//! This module contains the real-time avatar session served over WebSockets.
//! It is structured into submodules:
//!
//! - `protocol`: the JSON message format for client-server communication.
//! - `outbound`: transport-neutral frames and the per-session send handle.
//! - `session`: the connection lifecycle, from upgrade to close.
//! - `controller`: the per-session state machine that collects utterances.
//! - `cycle`: one turn, from final decode through transcription.
//! - `pipeline`: retrieval, generation, motion and speech for a transcript.

pub mod controller;
mod cycle;
pub mod outbound;
mod pipeline;
pub mod protocol;
pub mod session;

pub use cycle::TurnError;
pub use session::ws_handler;
