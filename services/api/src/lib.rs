//! Avatar API Library Crate
//!
//! This library contains the web service of the voice avatar backend: the
//! application state, configuration, REST handlers, audio ingestion, the
//! websocket session logic, and routing. The binaries in `bin/` are thin
//! wrappers around this library.

pub mod audio;
pub mod audio_utils;
pub mod config;
pub mod handlers;
pub mod models;
pub mod reply;
pub mod router;
pub mod state;
pub mod ws;
