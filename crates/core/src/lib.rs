//! Avatar Core Library
//!
//! Capability clients for the voice avatar backend and the pieces of the
//! response pipeline that have no knowledge of the transport: prompt
//! assembly, retrieval, and the offline motion generator.
//!
//! Every capability client pairs a primary provider call with a deterministic
//! offline substitute. Callers never see provider errors from these clients;
//! they diff the client's [`fallback::FallbackCounter`] around a call to learn
//! whether the result was degraded.

pub mod config;
pub mod embedding;
pub mod error;
pub mod fallback;
pub mod generic_types;
pub mod llm_client;
pub mod motion;
pub mod prompt;
pub mod registry;
pub mod retrieval;
pub mod speech;
pub mod transcription;
