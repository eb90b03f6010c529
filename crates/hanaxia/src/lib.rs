//! Hanaxia assistant console core.
//!
//! The console's features (chat, document analysis, agent goals, presence)
//! share one persistent WebSocket connection to a sync endpoint. The
//! [`sync`] module owns that connection and multiplexes it into typed event
//! channels; [`features`] holds the per-feature state that consumes those
//! channels; [`genai`] and [`storage`] are the collaborators the features
//! lean on for model calls and local persistence.

pub mod config;
pub mod features;
pub mod genai;
pub mod relay;
pub mod storage;
pub mod sync;

pub use hanaxia_protocol as protocol;
