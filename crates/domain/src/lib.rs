//! Shared types for all VoiceGate crates: the error taxonomy, the
//! conversation message model, streaming event types, tool definitions,
//! and the configuration tree.

pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
