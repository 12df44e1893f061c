//! VoiceGate gateway: the realtime voice-and-text agent server.
//!
//! Clients hold a WebSocket open at `/ws`, optionally stream microphone
//! audio, and receive incremental transcripts, streamed model output, and
//! tool-call notifications. A second channel at `/ws/dashboard` mirrors
//! the event bus for observability; a small HTTP surface serves session
//! and metrics read-models.

pub mod api;
pub mod events;
pub mod metrics;
pub mod protocol;
pub mod runtime;
pub mod state;
pub mod ws;
