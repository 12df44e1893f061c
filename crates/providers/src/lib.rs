//! Upstream adapters and the plugin registry.
//!
//! Four plugin categories — STT, LLM, VAD, and turn detector — each with a
//! small capability trait ([`traits`]) and one built-in implementation:
//! Deepgram streaming STT, an OpenAI-compatible streaming chat model,
//! Silero VAD over ONNX Runtime, and the multilingual end-of-utterance
//! classifier. The [`resolver`] turns `provider[/model][:language]` spec
//! strings into handler instances via the [`registry`].

pub mod deepgram;
pub mod openai_compat;
pub mod registry;
pub mod resolver;
pub mod turn_detector;
pub mod vad;

mod sse;
mod util;

pub mod traits;

pub use registry::PluginRegistry;
pub use traits::{ChatRequest, LlmModel, SttHandler, TurnDetector, Vad};
pub use vad::{VadEvent, VadFrameResult};
