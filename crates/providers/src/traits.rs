//! Capability contracts for the four plugin categories.

use vg_domain::error::Result;
use vg_domain::message::{ChatTurn, Message};
use vg_domain::stream::{AudioEncoding, BoxStream, StreamEvent, Transcript};
use vg_domain::tool::ToolDefinition;

use crate::vad::VadFrameResult;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic streaming chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Model identifier override. `None` uses the handler's default.
    pub model: Option<String>,
}

/// Trait every LLM adapter implements. Adapters translate between the
/// internal message model and the wire format of the provider's API.
#[async_trait::async_trait]
pub trait LlmModel: Send + Sync {
    /// Send a chat request and return a stream of events.
    async fn invoke_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// The default model identifier for this handler instance.
    fn model_id(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Streaming speech-to-text. The handler keeps a single upstream session
/// alive for the lifetime of the returned stream; the caller drains it to
/// completion or drops it to cancel.
#[async_trait::async_trait]
pub trait SttHandler: std::fmt::Debug + Send + Sync {
    async fn stream_transcribe(
        &self,
        audio: BoxStream<'static, Vec<u8>>,
        sample_rate: u32,
        encoding: AudioEncoding,
        language: Option<String>,
    ) -> Result<BoxStream<'static, Result<Transcript>>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// VAD
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Frame-synchronous voice activity detection. One instance per audio
/// stream; the recurrent model state lives inside the handler.
pub trait Vad: std::fmt::Debug + Send {
    /// Samples per inference window (256 @ 8 kHz, 512 @ 16 kHz).
    fn window_size_samples(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Process exactly one window of PCM16 samples.
    fn process_frame(&mut self, frame: &[i16]) -> Result<VadFrameResult>;

    /// Legacy path: process an arbitrary-size PCM16 byte chunk by taking
    /// its last complete window (zero-padding short chunks).
    fn process_chunk(&mut self, chunk: &[u8]) -> Result<VadFrameResult>;

    /// Zero the recurrent state and speaking flag.
    fn reset(&mut self);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn detector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// End-of-utterance classifier over a short conversation history.
///
/// `predict_end_of_turn` never fails: inference errors are logged and
/// reported as 0.0.
pub trait TurnDetector: std::fmt::Debug + Send + Sync {
    fn predict_end_of_turn(&self, history: &[ChatTurn]) -> f32;
    fn threshold(&self) -> f32;
}
