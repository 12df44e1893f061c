use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM and STT streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted during LLM streaming (provider-agnostic).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A text token chunk.
    #[serde(rename = "token")]
    Token { text: String },

    /// A tool call has started.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool call argument data.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with full argument JSON.
    #[serde(rename = "tool_call_finished")]
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: String,
    },

    /// Stream is finished.
    #[serde(rename = "done")]
    Done { finish_reason: Option<String> },

    /// An error occurred during streaming.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Audio encodings accepted on the client channel and forwarded to the
/// STT provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioEncoding {
    #[serde(rename = "PCM16")]
    Pcm16,
    #[serde(rename = "PCM8")]
    Pcm8,
}

impl AudioEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEncoding::Pcm16 => "PCM16",
            AudioEncoding::Pcm8 => "PCM8",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PCM16" => Some(AudioEncoding::Pcm16),
            "PCM8" => Some(AudioEncoding::Pcm8),
            _ => None,
        }
    }
}

/// One speech-to-text hypothesis yielded by the STT stream.
///
/// `is_final = false` marks an interim hypothesis that later results may
/// revise; `is_final = true` commits the segment, optionally with a
/// confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Transcript {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence: None,
        }
    }

    pub fn finalized(text: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence,
        }
    }
}
