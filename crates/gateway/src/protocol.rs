//! Wire protocol codec for the client channel.
//!
//! Every frame is a JSON object tagged by `type`, carrying a `session_id`
//! and a `data` object. Parsing is all-or-nothing: a frame either yields
//! a fully validated [`ClientMessage`] or a validation error naming the
//! offending field; nothing is partially emitted.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vg_domain::error::{Error, Result};
use vg_domain::stream::AudioEncoding;

pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [8000, 16000, 44100, 48000];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A validated client frame. Audio payloads are already base64-decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Text {
        session_id: String,
        text: String,
        metadata: Option<Value>,
    },
    AudioStart {
        session_id: String,
        sample_rate: u32,
        encoding: AudioEncoding,
        metadata: Option<Value>,
    },
    AudioChunk {
        session_id: String,
        chunk: Vec<u8>,
        timestamp: Option<f64>,
    },
    AudioEnd {
        session_id: String,
        final_chunk: Option<Vec<u8>>,
    },
}

impl ClientMessage {
    pub fn session_id(&self) -> &str {
        match self {
            ClientMessage::Text { session_id, .. }
            | ClientMessage::AudioStart { session_id, .. }
            | ClientMessage::AudioChunk { session_id, .. }
            | ClientMessage::AudioEnd { session_id, .. } => session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Text { .. } => "client_text",
            ClientMessage::AudioStart { .. } => "client_audio_start",
            ClientMessage::AudioChunk { .. } => "client_audio_chunk",
            ClientMessage::AudioEnd { .. } => "client_audio_end",
        }
    }
}

/// Size limits applied during parsing; sourced from the server config.
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    pub max_text_bytes: usize,
    pub max_audio_chunk_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_text_bytes: 4096,
            max_audio_chunk_bytes: 16384,
        }
    }
}

/// Parse and validate a raw client frame.
pub fn parse_client_message(raw: &str, limits: FrameLimits) -> Result<ClientMessage> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::validation("message", format!("invalid JSON: {e}")))?;

    let msg_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation("type", "type field is required"))?;

    let session_id = value
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::validation("session_id", "session_id cannot be empty"))?
        .to_string();

    let empty = Value::Object(Default::default());
    let data = value.get("data").unwrap_or(&empty);

    match msg_type {
        "client_text" => {
            let text = data
                .get("text")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    Error::validation("text", "text field is required and must be a string")
                })?;
            if text.len() > limits.max_text_bytes {
                return Err(Error::validation(
                    "text",
                    format!("text exceeds maximum size of {} bytes", limits.max_text_bytes),
                ));
            }
            Ok(ClientMessage::Text {
                session_id,
                text: text.to_string(),
                metadata: data.get("metadata").cloned(),
            })
        }
        "client_audio_start" => {
            let sample_rate = data
                .get("sample_rate")
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    Error::validation("sample_rate", "sample_rate is required and must be an integer")
                })? as u32;
            if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
                return Err(Error::validation(
                    "sample_rate",
                    format!("sample_rate must be one of: {SUPPORTED_SAMPLE_RATES:?}"),
                ));
            }
            let encoding_str = data
                .get("encoding")
                .and_then(Value::as_str)
                .unwrap_or("PCM16");
            let encoding = AudioEncoding::parse(encoding_str)
                .ok_or_else(|| Error::validation("encoding", "encoding must be PCM16 or PCM8"))?;
            Ok(ClientMessage::AudioStart {
                session_id,
                sample_rate,
                encoding,
                metadata: data.get("metadata").cloned(),
            })
        }
        "client_audio_chunk" => {
            let chunk_b64 = data
                .get("chunk")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    Error::validation("chunk", "chunk field is required and must be a string")
                })?;
            let chunk = decode_chunk(chunk_b64, limits.max_audio_chunk_bytes, "chunk")?;
            Ok(ClientMessage::AudioChunk {
                session_id,
                chunk,
                timestamp: data.get("timestamp").and_then(Value::as_f64),
            })
        }
        "client_audio_end" => {
            let final_chunk = match data.get("final_chunk").and_then(Value::as_str) {
                Some(b64) if !b64.is_empty() => {
                    Some(decode_chunk(b64, limits.max_audio_chunk_bytes, "final_chunk")?)
                }
                _ => None,
            };
            Ok(ClientMessage::AudioEnd {
                session_id,
                final_chunk,
            })
        }
        other => Err(Error::validation(
            "type",
            format!("unknown message type: {other}"),
        )),
    }
}

fn decode_chunk(b64: &str, max_bytes: usize, field: &str) -> Result<Vec<u8>> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| Error::validation(field, format!("invalid base64 chunk: {e}")))?;
    if decoded.len() > max_bytes {
        return Err(Error::validation(
            field,
            format!("audio chunk exceeds maximum size of {max_bytes} bytes"),
        ));
    }
    Ok(decoded)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "server_connected")]
    Connected { session_id: String, data: ConnectedData },

    #[serde(rename = "server_stt")]
    Stt { session_id: String, data: SttData },

    #[serde(rename = "server_partial")]
    Partial { session_id: String, data: PartialData },

    #[serde(rename = "server_text")]
    Text { session_id: String, data: TextData },

    #[serde(rename = "server_tool_call")]
    ToolCall { session_id: String, data: ToolCallData },

    #[serde(rename = "server_tool_result")]
    ToolResult { session_id: String, data: ToolResultData },

    #[serde(rename = "server_error")]
    Error { session_id: String, data: ErrorData },

    /// Keepalive fallback when a protocol-level ping is unavailable.
    #[serde(rename = "heartbeat")]
    Heartbeat { session_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedData {
    pub message: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SttData {
    pub text: String,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialData {
    pub text: String,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallData {
    pub tool_name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultData {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub error_code: String,
    pub message: String,
    pub retriable: bool,
}

impl ServerMessage {
    pub fn connected(session_id: &str, metadata: Value) -> Self {
        ServerMessage::Connected {
            session_id: session_id.to_string(),
            data: ConnectedData {
                message: "Connected successfully".into(),
                metadata,
            },
        }
    }

    pub fn stt(session_id: &str, text: &str, is_final: bool, confidence: Option<f32>) -> Self {
        ServerMessage::Stt {
            session_id: session_id.to_string(),
            data: SttData {
                text: text.to_string(),
                is_final,
                confidence,
            },
        }
    }

    pub fn partial(session_id: &str, text: &str) -> Self {
        ServerMessage::Partial {
            session_id: session_id.to_string(),
            data: PartialData {
                text: text.to_string(),
                is_final: false,
            },
        }
    }

    pub fn text(session_id: &str, text: &str, metadata: Option<Value>) -> Self {
        ServerMessage::Text {
            session_id: session_id.to_string(),
            data: TextData {
                text: text.to_string(),
                metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
            },
        }
    }

    pub fn tool_call(
        session_id: &str,
        tool_name: &str,
        arguments: Value,
        tool_call_id: Option<String>,
    ) -> Self {
        ServerMessage::ToolCall {
            session_id: session_id.to_string(),
            data: ToolCallData {
                tool_name: tool_name.to_string(),
                arguments,
                tool_call_id,
                status: "calling".into(),
            },
        }
    }

    pub fn tool_result_ok(
        session_id: &str,
        tool_name: &str,
        result: Value,
        tool_call_id: Option<String>,
    ) -> Self {
        ServerMessage::ToolResult {
            session_id: session_id.to_string(),
            data: ToolResultData {
                tool_name: tool_name.to_string(),
                tool_call_id,
                status: "completed".into(),
                result: Some(result),
                error: None,
            },
        }
    }

    pub fn tool_result_err(
        session_id: &str,
        tool_name: &str,
        error: &str,
        tool_call_id: Option<String>,
    ) -> Self {
        ServerMessage::ToolResult {
            session_id: session_id.to_string(),
            data: ToolResultData {
                tool_name: tool_name.to_string(),
                tool_call_id,
                status: "failed".into(),
                result: None,
                error: Some(error.to_string()),
            },
        }
    }

    /// The single translation point from domain errors to the wire.
    pub fn error(session_id: &str, error: &vg_domain::error::Error) -> Self {
        ServerMessage::Error {
            session_id: session_id.to_string(),
            data: ErrorData {
                error_code: error.code().to_string(),
                message: error.to_string(),
                retriable: error.retriable(),
            },
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            ServerMessage::Connected { session_id, .. }
            | ServerMessage::Stt { session_id, .. }
            | ServerMessage::Partial { session_id, .. }
            | ServerMessage::Text { session_id, .. }
            | ServerMessage::ToolCall { session_id, .. }
            | ServerMessage::ToolResult { session_id, .. }
            | ServerMessage::Error { session_id, .. }
            | ServerMessage::Heartbeat { session_id } => session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "server_connected",
            ServerMessage::Stt { .. } => "server_stt",
            ServerMessage::Partial { .. } => "server_partial",
            ServerMessage::Text { .. } => "server_text",
            ServerMessage::ToolCall { .. } => "server_tool_call",
            ServerMessage::ToolResult { .. } => "server_tool_result",
            ServerMessage::Error { .. } => "server_error",
            ServerMessage::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize server message");
            String::new()
        })
    }
}
