/// Shared error type used across all VoiceGate crates.
///
/// Every variant maps to a stable client-facing error code and a
/// retriable flag; the connection handler is the single place where
/// errors are translated into `server_error` frames.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication: {0}")]
    Authentication(String),

    #[error("validation error in field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("audio processing: {message}")]
    AudioProcessing { message: String, retriable: bool },

    #[error("STT: {message}")]
    Stt { message: String, retriable: bool },

    #[error("agent: {message}")]
    Agent { message: String, retriable: bool },

    #[error("connection: {0}")]
    Connection(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Convenience constructor for field-level validation failures.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable error code surfaced to clients as `server_error.error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Authentication(_) => "AUTHENTICATION_ERROR",
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Error::AudioProcessing { .. } => "AUDIO_PROCESSING_ERROR",
            Error::Stt { .. } => "STT_ERROR",
            Error::Agent { .. } => "AGENT_ERROR",
            Error::Connection(_) => "CONNECTION_ERROR",
            Error::Timeout(_) => "TIMEOUT_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the client may retry the failed operation.
    pub fn retriable(&self) -> bool {
        match self {
            Error::Authentication(_)
            | Error::Validation { .. }
            | Error::SessionNotFound(_)
            | Error::Config(_)
            | Error::Json(_)
            | Error::Internal(_) => false,
            Error::AudioProcessing { retriable, .. }
            | Error::Stt { retriable, .. }
            | Error::Agent { retriable, .. } => *retriable,
            Error::Connection(_) | Error::Timeout(_) | Error::Io(_) => true,
        }
    }
}
