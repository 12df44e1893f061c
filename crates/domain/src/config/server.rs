use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "d_log_level")]
    pub log_level: String,
    /// `client_text.text` limit in UTF-8 bytes.
    #[serde(default = "d_max_text")]
    pub max_text_size_bytes: usize,
    /// Decoded `client_audio_chunk` limit in bytes.
    #[serde(default = "d_max_chunk")]
    pub max_audio_chunk_size_bytes: usize,
    #[serde(default = "d_max_connections")]
    pub max_connections: usize,
    /// Sessions idle longer than this are retired.
    #[serde(default = "d_session_timeout")]
    pub session_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            debug: false,
            log_level: d_log_level(),
            max_text_size_bytes: d_max_text(),
            max_audio_chunk_size_bytes: d_max_chunk(),
            max_connections: d_max_connections(),
            session_timeout_secs: d_session_timeout(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// When false, any non-empty `x-api-key` is accepted (dev mode).
    #[serde(default = "d_true")]
    pub require_api_key: bool,
    /// Accepted API keys. Compared in constant time at the handler.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_api_key: true,
            api_keys: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: d_metrics_port(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    8000
}
fn d_log_level() -> String {
    "info".into()
}
fn d_max_text() -> usize {
    4096
}
fn d_max_chunk() -> usize {
    16384
}
fn d_max_connections() -> usize {
    1000
}
fn d_session_timeout() -> u64 {
    300
}
fn d_true() -> bool {
    true
}
fn d_metrics_port() -> u16 {
    9090
}
