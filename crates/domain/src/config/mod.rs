//! Configuration tree.
//!
//! Loaded from an optional `voicegate.toml`, then overridden by `VG_*`
//! environment variables. Every field has a serde default so a missing
//! file or empty table still yields a runnable config.

mod audio;
mod llm;
mod server;
mod stt;

pub use audio::{AudioConfig, EndpointingConfig, TurnDetectorConfig, VadConfig};
pub use llm::LlmConfig;
pub use server::{AuthConfig, MetricsConfig, ServerConfig};
pub use stt::SttConfig;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub turn_detector: TurnDetectorConfig,
    #[serde(default)]
    pub endpointing: EndpointingConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "d_agent_name")]
    pub name: String,
    /// System instructions prepended to every conversation.
    #[serde(default = "d_instructions")]
    pub instructions: String,
    /// Maximum model→tool→model iterations per turn.
    #[serde(default = "d_tool_call_limit")]
    pub tool_call_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: d_agent_name(),
            instructions: d_instructions(),
            tool_call_limit: d_tool_call_limit(),
        }
    }
}

fn d_agent_name() -> String {
    "VoiceGate Agent".into()
}
fn d_instructions() -> String {
    "You are a helpful assistant with access to realtime voice and text \
     communication. Provide clear, concise, and helpful responses."
        .into()
}
fn d_tool_call_limit() -> usize {
    8
}

impl Config {
    /// Load `voicegate.toml` from the working directory if present, then
    /// apply `VG_*` environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::fs::read_to_string("voicegate.toml") {
            Ok(raw) => toml::from_str(&raw)
                .map_err(|e| Error::Config(format!("voicegate.toml: {e}")))?,
            Err(_) => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply environment-variable overrides on top of the current values.
    pub fn apply_env(&mut self) {
        env_string("VG_HOST", &mut self.server.host);
        env_parse("VG_PORT", &mut self.server.port);
        env_bool("VG_DEBUG", &mut self.server.debug);
        env_string("VG_LOG_LEVEL", &mut self.server.log_level);
        env_parse("VG_MAX_TEXT_SIZE", &mut self.server.max_text_size_bytes);
        env_parse(
            "VG_MAX_AUDIO_CHUNK_SIZE",
            &mut self.server.max_audio_chunk_size_bytes,
        );
        env_parse("VG_MAX_CONNECTIONS", &mut self.server.max_connections);
        env_parse("VG_SESSION_TIMEOUT", &mut self.server.session_timeout_secs);

        env_bool("VG_REQUIRE_API_KEY", &mut self.auth.require_api_key);
        if let Ok(keys) = std::env::var("VG_API_KEYS") {
            self.auth.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }

        env_bool("VG_STT_ENABLED", &mut self.stt.enabled);
        env_string("VG_STT_SPEC", &mut self.stt.spec);
        env_string("VG_STT_LANGUAGE", &mut self.stt.language);
        if let Ok(key) = std::env::var("DEEPGRAM_API_KEY") {
            self.stt.api_key = Some(key);
        }

        env_string("VG_LLM_SPEC", &mut self.llm.spec);
        env_string("VG_LLM_BASE_URL", &mut self.llm.base_url);
        for var in ["VG_LLM_API_KEY", "OPENAI_API_KEY"] {
            if self.llm.api_key.is_none() {
                if let Ok(key) = std::env::var(var) {
                    self.llm.api_key = Some(key);
                }
            }
        }
        env_parse_opt("VG_LLM_TEMPERATURE", &mut self.llm.temperature);
        env_parse_opt("VG_LLM_MAX_TOKENS", &mut self.llm.max_tokens);

        env_bool("VG_VAD_ENABLED", &mut self.vad.enabled);
        env_parse("VG_VAD_THRESHOLD", &mut self.vad.activation_threshold);
        env_path("VG_VAD_MODEL_PATH", &mut self.vad.model_path);

        env_bool("VG_TURN_DETECTOR_ENABLED", &mut self.turn_detector.enabled);
        env_parse(
            "VG_TURN_DETECTOR_THRESHOLD",
            &mut self.turn_detector.threshold,
        );
        env_path(
            "VG_TURN_DETECTOR_MODEL_PATH",
            &mut self.turn_detector.model_path,
        );
        env_path(
            "VG_TURN_DETECTOR_TOKENIZER_PATH",
            &mut self.turn_detector.tokenizer_path,
        );

        env_parse(
            "VG_MIN_ENDPOINTING_DELAY",
            &mut self.endpointing.min_delay_secs,
        );
        env_parse(
            "VG_MAX_ENDPOINTING_DELAY",
            &mut self.endpointing.max_delay_secs,
        );

        env_parse("VG_AUDIO_QUEUE_CAPACITY", &mut self.audio.queue_capacity);

        env_bool("VG_ENABLE_METRICS", &mut self.metrics.enabled);
        env_parse("VG_METRICS_PORT", &mut self.metrics.port);

        env_string("VG_INSTRUCTIONS", &mut self.agent.instructions);
        env_parse("VG_TOOL_CALL_LIMIT", &mut self.agent.tool_call_limit);
    }

    /// Range checks that would otherwise surface deep inside the runtime.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.vad.activation_threshold) {
            return Err(Error::Config(
                "vad.activation_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.turn_detector.threshold) {
            return Err(Error::Config(
                "turn_detector.threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if self.endpointing.min_delay_secs > self.endpointing.max_delay_secs {
            return Err(Error::Config(
                "endpointing.min_delay_secs must not exceed max_delay_secs".into(),
            ));
        }
        if self.audio.queue_capacity == 0 {
            return Err(Error::Config("audio.queue_capacity must be > 0".into()));
        }
        Ok(())
    }
}

// ── env override helpers ────────────────────────────────────────────

fn env_string(var: &str, target: &mut String) {
    if let Ok(v) = std::env::var(var) {
        if !v.trim().is_empty() {
            *target = v;
        }
    }
}

/// Empty-string env values clear the path (kept as `None`).
fn env_path(var: &str, target: &mut Option<String>) {
    if let Ok(v) = std::env::var(var) {
        let trimmed = v.trim();
        *target = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var) {
        match v.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var, value = %v, "ignoring unparseable env override"),
        }
    }
}

fn env_parse_opt<T: std::str::FromStr>(var: &str, target: &mut Option<T>) {
    if let Ok(v) = std::env::var(var) {
        match v.trim().parse::<T>() {
            Ok(parsed) => *target = Some(parsed),
            Err(_) => tracing::warn!(var, value = %v, "ignoring unparseable env override"),
        }
    }
}

fn env_bool(var: &str, target: &mut bool) {
    if let Ok(v) = std::env::var(var) {
        *target = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
}
