use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// VAD
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Plugin spec, `provider[/model]`.
    #[serde(default = "d_vad_spec")]
    pub spec: String,
    /// Speech probability at or above which a window counts as speech.
    #[serde(default = "d_vad_threshold")]
    pub activation_threshold: f32,
    /// Path to the ONNX model file.
    #[serde(default)]
    pub model_path: Option<String>,
    /// Sample rate the processor is built for; set per audio stream.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spec: d_vad_spec(),
            activation_threshold: d_vad_threshold(),
            model_path: None,
            sample_rate: d_sample_rate(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn detector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetectorConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Plugin spec, `provider[/model]`.
    #[serde(default = "d_td_spec")]
    pub spec: String,
    /// End-of-utterance probability threshold.
    #[serde(default = "d_td_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub tokenizer_path: Option<String>,
}

impl Default for TurnDetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spec: d_td_spec(),
            threshold: d_td_threshold(),
            model_path: None,
            tokenizer_path: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Endpointing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How long to wait after an end-of-utterance signal before committing
/// the user turn to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointingConfig {
    /// Delay when the turn detector is confident the turn is over.
    #[serde(default = "d_min_delay")]
    pub min_delay_secs: f64,
    /// Delay when the turn detector thinks the user may continue.
    #[serde(default = "d_max_delay")]
    pub max_delay_secs: f64,
}

impl Default for EndpointingConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: d_min_delay(),
            max_delay_secs: d_max_delay(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audio pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Bounded frame queue between the socket and the STT stream.
    #[serde(default = "d_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            queue_capacity: d_queue_capacity(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_vad_spec() -> String {
    "silero".into()
}
fn d_vad_threshold() -> f32 {
    0.5
}
fn d_sample_rate() -> u32 {
    16000
}
fn d_td_spec() -> String {
    "multilingual".into()
}
fn d_td_threshold() -> f32 {
    0.6
}
fn d_min_delay() -> f64 {
    0.5
}
fn d_max_delay() -> f64 {
    3.0
}
fn d_queue_capacity() -> usize {
    256
}
