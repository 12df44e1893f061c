use serde::{Deserialize, Serialize};

/// Speech-to-text provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Plugin spec, `provider[/model][:language]`.
    #[serde(default = "d_spec")]
    pub spec: String,
    /// Model override; usually supplied through the spec.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "d_language")]
    pub language: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "d_true")]
    pub interim_results: bool,
    #[serde(default = "d_true")]
    pub punctuate: bool,
    #[serde(default = "d_true")]
    pub smart_format: bool,
    /// Provider-side endpointing window, milliseconds.
    #[serde(default = "d_endpointing_ms")]
    pub endpointing_ms: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spec: d_spec(),
            model: None,
            language: d_language(),
            api_key: None,
            interim_results: true,
            punctuate: true,
            smart_format: true,
            endpointing_ms: d_endpointing_ms(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_spec() -> String {
    "deepgram/nova-2".into()
}
fn d_language() -> String {
    "en-US".into()
}
fn d_endpointing_ms() -> u32 {
    300
}
