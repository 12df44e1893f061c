use serde::{Deserialize, Serialize};

/// Language-model provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Plugin spec, `provider[/model]`.
    #[serde(default = "d_spec")]
    pub spec: String,
    /// Model override; usually supplied through the spec.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            spec: d_spec(),
            model: None,
            base_url: d_base_url(),
            api_key: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

fn d_spec() -> String {
    "openai/gpt-4o-mini".into()
}
fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
