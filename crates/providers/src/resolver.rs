//! Spec-string resolution.
//!
//! Translates opaque plugin specifications into runtime handler
//! instances:
//!
//! - STT: `provider[/model][:language]`, e.g. `deepgram/nova-2:en-US`
//! - LLM / VAD / turn detector: `provider[/model]`
//!
//! The resolver clones the defaulted category config, applies any
//! overrides from the spec, validates, then creates the handler.

use std::sync::Arc;

use vg_domain::config::{LlmConfig, SttConfig, TurnDetectorConfig, VadConfig};
use vg_domain::error::{Error, Result};

use crate::registry::PluginRegistry;
use crate::traits::{LlmModel, SttHandler, TurnDetector, Vad};

/// Parsed `provider[/model][:language]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SttSpec {
    pub provider: String,
    pub model: Option<String>,
    pub language: Option<String>,
}

/// Parsed `provider[/model]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub provider: String,
    pub model: Option<String>,
}

pub fn parse_stt_spec(spec: &str) -> Result<SttSpec> {
    if spec.trim().is_empty() {
        return Err(Error::Config(format!("invalid STT spec: {spec:?}")));
    }
    let (main, language) = match spec.split_once(':') {
        Some((main, lang)) => (main, non_empty(lang)),
        None => (spec, None),
    };
    let parsed = parse_provider_model(main, "STT")?;
    Ok(SttSpec {
        provider: parsed.provider,
        model: parsed.model,
        language,
    })
}

pub fn parse_plugin_spec(spec: &str) -> Result<PluginSpec> {
    parse_provider_model(spec, "plugin")
}

fn parse_provider_model(spec: &str, kind: &str) -> Result<PluginSpec> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(Error::Config(format!("invalid {kind} spec: empty string")));
    }
    let (provider, model) = match spec.split_once('/') {
        Some((provider, model)) => (provider, non_empty(model)),
        None => (spec, None),
    };
    let provider = provider.trim().to_ascii_lowercase();
    if provider.is_empty() {
        return Err(Error::Config(format!("invalid {kind} spec: {spec:?}")));
    }
    Ok(PluginSpec { provider, model })
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn unknown(category: &str, provider: &str, available: Vec<String>) -> Error {
    let available = if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    };
    Error::Config(format!(
        "{category} plugin '{provider}' not found. Available plugins: {available}"
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn resolve_stt(
    registry: &PluginRegistry,
    spec: &str,
    base: &SttConfig,
) -> Result<Arc<dyn SttHandler>> {
    let parsed = parse_stt_spec(spec)?;
    let plugin = registry
        .get_stt(&parsed.provider)
        .ok_or_else(|| unknown("STT", &parsed.provider, registry.list_stt()))?;

    let mut config = base.clone();
    if parsed.model.is_some() {
        config.model = parsed.model;
    }
    if let Some(language) = parsed.language {
        config.language = language;
    }
    plugin.validate(&config)?;
    let handler = plugin.create_handler(&config)?;
    tracing::debug!(spec, provider = %plugin.provider(), "resolved STT handler");
    Ok(handler)
}

pub fn resolve_llm(
    registry: &PluginRegistry,
    spec: &str,
    base: &LlmConfig,
) -> Result<Arc<dyn LlmModel>> {
    let parsed = parse_plugin_spec(spec)?;
    let plugin = registry
        .get_llm(&parsed.provider)
        .ok_or_else(|| unknown("LLM", &parsed.provider, registry.list_llm()))?;

    let mut config = base.clone();
    if parsed.model.is_some() {
        config.model = parsed.model;
    }
    plugin.validate(&config)?;
    let model = plugin.create_model(&config)?;
    tracing::debug!(spec, provider = %plugin.provider(), "resolved LLM model");
    Ok(model)
}

pub fn resolve_vad(registry: &PluginRegistry, spec: &str, base: &VadConfig) -> Result<Box<dyn Vad>> {
    let parsed = parse_plugin_spec(spec)?;
    let plugin = registry
        .get_vad(&parsed.provider)
        .ok_or_else(|| unknown("VAD", &parsed.provider, registry.list_vad()))?;

    let config = base.clone();
    plugin.validate(&config)?;
    let handler = plugin.create_handler(&config)?;
    tracing::debug!(spec, provider = %plugin.provider(), "resolved VAD handler");
    Ok(handler)
}

pub fn resolve_turn_detector(
    registry: &PluginRegistry,
    spec: &str,
    base: &TurnDetectorConfig,
) -> Result<Arc<dyn TurnDetector>> {
    let parsed = parse_plugin_spec(spec)?;
    let plugin = registry.get_turn_detector(&parsed.provider).ok_or_else(|| {
        unknown(
            "turn detector",
            &parsed.provider,
            registry.list_turn_detector(),
        )
    })?;

    let config = base.clone();
    plugin.validate(&config)?;
    let handler = plugin.create_handler(&config)?;
    tracing::debug!(spec, provider = %plugin.provider(), "resolved turn detector");
    Ok(handler)
}
