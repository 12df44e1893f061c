//! Resolution of spec strings through the built-in plugin registry.

use vg_domain::config::{SttConfig, TurnDetectorConfig, VadConfig};
use vg_providers::resolver;
use vg_providers::PluginRegistry;

#[test]
fn stt_spec_overrides_flow_into_the_handler_config() {
    let registry = PluginRegistry::with_builtins();

    // Resolution validates before creating: no API key means a config
    // error, not a handler with missing credentials.
    let base = SttConfig::default();
    let err = resolver::resolve_stt(&registry, "deepgram/nova-2:es", &base).unwrap_err();
    assert!(err.to_string().contains("DEEPGRAM_API_KEY"));
}

#[test]
fn vad_resolution_requires_a_model_path() {
    let registry = PluginRegistry::with_builtins();
    let base = VadConfig::default();
    let err = resolver::resolve_vad(&registry, "silero", &base).unwrap_err();
    assert!(err.to_string().contains("model path"));
}

#[test]
fn vad_resolution_rejects_unsupported_sample_rates() {
    let registry = PluginRegistry::with_builtins();
    let base = VadConfig {
        sample_rate: 44100,
        model_path: Some("model.onnx".into()),
        ..Default::default()
    };
    let err = resolver::resolve_vad(&registry, "silero", &base).unwrap_err();
    assert!(err.to_string().contains("44100"));
}

#[test]
fn turn_detector_resolution_requires_model_and_tokenizer() {
    let registry = PluginRegistry::with_builtins();
    let base = TurnDetectorConfig::default();
    let err = resolver::resolve_turn_detector(&registry, "multilingual", &base).unwrap_err();
    assert!(err.to_string().contains("model path"));

    let with_model = TurnDetectorConfig {
        model_path: Some("model.onnx".into()),
        ..Default::default()
    };
    let err = resolver::resolve_turn_detector(&registry, "multilingual", &with_model).unwrap_err();
    assert!(err.to_string().contains("tokenizer"));
}

#[test]
fn unknown_providers_enumerate_registered_alternatives() {
    let registry = PluginRegistry::with_builtins();
    let err = resolver::resolve_stt(&registry, "whisperx", &SttConfig::default()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("'whisperx'"));
    assert!(message.contains("deepgram"));
}
