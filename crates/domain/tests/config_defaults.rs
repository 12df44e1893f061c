//! Defaults and validation of the configuration tree.

use vg_domain::config::Config;

#[test]
fn empty_toml_yields_spec_defaults() {
    let config: Config = toml::from_str("").unwrap();

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 8000);
    assert_eq!(config.server.max_text_size_bytes, 4096);
    assert_eq!(config.server.max_audio_chunk_size_bytes, 16384);
    assert_eq!(config.server.session_timeout_secs, 300);

    assert_eq!(config.stt.spec, "deepgram/nova-2");
    assert_eq!(config.stt.language, "en-US");

    assert!((config.vad.activation_threshold - 0.5).abs() < f32::EPSILON);
    assert!((config.turn_detector.threshold - 0.6).abs() < f32::EPSILON);

    assert!((config.endpointing.min_delay_secs - 0.5).abs() < f64::EPSILON);
    assert!((config.endpointing.max_delay_secs - 3.0).abs() < f64::EPSILON);

    assert_eq!(config.audio.queue_capacity, 256);
    assert_eq!(config.agent.tool_call_limit, 8);
    assert!(config.metrics.enabled);
}

#[test]
fn partial_toml_overrides_only_named_fields() {
    let config: Config = toml::from_str(
        r#"
        [server]
        port = 9001

        [endpointing]
        min_delay_secs = 0.2
        "#,
    )
    .unwrap();

    assert_eq!(config.server.port, 9001);
    assert_eq!(config.server.host, "0.0.0.0");
    assert!((config.endpointing.min_delay_secs - 0.2).abs() < f64::EPSILON);
    assert!((config.endpointing.max_delay_secs - 3.0).abs() < f64::EPSILON);
}

#[test]
fn validate_rejects_out_of_range_thresholds() {
    let mut config = Config::default();
    config.vad.activation_threshold = 1.5;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.turn_detector.threshold = -0.1;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_inverted_endpointing_delays() {
    let mut config = Config::default();
    config.endpointing.min_delay_secs = 5.0;
    config.endpointing.max_delay_secs = 1.0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_accepts_collapsed_endpointing_delays() {
    // min == max collapses to a constant delay, which is allowed.
    let mut config = Config::default();
    config.endpointing.min_delay_secs = 1.0;
    config.endpointing.max_delay_secs = 1.0;
    assert!(config.validate().is_ok());
}
