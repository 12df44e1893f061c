//! Plugin registry.
//!
//! Holds the registered plugins for all four categories. Initialized at
//! startup, read for the lifetime of the process; registration after
//! startup is allowed but rare. Re-registering a provider name replaces
//! the previous plugin deterministically (last wins) with a warning.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use vg_domain::config::{LlmConfig, SttConfig, TurnDetectorConfig, VadConfig};
use vg_domain::error::Result;

use crate::traits::{LlmModel, SttHandler, TurnDetector, Vad};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub trait SttPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn provider(&self) -> &str;
    fn required_env_vars(&self) -> &[&str];
    fn validate(&self, config: &SttConfig) -> Result<()>;
    fn create_handler(&self, config: &SttConfig) -> Result<Arc<dyn SttHandler>>;
}

pub trait LlmPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn provider(&self) -> &str;
    fn required_env_vars(&self) -> &[&str];
    fn validate(&self, config: &LlmConfig) -> Result<()>;
    fn create_model(&self, config: &LlmConfig) -> Result<Arc<dyn LlmModel>>;
}

pub trait VadPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn provider(&self) -> &str;
    fn required_env_vars(&self) -> &[&str];
    fn validate(&self, config: &VadConfig) -> Result<()>;
    fn create_handler(&self, config: &VadConfig) -> Result<Box<dyn Vad>>;
}

pub trait TurnDetectorPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn provider(&self) -> &str;
    fn required_env_vars(&self) -> &[&str];
    fn validate(&self, config: &TurnDetectorConfig) -> Result<()>;
    fn create_handler(&self, config: &TurnDetectorConfig) -> Result<Arc<dyn TurnDetector>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PluginRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct PluginRegistry {
    stt: RwLock<HashMap<String, Arc<dyn SttPlugin>>>,
    llm: RwLock<HashMap<String, Arc<dyn LlmPlugin>>>,
    vad: RwLock<HashMap<String, Arc<dyn VadPlugin>>>,
    turn_detector: RwLock<HashMap<String, Arc<dyn TurnDetectorPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in plugins registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_stt(Arc::new(crate::deepgram::DeepgramPlugin));
        registry.register_llm(Arc::new(crate::openai_compat::OpenAiCompatPlugin));
        registry.register_vad(Arc::new(crate::vad::SileroPlugin));
        registry.register_turn_detector(Arc::new(crate::turn_detector::MultilingualPlugin));
        registry
    }

    pub fn register_stt(&self, plugin: Arc<dyn SttPlugin>) {
        let key = plugin.provider().to_ascii_lowercase();
        if self.stt.write().insert(key.clone(), plugin).is_some() {
            tracing::warn!(provider = %key, "replacing previously registered STT plugin");
        }
    }

    pub fn register_llm(&self, plugin: Arc<dyn LlmPlugin>) {
        let key = plugin.provider().to_ascii_lowercase();
        if self.llm.write().insert(key.clone(), plugin).is_some() {
            tracing::warn!(provider = %key, "replacing previously registered LLM plugin");
        }
    }

    pub fn register_vad(&self, plugin: Arc<dyn VadPlugin>) {
        let key = plugin.provider().to_ascii_lowercase();
        if self.vad.write().insert(key.clone(), plugin).is_some() {
            tracing::warn!(provider = %key, "replacing previously registered VAD plugin");
        }
    }

    pub fn register_turn_detector(&self, plugin: Arc<dyn TurnDetectorPlugin>) {
        let key = plugin.provider().to_ascii_lowercase();
        if self
            .turn_detector
            .write()
            .insert(key.clone(), plugin)
            .is_some()
        {
            tracing::warn!(provider = %key, "replacing previously registered turn-detector plugin");
        }
    }

    pub fn get_stt(&self, provider: &str) -> Option<Arc<dyn SttPlugin>> {
        self.stt.read().get(provider).cloned()
    }

    pub fn get_llm(&self, provider: &str) -> Option<Arc<dyn LlmPlugin>> {
        self.llm.read().get(provider).cloned()
    }

    pub fn get_vad(&self, provider: &str) -> Option<Arc<dyn VadPlugin>> {
        self.vad.read().get(provider).cloned()
    }

    pub fn get_turn_detector(&self, provider: &str) -> Option<Arc<dyn TurnDetectorPlugin>> {
        self.turn_detector.read().get(provider).cloned()
    }

    pub fn list_stt(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stt.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_llm(&self) -> Vec<String> {
        let mut names: Vec<String> = self.llm.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_vad(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vad.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_turn_detector(&self) -> Vec<String> {
        let mut names: Vec<String> = self.turn_detector.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vg_domain::error::Error;

    struct FakeSttPlugin {
        name: &'static str,
    }

    impl SttPlugin for FakeSttPlugin {
        fn name(&self) -> &str {
            self.name
        }
        fn provider(&self) -> &str {
            "fake"
        }
        fn required_env_vars(&self) -> &[&str] {
            &[]
        }
        fn validate(&self, _config: &SttConfig) -> Result<()> {
            Ok(())
        }
        fn create_handler(&self, _config: &SttConfig) -> Result<Arc<dyn SttHandler>> {
            Err(Error::Config("fake plugin cannot create handlers".into()))
        }
    }

    #[test]
    fn reregistering_replaces_deterministically() {
        let registry = PluginRegistry::new();
        registry.register_stt(Arc::new(FakeSttPlugin { name: "first" }));
        registry.register_stt(Arc::new(FakeSttPlugin { name: "second" }));

        let plugin = registry.get_stt("fake").unwrap();
        assert_eq!(plugin.name(), "second");
        assert_eq!(registry.list_stt(), vec!["fake".to_string()]);
    }

    #[test]
    fn lookup_is_case_normalized_at_registration() {
        let registry = PluginRegistry::new();
        registry.register_stt(Arc::new(FakeSttPlugin { name: "x" }));
        assert!(registry.get_stt("fake").is_some());
        assert!(registry.get_stt("FAKE").is_none());
    }

    #[test]
    fn builtins_cover_all_four_categories() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.list_stt(), vec!["deepgram".to_string()]);
        assert_eq!(registry.list_llm(), vec!["openai".to_string()]);
        assert_eq!(registry.list_vad(), vec!["silero".to_string()]);
        assert_eq!(
            registry.list_turn_detector(),
            vec!["multilingual".to_string()]
        );
    }
}
