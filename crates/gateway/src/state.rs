use std::sync::Arc;

use vg_domain::config::Config;
use vg_providers::registry::PluginRegistry;
use vg_providers::traits::{LlmModel, SttHandler, TurnDetector};
use vg_sessions::SessionStore;
use vg_tools::ToolRegistry;

use crate::events::EventBus;
use crate::metrics::MetricsCollector;

/// Host-supplied API-key predicate.
pub type ApiKeyValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Shared application state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub metrics: Arc<MetricsCollector>,
    pub events: Arc<EventBus>,
    pub tools: Arc<ToolRegistry>,
    /// Plugin registry, used to build per-stream VAD processors.
    pub plugins: Arc<PluginRegistry>,
    pub llm: Arc<dyn LlmModel>,
    /// `None` when STT is disabled; audio messages then fail cleanly.
    pub stt: Option<Arc<dyn SttHandler>>,
    pub turn_detector: Option<Arc<dyn TurnDetector>>,
    pub api_key_validator: ApiKeyValidator,
}
