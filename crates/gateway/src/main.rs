use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use vg_domain::config::Config;
use vg_gateway::api;
use vg_gateway::events::EventBus;
use vg_gateway::metrics::MetricsCollector;
use vg_gateway::state::{ApiKeyValidator, AppState};
use vg_providers::{resolver, PluginRegistry};
use vg_sessions::{spawn_expiry_sweep, SessionStore};
use vg_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "voicegate", about = "Realtime voice-and-text agent server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the server (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            let config = Config::load().context("loading configuration")?;
            init_tracing(&config);
            config.validate().context("validating configuration")?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("voicegate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},vg_gateway=debug", config.server.log_level)));
    if config.server.debug {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    }
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("VoiceGate starting");

    // ── Plugins ──────────────────────────────────────────────────────
    let plugins = Arc::new(PluginRegistry::with_builtins());

    // ── LLM (required) ───────────────────────────────────────────────
    let llm = resolver::resolve_llm(&plugins, &config.llm.spec, &config.llm)
        .context("initializing LLM provider")?;
    tracing::info!(spec = %config.llm.spec, model = llm.model_id(), "LLM provider ready");

    // ── STT (optional; audio features degrade without it) ───────────
    let stt = if config.stt.enabled {
        match resolver::resolve_stt(&plugins, &config.stt.spec, &config.stt) {
            Ok(handler) => {
                tracing::info!(spec = %config.stt.spec, "STT provider ready");
                Some(handler)
            }
            Err(e) => {
                tracing::warn!(error = %e, "STT initialization failed; audio features disabled");
                None
            }
        }
    } else {
        tracing::info!("STT disabled by configuration");
        None
    };

    // ── Turn detector (optional; endpointing falls back to min delay) ─
    let turn_detector = if config.turn_detector.enabled {
        match resolver::resolve_turn_detector(&plugins, &config.turn_detector.spec, &config.turn_detector)
        {
            Ok(detector) => {
                tracing::info!(spec = %config.turn_detector.spec, "turn detector ready");
                Some(detector)
            }
            Err(e) => {
                tracing::warn!(error = %e, "turn detector initialization failed; using min endpointing delay");
                None
            }
        }
    } else {
        None
    };

    // ── Core services ────────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::new());
    let metrics = Arc::new(MetricsCollector::new());
    let events = Arc::new(EventBus::new());
    let tools = Arc::new(ToolRegistry::new());
    let api_key_validator = build_api_key_validator(&config);

    let state = AppState {
        config: config.clone(),
        sessions: sessions.clone(),
        metrics: metrics.clone(),
        events: events.clone(),
        tools,
        plugins,
        llm,
        stt,
        turn_detector,
        api_key_validator,
    };

    // ── Idle session expiry ──────────────────────────────────────────
    {
        let events = events.clone();
        let metrics = metrics.clone();
        spawn_expiry_sweep(
            sessions,
            config.server.session_timeout_secs,
            Arc::new(move |session| {
                let events = events.clone();
                let metrics = metrics.clone();
                Box::pin(async move {
                    metrics.remove_session(&session.session_id);
                    events
                        .publish(
                            "session_destroyed",
                            Some(session.session_id.as_str()),
                            serde_json::json!({
                                "session_id": session.session_id,
                                "reason": "idle_timeout",
                            }),
                        )
                        .await;
                }) as futures_util::future::BoxFuture<'static, ()>
            }),
        );
    }
    tracing::info!(
        timeout_secs = config.server.session_timeout_secs,
        "session expiry sweep started"
    );

    // ── Router ───────────────────────────────────────────────────────
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = api::router()
        .layer(cors)
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_connections,
        ))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "VoiceGate listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Constant-time API-key check against the configured key set. With
/// `require_api_key = false`, any non-empty key passes (dev mode).
fn build_api_key_validator(config: &Config) -> ApiKeyValidator {
    if !config.auth.require_api_key {
        tracing::warn!("API key validation DISABLED; any non-empty key accepted");
        return Arc::new(|key: &str| !key.is_empty());
    }

    if config.auth.api_keys.is_empty() {
        tracing::warn!("no API keys configured (set VG_API_KEYS); all connections will be rejected");
    }
    let hashes: Vec<Vec<u8>> = config
        .auth
        .api_keys
        .iter()
        .map(|key| Sha256::digest(key.as_bytes()).to_vec())
        .collect();

    Arc::new(move |provided: &str| {
        let digest = Sha256::digest(provided.as_bytes()).to_vec();
        // Hashing normalizes lengths so ct_eq always compares 32 bytes.
        hashes
            .iter()
            .fold(false, |found, expected| {
                found | bool::from(expected.ct_eq(&digest))
            })
    })
}
