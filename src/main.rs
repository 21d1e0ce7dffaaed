//! Trip orchestrator HTTP service

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trip_orchestrator::api::{create_router, AppState};
use trip_orchestrator::cache::{ResponseCache, ToolResultCache};
use trip_orchestrator::clock::{Clock, SystemClock};
use trip_orchestrator::config::AppConfig;
use trip_orchestrator::orchestrator::Orchestrator;
use trip_orchestrator::session::SessionStore;
use trip_orchestrator::system_prompt::build_system_prompt;
use trip_orchestrator::tools::ToolRegistry;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trip_orchestrator=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let controller = Arc::new(config.llm.build_controller());
    if controller.is_empty() {
        tracing::warn!("No LLM API keys configured. Set CEREBRAS_API_KEY, GROQ_API_KEY or GEMINI_API_KEY.");
    } else {
        tracing::info!(
            backends = ?controller.backend_ids(),
            active = ?controller.active_backend_id(),
            "LLM backends initialized"
        );
    }

    let tools = Arc::new(ToolRegistry::standard(&config.city, &config.endpoints)?);
    tracing::info!(city = %config.city, handlers = ?tools.handler_names(), "Tool registry initialized");

    let orchestrator = Arc::new(
        Orchestrator::new(
            controller,
            tools,
            Arc::new(SessionStore::new(config.session_timeout, clock.clone())),
            Arc::new(ResponseCache::new(
                config.response_cache_ttl,
                config.response_cache_max_size,
                clock.clone(),
            )),
            Arc::new(ToolResultCache::new(config.tool_cache_ttl, config.tool_cache_max_size, clock)),
            build_system_prompt(&config.city),
        )
        .with_config(config.orchestrator.clone()),
    );

    // Expiry is lazy on read; the sweep only bounds memory held by idle entries
    let sweeper = orchestrator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = sweeper.cleanup_expired();
            if removed > 0 {
                tracing::info!(removed, "Expired entries swept");
            }
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(orchestrator))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Trip orchestrator listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
