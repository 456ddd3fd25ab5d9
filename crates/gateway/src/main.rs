//! CardForge API Gateway
//!
//! The HTTP boundary of the service.
//! Handles:
//! - Authentication (bearer tokens, identity provider delegation)
//! - Request validation and error translation
//! - Flashcard CRUD and AI generation routing
//! - Rate limiting and the generation timeout
//! - Observability (logging, metrics, tracing)

mod extract;
mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    extract::FromRef,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use cardforge_common::{
    auth::{self as auth_provider, AuthProvider, JwtManager},
    config::{AppConfig, ObservabilityConfig},
    db::{self, Store},
    llm::{self, ChatCompletion},
    metrics,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use middleware::rate_limit::{create_rate_limiter, GlobalRateLimiter};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone, FromRef)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub llm: Arc<dyn ChatCompletion>,
    pub auth: Arc<dyn AuthProvider>,
    pub jwt: Arc<JwtManager>,
    pub limiter: Arc<GlobalRateLimiter>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.observability);

    info!("Starting CardForge API Gateway v{}", cardforge_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port > 0 {
        install_metrics_exporter(config.observability.metrics_port)?;
    }
    metrics::register_metrics();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server.host/server.port")?;

    let state = build_state(config).await?;

    // Build the router
    let app = create_router(state);

    // Start the server
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Suffix("request_duration_seconds".to_string()),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("generation_duration_seconds".to_string()),
            metrics::GENERATION_BUCKETS,
        )?
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Wire collaborators selected by configuration
async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let store = db::create_store(&config).await?;
    let llm = llm::create_chat_client(&config.llm).context("Failed to create LLM client")?;
    let jwt = Arc::new(JwtManager::from_config(&config.auth)?);
    let auth = auth_provider::create_auth_provider(&config.auth, jwt.clone())?;
    let limiter = create_rate_limiter(config.rate_limit.requests_per_second, config.rate_limit.burst);

    info!(
        llm_provider = %config.llm.provider,
        auth_provider = %config.auth.provider,
        memory_store = config.uses_memory_store(),
        "Collaborators ready"
    );

    Ok(AppState {
        config: Arc::new(config),
        store,
        llm,
        auth,
        jwt,
        limiter,
    })
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Generation is the expensive route; only it is rate limited
    let mut generation_routes = Router::new()
        .route("/generations", post(handlers::generations::create_generation));
    if state.config.rate_limit.enabled {
        generation_routes = generation_routes.route_layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // API routes
    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Auth endpoints
        .route("/auth", post(handlers::auth::authenticate))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/logout", post(handlers::auth::logout))

        // Flashcard endpoints
        .route(
            "/flashcards",
            get(handlers::flashcards::list_flashcards).post(handlers::flashcards::create_flashcards),
        )
        .route(
            "/flashcards/{id}",
            get(handlers::flashcards::get_flashcard)
                .put(handlers::flashcards::update_flashcard)
                .delete(handlers::flashcards::delete_flashcard),
        )

        // Generation endpoints
        .merge(generation_routes)
        .route_layer(from_fn(middleware::metrics::track_metrics));

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
