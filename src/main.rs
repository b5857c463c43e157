use audiocache::{
    config::Config,
    health::HealthMonitor,
    middleware::{
        logging::request_logging_middleware, rate_limit::build_limiter, rate_limit::rate_limit_middleware,
        security::security_headers_middleware,
    },
    routes, transcode::TranscodeService, utils::Metrics, AppState,
};
use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("starting audiocache");

    let config = Arc::new(Config::from_env().map_err(|e| format!("configuration error: {e}"))?);
    info!("configuration loaded and validated");

    let metrics = Arc::new(Metrics::new());
    let health = Arc::new(HealthMonitor::new(&config.transcode));
    let transcode = TranscodeService::init(config.transcode.clone(), metrics.clone()).await?;
    let limiter = Arc::new(build_limiter(
        config.monitoring.rate_limit_requests_per_minute,
        config.monitoring.rate_limit_burst,
    ));

    let state = AppState {
        config: config.clone(),
        transcode,
        health,
        metrics,
        limiter,
    };

    info!("application state initialized");

    let app = create_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, cache_root = %config.transcode.cache_root.display(), "listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("server error: {e}"))?;

    state.transcode.shutdown().await;
    info!("shut down cleanly");
    Ok(())
}

fn init_logging() {
    let default_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "audiocache=info,tower_http=debug".to_string());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn create_router(state: AppState) -> Router {
    let cors = if state.config.server.allowed_origins.iter().any(|o| o == "*") {
        warn!("CORS configured for all origins, not recommended in production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
            .expose_headers([header::CONTENT_RANGE, header::CONTENT_LENGTH, header::ACCEPT_RANGES])
    } else {
        let origins: std::result::Result<Vec<_>, _> = state
            .config
            .server
            .allowed_origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>())
            .collect();

        match origins {
            Ok(origins) => {
                let mut cors_layer = CorsLayer::new()
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::RANGE])
                    .expose_headers([header::CONTENT_RANGE, header::CONTENT_LENGTH, header::ACCEPT_RANGES]);
                for origin in origins {
                    cors_layer = cors_layer.allow_origin(AllowOrigin::exact(origin));
                }
                cors_layer
            }
            Err(e) => {
                error!(error = %e, "invalid CORS origin configuration");
                CorsLayer::new().allow_origin(Any)
            }
        }
    };

    let middleware_stack = ServiceBuilder::new()
        .layer(TimeoutLayer::new(state.config.server.request_timeout))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(axum::middleware::from_fn_with_state(state.clone(), security_headers_middleware))
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(axum::middleware::from_fn_with_state(state.clone(), request_logging_middleware));

    routes::create_routes().layer(middleware_stack).with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
