//! Parley Gateway entry point

use std::net::SocketAddr;

use axum::Router;
use parley_gateway::{build_routes, metrics, AppState};
use parley_runtime::RuntimeConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "parley_gateway=debug,parley_runtime=info,tower_http=debug".into()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Parley Gateway v{}", parley_gateway::GATEWAY_VERSION);

    let config = RuntimeConfig::from_env()?;
    if config.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; requests must carry a bearer token");
    }
    metrics::init_metrics();

    let state = AppState::from_config(config)?;
    let app = Router::new()
        .merge(build_routes(state))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = std::env::var("PARLEY_BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse()?;

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
