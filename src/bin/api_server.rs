// API Server Binary Entry Point
//
// Purpose: Start the Axum loss-statistics server
// Usage: cargo run --bin api_server

use guira_loss::{create_router, AppState, Config};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (structured logging)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    // Default log level: info for our crate, warn for others
                    "guira_loss=info,tower_http=debug,axum=debug,warn".into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting API server...");

    let config = Config::from_env()?;

    tracing::info!("Configuration:");
    tracing::info!("  PORT: {}", config.port);
    tracing::info!("  CARTODB_API_URL: {}", config.store_url);
    tracing::info!("  CARTODB_DOWNLOAD_URL: {}", config.download_url);
    tracing::info!("  GEOSTORE_URL: {}", config.geostore_url);
    tracing::info!("  REQUEST_TIMEOUT: {:?}", config.request_timeout);
    tracing::info!("  UPSTREAM_TIMEOUT: {:?}", config.upstream_timeout);
    tracing::info!("  CACHE_TTL: {:?}", config.cache_ttl);
    tracing::info!("  DEFAULT_WINDOW: {:?}", config.default_window);
    tracing::info!("  REGION_RESOLUTION: {:?}", config.resolution);

    let state = AppState::new(&config)?;
    tracing::info!("Application state initialized successfully");

    // Create router with all endpoints and middleware
    let app = create_router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
