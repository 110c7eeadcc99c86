use market_server::config::Config;
use market_server::repositories::{create_pool, run_migrations};
use market_server::{AppState, create_router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("market_server=info")),
        )
        .init();

    info!("Marketplace chat server v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    config.print_info();

    let pool = create_pool(&config.database_url, config.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database migrations applied");

    let state = Arc::new(
        AppState::new(pool.clone(), config.jwt_secret.clone())
            .with_idle_timeout(Duration::from_secs(config.ws_idle_timeout_secs)),
    );
    let app = create_router(state);

    let listener = TcpListener::bind((config.server_host.as_str(), config.server_port)).await?;
    info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for the shutdown signal: {:?}", e);
        return;
    }
    info!("Shutdown signal received");
}
