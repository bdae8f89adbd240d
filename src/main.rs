use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use compliance_guard::error::ConfigError;
use compliance_guard::{AppState, Cache, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();
    match &config {
        Ok(config) => init_tracing(config.log_filter(), config.log_json),
        Err(_) => init_tracing(EnvFilter::new("info"), false),
    }

    info!(
        "Starting Compliance Guard v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Human-readable logs by default; `json` switches to JSON lines.
fn init_tracing(filter: EnvFilter, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Result<Config, ConfigError>) -> Result<(), exitcode::ExitCode> {
    let config = config.map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = %config.port,
        cache_enabled = config.cache.enabled,
        store = ?config.cache.store,
        "Configuration loaded"
    );

    // Metrics exporter (optional)
    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    // Cache backing store
    let cache = Cache::from_config(&config.cache).await.map_err(|e| {
        error!("Failed to initialize cache: {e}");
        exitcode::UNAVAILABLE
    })?;
    info!(store = cache.store_name(), prefix = cache.prefix(), "Cache ready");

    // Build application state and router
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let state = AppState::new(config, cache);
    let app = build_router(state.clone());

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health             - Health check");
    info!("  POST /api/auth/register  - Register (password policy)");
    info!("  GET  /api/account        - Account profile (masked)");

    // Start server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    // Gracefully shutdown background tasks
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
