mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use exambox_common::config::Config;
use exambox_engine::config::ProfileConfigManager;
use exambox_engine::{DockerEngine, Executor};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

pub struct AppState<E> {
    pub executor: Executor<E>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Exambox API booting...");

    let config = Config::from_env().context("Invalid environment configuration")?;
    info!(
        timeout_secs = config.timeout_secs,
        capture_limit_bytes = config.capture_limit_bytes,
        max_concurrent = config.max_concurrent,
        max_queued = config.max_queued,
        "Loaded configuration"
    );

    let profiles = ProfileConfigManager::load(&config.profiles_path).map_err(|e| {
        error!("Failed to load profile configurations: {:#}", e);
        error!("Make sure {} exists or set EXAMBOX_PROFILES", config.profiles_path.display());
        e
    })?;
    info!("Loaded profile configurations for: {:?}", profiles.list_profiles());

    let engine = DockerEngine::new(profiles, &config)?;
    engine.ping().await.map_err(|e| {
        error!("Docker daemon is not reachable: {:#}", e);
        e
    })?;
    info!("Connected to Docker");

    let missing = engine.missing_images().await;
    if !missing.is_empty() {
        warn!(
            images = ?missing,
            "Runner images are missing; requests for these profiles will fail until they are built"
        );
    }

    let state = Arc::new(AppState {
        executor: Executor::new(engine, &config),
    });

    let app = Router::new()
        .merge(routes::routes::<DockerEngine>())
        .with_state(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal, finishing in-flight executions...");
}
