//! Duel Arena Server
//!
//! Standalone process around the duel core. It handles:
//! - HTTP endpoints for arena administration, kits, queueing and matches
//! - Periodic queue maintenance
//! - Ending all matches and saving arenas on shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duel_arena::http::build_router;
use duel_arena::util::time::init_server_time;
use duel_arena::world::{MemoryPlayers, MemoryWorld};
use duel_arena::{AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Duel Arena Server");
    info!("Server address: {}", config.server_addr);

    // Create application state
    let state = AppState::new(
        config.clone(),
        Arc::new(MemoryWorld::new()),
        Arc::new(MemoryPlayers::new()),
    );
    info!(
        arenas = state.pool.len(),
        kits = state.kits.len(),
        "Loaded arenas and kits"
    );

    // Spawn queue maintenance
    let queue = state.queue.clone();
    let sweep_every = config.queue_sweep_interval;
    let sweeper = tokio::spawn(async move {
        queue.run(sweep_every).await;
    });

    // Prune idle rate limiter keys
    let limiter = state.join_limiter.clone();
    let pruner = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            limiter.prune();
        }
    });

    // Build router
    let router = build_router(state.clone());

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    pruner.abort();
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_target(true)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(true)))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
