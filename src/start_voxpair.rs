//! Startup helpers for the voxpair server.

use std::process::ExitCode;
use std::sync::Arc;

use crate::core::config::VoxConfig;
use crate::maintenance::queue_sweeper::{QueueSweeper, SweeperConfig};
use crate::server::{self, AppState};

/// Run the server (used by the `voxpair-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting voxpair v{}", env!("CARGO_PKG_VERSION"));

    let config = match VoxConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    tracing::info!(
        "Ollama endpoint: {}",
        config.llm.base_url.as_deref().unwrap_or("default")
    );

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config)) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if a store or client cannot be created.
pub async fn initialize(
    config: VoxConfig,
) -> Result<Arc<AppState>, Box<dyn std::error::Error + Send + Sync>> {
    AppState::from_config(config)
        .await
        .map_err(|e| format!("Failed to create state: {e}").into())
}

/// Build the state, start the queue sweeper and serve until Ctrl-C.
///
/// # Errors
/// Returns an error if startup or the server fails.
pub async fn serve(config: VoxConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = initialize(config).await?;

    let sweeper = QueueSweeper::new(
        Arc::clone(&state.queue),
        Arc::clone(&state.directory),
        SweeperConfig::from(&state.config.matchmaking),
    );
    let stop_sweeper = sweeper.shutdown_notifier();
    let sweeper_task = sweeper.spawn();

    let result = server::run_server_with_shutdown(state, shutdown_signal()).await;

    stop_sweeper.notify_one();
    if let Err(e) = sweeper_task.await {
        tracing::warn!("Queue sweeper task failed: {e}");
    }
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
