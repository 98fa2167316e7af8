//! Presence ledger service binary.
//!
//! Wires configuration, logging, the session store, and the HTTP API into
//! one process and runs until `Ctrl-C` or `SIGTERM`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `presence-config.yaml` (or `PRESENCE_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Open the configured store backend (migrating `PostgreSQL` if enabled)
//! 4. Build the ledger, query layer, and router
//! 5. Serve until a shutdown signal arrives
//! 6. Close the store

mod backend;
mod config;
mod error;

use std::sync::Arc;

use presence_api::{AppState, ServerConfig};
use presence_ledger::SystemClock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::backend::Backend;
use crate::config::{LogFormat, LoggingSection, PresenceConfig};
use crate::error::StartupError;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, store setup, or the server fails.
#[tokio::main]
async fn main() -> Result<(), StartupError> {
    // 1. Load configuration.
    let config = PresenceConfig::load()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        host = config.server.host,
        port = config.server.port,
        backend = ?config.store.backend,
        operation_timeout_ms = config.store.operation_timeout_ms,
        "presence-server starting"
    );

    // 3. Open the store.
    let backend = Backend::open(&config.store, &config.directory.seed).await?;

    // 4. Assemble application state.
    let state = AppState::new(
        Arc::clone(&backend.directory),
        Arc::clone(&backend.store),
        Arc::new(SystemClock),
        config.store.operation_timeout(),
    );
    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };

    // 5. Serve.
    let served =
        presence_api::start_server(&server_config, Arc::new(state), shutdown_signal()).await;

    // 6. Close the store whether or not serving succeeded.
    backend.close().await;

    match served {
        Ok(()) => {
            info!("presence-server shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "presence-server stopped with error");
            Err(e.into())
        }
    }
}

fn init_logging(config: &LoggingSection) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init(),
    }
}

/// Resolve on `Ctrl-C`, or `SIGTERM` on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received, draining requests");
}
