//! lungscan-api - Lung CT scan classification service
//!
//! Loads the pretrained artifacts once, then serves predictions over HTTP.
//! Any artifact problem aborts startup before the listener is bound.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lungscan_api::config::{locate_config_file, Args, Config, TomlConfig};
use lungscan_api::{build_router, logging, AppState};
use lungscan_core::InferenceContext;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = locate_config_file(args.config.as_deref())?;
    let toml_config = match &config_path {
        Some(path) => TomlConfig::load(path)?,
        None => TomlConfig::default(),
    };
    let config = Config::resolve(toml_config, args.overrides()).context("Invalid configuration")?;

    logging::init_tracing(&config.logging).context("Failed to initialize logging")?;

    // Build identification first, before artifact loading delays
    info!(
        "Starting LungScan API (lungscan-api) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Configuration file: {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }
    info!("Environment: {}", config.environment);
    if config.api_key_fallback {
        warn!("API_KEY not set, using the development key");
    }
    if let Some(file) = &config.logging.file {
        info!("Logging to {}", file.display());
    }

    let paths = config.artifacts.clone();
    let options = config.extractor;
    let loaded = tokio::task::spawn_blocking(move || InferenceContext::load(&paths, &options))
        .await
        .context("Artifact loading task failed")?;
    let context = match loaded {
        Ok(context) => {
            info!("✓ Loaded model artifacts");
            Arc::new(context)
        }
        Err(e) => {
            error!("Failed to load model artifacts: {}", e);
            return Err(e.into());
        }
    };

    let state = AppState::new(context, &config.api_key, config.max_upload_bytes);
    let app = build_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("lungscan-api listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
