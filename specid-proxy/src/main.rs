//! specid-proxy - Species identification proxy
//!
//! Accepts urlencoded classification requests, forwards them to the
//! configured species classifier and answers with a ranked, optionally
//! enriched suggestion list.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use specid_common::config::load_config;
use specid_proxy::services::{ClassificationService, ServiceDeps};
use specid_proxy::AppState;

/// Command-line arguments for specid-proxy
#[derive(Parser, Debug)]
#[command(name = "specid-proxy")]
#[command(about = "Species identification proxy")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "SPECID_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding server.bind_addr
    #[arg(short, long, env = "SPECID_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration first so logging.level can seed the filter
    let (config_path, config) =
        load_config(args.config.as_deref()).context("Failed to load configuration")?;

    let level = &config.logging.level;
    let default_filter = format!("specid_proxy={level},specid_common={level},tower_http={level}");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting specid-proxy v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    if config_path.exists() {
        info!("Configuration: {}", config_path.display());
    } else {
        warn!("Config file {} not found, using compiled defaults", config_path.display());
    }
    info!(
        "Default classifier: {} (strict routes: {})",
        config.routing.default_classifier, config.routing.strict_routes
    );
    info!("Interim folder: {}", config.images.interim_folder.display());
    info!(
        "Taxonomy enrichment: {}, Record Cleaner: {}",
        if config.warehouse.is_some() { "enabled" } else { "disabled" },
        if config.cleaner.enable { "enabled" } else { "disabled" }
    );

    tokio::fs::create_dir_all(&config.images.interim_folder)
        .await
        .context("Failed to create interim folder")?;

    let deps = ServiceDeps::from_config(&config).context("Failed to initialize clients")?;
    let state = AppState::new(ClassificationService::new(&config, deps));
    let app = specid_proxy::build_router(state);

    let bind_addr = args.bind.unwrap_or_else(|| config.server.bind_addr.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    info!("Listening on http://{}", bind_addr);
    info!("Health check: http://{}/health", bind_addr);

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
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install signal handler: {}", e);
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
