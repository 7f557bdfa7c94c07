//! # pairbot
//!
//! Multi-session chat bot server.
//!
//! ## Overview
//!
//! This server provides:
//! - Pairing-code login for new sessions
//! - Session start, logout and listing over an HTTP JSON API
//! - Automatic reconnection of dropped sessions
//! - Chat commands (`ping`, `menu`, `dp`) on every connected session
//! - A static dashboard
//!
//! ## Architecture
//!
//! This is the top layer - the server binary that ties together:
//! - pairbot-core: Core types and configuration
//! - pairbot-transport: Protocol bridge and credential storage
//! - pairbot-commands: Command dispatch
//! - pairbot-session: Session lifecycle

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context};
use pairbot::{build_registry, router, AppState, ControlFacade};
use pairbot_core::ServerConfig;

const USAGE: &str = "Usage: pairbot [--config <path>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path: Option<PathBuf> = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(());
            }
            other => bail!("Unknown argument '{other}'\n{USAGE}"),
        }
    }

    let mut config = match &config_path {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    config.apply_process_env()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .init();

    tracing::info!("pairbot v{} starting...", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.storage.sessions_dir)
        .await
        .context("Failed to create sessions directory")?;
    tokio::fs::create_dir_all(&config.storage.downloads_dir)
        .await
        .context("Failed to create downloads directory")?;

    let registry = build_registry(&config);
    let state = AppState::new(ControlFacade::new(registry.clone()));
    let app = router(state, &config.server.public_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!(
        "Server running on http://{} (bridge: {})",
        addr,
        config.transport.bridge_url
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            tracing::error!("Server error: {}", e);
            e
        })?;

    registry.shutdown().await;
    tracing::info!("pairbot shutting down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
