//! pairbot library
//!
//! The control façade and HTTP layer of the pairbot server, plus the wiring
//! that turns a [`ServerConfig`] into a running registry.
//! The server binary is in main.rs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod control;
pub mod http;

use std::sync::Arc;

use pairbot_commands::{Dispatcher, HttpMediaFetcher};
use pairbot_core::ServerConfig;
use pairbot_session::{SessionRegistry, SessionRegistryConfig};
use pairbot_transport::{BridgeConnector, FileCredentialStore};

// Re-export commonly used types
pub use control::{ControlFacade, PairingCode};
pub use http::{router, AppState};

/// Build a registry backed by the protocol bridge and on-disk credentials.
pub fn build_registry(config: &ServerConfig) -> SessionRegistry {
    let connector = Arc::new(BridgeConnector::new(
        config.transport.bridge_url.clone(),
        config.transport.request_timeout(),
    ));
    let store = Arc::new(FileCredentialStore::new(config.storage.sessions_dir.clone()));
    let fetcher = Arc::new(HttpMediaFetcher::new(config.transport.request_timeout()));
    let dispatcher = Arc::new(Dispatcher::with_default_commands(
        config.bot.clone(),
        fetcher,
        config.storage.downloads_dir.clone(),
    ));

    SessionRegistry::new(
        connector,
        store,
        dispatcher,
        SessionRegistryConfig::from_server_config(config),
    )
}
