//! # pairbot-transport
//!
//! Connection layer for pairbot.
//!
//! This crate provides:
//! - The `Connector` / `Connection` seam the session layer drives
//! - Ordered per-connection event channels
//! - Durable per-session credential storage
//! - A WebSocket client for the external protocol bridge
//! - Scriptable in-memory doubles for tests
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on pairbot-core and hides
//! the wire protocol behind traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod connection;
pub mod credentials;
pub mod testing;

// Re-export commonly used types
pub use bridge::BridgeConnector;
pub use connection::{
    ConnectMode, ConnectOptions, Connection, ConnectionEvent, Connector, DisconnectReason,
    EstablishedConnection, EVENT_CHANNEL_CAPACITY,
};
pub use credentials::{CredentialStore, CredentialUpdate, Credentials, FileCredentialStore};
