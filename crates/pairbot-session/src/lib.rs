//! # pairbot-session
//!
//! Session lifecycle management for pairbot.
//!
//! This crate provides:
//! - The session registry (start/attach, state, list, delete)
//! - One supervisor task per connection driving the reconnect state machine
//! - Ordered credential persistence
//! - Pairing-code connections
//! - Exponential reconnect backoff
//!
//! ## Architecture
//!
//! This is Layer 3 in the architecture - it depends on pairbot-core,
//! pairbot-transport and pairbot-commands to manage chat session lifecycles.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
mod pairing;
pub mod registry;
mod supervisor;

// Re-export commonly used types
pub use backoff::ReconnectPolicy;
pub use registry::{SessionRegistry, SessionRegistryConfig};
