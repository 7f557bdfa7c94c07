//! # pairbot-core
//!
//! Core types for pairbot.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other pairbot crates. It provides:
//!
//! - Session types (SessionId, SessionState, SessionInfo)
//! - Chat identities (Jid) and phone number normalization
//! - Inbound/outbound message types
//! - Configuration loading
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other pairbot crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod jid;
pub mod message;
pub mod session;

// Re-export commonly used types
pub use config::{
    BotSettings, ReconnectSettings, ServerConfig, ServerSettings, StorageSettings,
    TransportSettings,
};
pub use error::{Error, Result};
pub use jid::{normalize_phone, validate_phone, Jid, GROUP_SERVER, USER_SERVER};
pub use message::{
    ContextInfo, ExtendedText, InboundMessage, MediaCaption, MessageContent, MessageKey,
    OutboundMessage, Presence, UpsertKind,
};
pub use session::{SessionId, SessionInfo, SessionState};
