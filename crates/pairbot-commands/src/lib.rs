//! # pairbot-commands
//!
//! Command dispatcher for pairbot.
//!
//! This crate provides:
//! - Prefix command parsing (`.ping`, `.menu`, `.dp <target>`)
//! - The `CommandHandler` trait and the built-in handlers
//! - Auto-reactions to private messages
//! - HTTP media downloads for the menu image and profile photos
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on pairbot-core and
//! pairbot-transport and is driven by the session supervisor for every
//! inbound message batch.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod commands;
pub mod dispatcher;
pub mod media;

// Re-export commonly used types
pub use command::{parse_command, CommandContext, CommandHandler, ParsedCommand};
pub use commands::{
    menu_text, resolve_target, MenuCommand, PingCommand, ProfilePhotoCommand, MENU_FETCH_FAILED,
};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use media::{HttpMediaFetcher, MediaFetcher};
