//! Built-in command handlers.

pub mod menu;
pub mod ping;
pub mod profile_photo;

pub use menu::{menu_message, menu_text, MenuCommand, MENU_FETCH_FAILED};
pub use ping::PingCommand;
pub use profile_photo::{resolve_target, ProfilePhotoCommand};
