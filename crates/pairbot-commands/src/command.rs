//! Command parsing and the handler trait.

use std::sync::Arc;

use async_trait::async_trait;

use pairbot_core::{InboundMessage, OutboundMessage, Result};
use pairbot_transport::Connection;

/// A command line split into name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    /// Command name without the prefix (case sensitive)
    pub name: &'a str,
    /// Remaining whitespace-separated tokens
    pub args: Vec<&'a str>,
}

/// Parse a message body into a command.
///
/// Returns `None` unless the body starts with `prefix` (no leading
/// whitespace allowed).
///
/// # Example
/// ```
/// use pairbot_commands::parse_command;
///
/// let cmd = parse_command(".dp 15551234567", '.').unwrap();
/// assert_eq!(cmd.name, "dp");
/// assert_eq!(cmd.args, vec!["15551234567"]);
/// assert!(parse_command("hello", '.').is_none());
/// ```
pub fn parse_command(body: &str, prefix: char) -> Option<ParsedCommand<'_>> {
    if !body.starts_with(prefix) {
        return None;
    }
    let mut tokens = body.split_whitespace();
    let name = tokens.next()?.strip_prefix(prefix)?;
    Some(ParsedCommand {
        name,
        args: tokens.collect(),
    })
}

/// Everything a handler needs to answer one command.
pub struct CommandContext<'a> {
    /// Connection the message arrived on
    pub connection: &'a Arc<dyn Connection>,
    /// The triggering message
    pub message: &'a InboundMessage,
    /// Arguments after the command name
    pub args: &'a [&'a str],
}

impl CommandContext<'_> {
    /// Send a message back to the originating chat.
    pub async fn reply(&self, message: OutboundMessage) -> Result<()> {
        self.connection
            .send_message(self.message.chat(), message)
            .await?;
        Ok(())
    }

    /// Send a text reply to the originating chat.
    pub async fn reply_text(&self, text: impl Into<String> + Send) -> Result<()> {
        self.reply(OutboundMessage::text(text)).await
    }
}

/// Trait for command handlers.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Command name this handler answers to.
    fn name(&self) -> &'static str;

    /// Handle one invocation. Errors are logged by the dispatcher.
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<()>;

    /// Whether this handler is enabled.
    fn enabled(&self) -> bool {
        true
    }
}
