//! `ping`: liveness check.

use async_trait::async_trait;

use pairbot_core::Result;

use crate::command::{CommandContext, CommandHandler};

/// Replies `pong`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingCommand;

impl PingCommand {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandHandler for PingCommand {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<()> {
        ctx.reply_text("pong").await
    }
}
