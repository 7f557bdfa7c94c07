//! `menu`: command overview with an image.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use pairbot_core::{BotSettings, OutboundMessage, Result};

use crate::command::{CommandContext, CommandHandler};
use crate::media::MediaFetcher;

/// Reply sent when the menu image cannot be downloaded.
pub const MENU_FETCH_FAILED: &str = "Menu image fetch failed. Please check MENU_IMAGE_URL.";

/// Menu text listing the commands.
pub fn menu_text(settings: &BotSettings) -> String {
    let p = settings.command_prefix;
    [
        format!("🧿 *{}*", settings.name),
        String::new(),
        "Commands:".to_string(),
        format!("• {p}menu — show this menu"),
        format!("• {p}ping — health check"),
        format!("• {p}dp @user | {p}dp <number> — save profile photo"),
        String::new(),
        "Auto: presence, reactions".to_string(),
    ]
    .join("\n")
}

/// Download the menu image and build the image message captioned with the
/// menu text.
pub async fn menu_message(
    fetcher: &dyn MediaFetcher,
    settings: &BotSettings,
) -> Result<OutboundMessage> {
    let data = fetcher.fetch(&settings.menu_image_url).await?;
    Ok(OutboundMessage::Image {
        data,
        caption: Some(menu_text(settings)),
    })
}

/// Replies with the menu image, or a plain error text if the image is
/// unavailable.
pub struct MenuCommand {
    fetcher: Arc<dyn MediaFetcher>,
    settings: BotSettings,
}

impl MenuCommand {
    /// Create the handler.
    pub fn new(fetcher: Arc<dyn MediaFetcher>, settings: BotSettings) -> Self {
        Self { fetcher, settings }
    }
}

#[async_trait]
impl CommandHandler for MenuCommand {
    fn name(&self) -> &'static str {
        "menu"
    }

    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<()> {
        match menu_message(self.fetcher.as_ref(), &self.settings).await {
            Ok(message) => ctx.reply(message).await,
            Err(e) => {
                debug!("Menu image fetch failed: {}", e);
                ctx.reply_text(MENU_FETCH_FAILED).await
            }
        }
    }
}
