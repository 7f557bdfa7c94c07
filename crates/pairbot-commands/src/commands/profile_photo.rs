//! `dp`: save someone's profile photo to the downloads directory.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use pairbot_core::{Error, InboundMessage, Jid, Result};

use crate::command::{CommandContext, CommandHandler};
use crate::media::MediaFetcher;

/// Pick whose photo to fetch.
///
/// Order: first @-mention, then the digits of the first argument, then the
/// group participant who sent the message, then the chat itself.
pub fn resolve_target(message: &InboundMessage, args: &[&str]) -> Jid {
    if let Some(mentioned) = message.first_mention() {
        return mentioned.clone();
    }
    if let Some(jid) = args.first().and_then(|arg| Jid::from_phone(arg)) {
        return jid;
    }
    message
        .key
        .participant
        .clone()
        .unwrap_or_else(|| message.chat().clone())
}

/// Downloads a profile photo and reports the saved file name.
pub struct ProfilePhotoCommand {
    fetcher: Arc<dyn MediaFetcher>,
    downloads_dir: PathBuf,
}

impl ProfilePhotoCommand {
    /// Create the handler writing into `downloads_dir`.
    pub fn new(fetcher: Arc<dyn MediaFetcher>, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            downloads_dir: downloads_dir.into(),
        }
    }

    async fn save(&self, ctx: &CommandContext<'_>, target: &Jid) -> Result<String> {
        let url = ctx
            .connection
            .profile_picture_url(target)
            .await?
            .ok_or(Error::NoProfilePhoto)?;
        let data = self.fetcher.fetch(&url).await?;

        let file_name = format!("{}.jpg", target.file_stem());
        tokio::fs::create_dir_all(&self.downloads_dir).await?;
        tokio::fs::write(self.downloads_dir.join(&file_name), data).await?;
        Ok(file_name)
    }
}

#[async_trait]
impl CommandHandler for ProfilePhotoCommand {
    fn name(&self) -> &'static str {
        "dp"
    }

    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let target = resolve_target(ctx.message, ctx.args);
        match self.save(ctx, &target).await {
            Ok(file_name) => {
                info!("Saved profile photo: target={}, file={}", target, file_name);
                ctx.reply_text(format!("✅ DP saved: {file_name}")).await
            }
            Err(e) => {
                debug!("Profile photo fetch failed: target={}, error={}", target, e);
                ctx.reply_text(format!("❌ Could not fetch DP: {e}")).await
            }
        }
    }
}
