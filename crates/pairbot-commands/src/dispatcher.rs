//! Routes inbound messages to command handlers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use pairbot_core::{BotSettings, InboundMessage, OutboundMessage, Result, UpsertKind};
use pairbot_transport::Connection;

use crate::command::{parse_command, CommandContext, CommandHandler};
use crate::commands::{menu_message, MenuCommand, PingCommand, ProfilePhotoCommand};
use crate::media::MediaFetcher;

/// What the dispatcher did with one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Sent by this session's own account
    SelfSent,
    /// Body is not a command
    NotCommand,
    /// Command name with no enabled handler
    Unknown(String),
    /// Handler completed
    Handled(&'static str),
    /// Handler returned an error (already logged)
    Failed(&'static str),
}

/// Per-message command dispatcher.
pub struct Dispatcher {
    settings: BotSettings,
    fetcher: Arc<dyn MediaFetcher>,
    handlers: HashMap<&'static str, Arc<dyn CommandHandler>>,
}

impl Dispatcher {
    /// Create a dispatcher with no commands registered.
    pub fn new(settings: BotSettings, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            settings,
            fetcher,
            handlers: HashMap::new(),
        }
    }

    /// Create a dispatcher with `ping`, `menu` and `dp` registered.
    pub fn with_default_commands(
        settings: BotSettings,
        fetcher: Arc<dyn MediaFetcher>,
        downloads_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut dispatcher = Self::new(settings.clone(), Arc::clone(&fetcher));
        dispatcher.add_command(Arc::new(PingCommand::new()));
        dispatcher.add_command(Arc::new(MenuCommand::new(Arc::clone(&fetcher), settings)));
        dispatcher.add_command(Arc::new(ProfilePhotoCommand::new(fetcher, downloads_dir)));
        dispatcher
    }

    /// Register a handler. A later handler with the same name replaces the
    /// earlier one.
    pub fn add_command(&mut self, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    /// Names of the registered commands, sorted.
    pub fn command_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Bot settings in effect.
    pub fn settings(&self) -> &BotSettings {
        &self.settings
    }

    /// Menu image captioned with the menu text.
    pub async fn menu_message(&self) -> Result<OutboundMessage> {
        menu_message(self.fetcher.as_ref(), &self.settings).await
    }

    /// Handle a message batch. Only live (`notify`) batches are processed;
    /// history backfill yields no outcomes.
    pub async fn handle_upsert(
        &self,
        connection: &Arc<dyn Connection>,
        kind: UpsertKind,
        messages: &[InboundMessage],
    ) -> Vec<DispatchOutcome> {
        if kind != UpsertKind::Notify {
            debug!(
                "Skipping {:?} batch: session={}, messages={}",
                kind,
                connection.session_id(),
                messages.len()
            );
            return Vec::new();
        }

        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            outcomes.push(self.handle_message(connection, message).await);
        }
        outcomes
    }

    /// Handle a single live message.
    pub async fn handle_message(
        &self,
        connection: &Arc<dyn Connection>,
        message: &InboundMessage,
    ) -> DispatchOutcome {
        if message.key.from_me {
            return DispatchOutcome::SelfSent;
        }

        if !message.is_group() {
            if let Some(emoji) = self.settings.auto_react() {
                self.spawn_reaction(connection, message, emoji);
            }
        }

        let Some(command) = parse_command(message.text_body(), self.settings.command_prefix)
        else {
            return DispatchOutcome::NotCommand;
        };

        let Some(handler) = self
            .handlers
            .get(command.name)
            .filter(|handler| handler.enabled())
        else {
            debug!("Ignoring unknown command: {}", command.name);
            return DispatchOutcome::Unknown(command.name.to_string());
        };

        debug!(
            "Dispatching command: session={}, chat={}, command={}",
            connection.session_id(),
            message.chat(),
            handler.name()
        );

        let ctx = CommandContext {
            connection,
            message,
            args: &command.args,
        };
        match handler.handle(&ctx).await {
            Ok(()) => DispatchOutcome::Handled(handler.name()),
            Err(e) => {
                warn!(
                    "Command failed: session={}, command={}, error={}",
                    connection.session_id(),
                    handler.name(),
                    e
                );
                DispatchOutcome::Failed(handler.name())
            }
        }
    }

    fn spawn_reaction(
        &self,
        connection: &Arc<dyn Connection>,
        message: &InboundMessage,
        emoji: &str,
    ) {
        let connection = Arc::clone(connection);
        let chat = message.chat().clone();
        let reaction = OutboundMessage::Reaction {
            emoji: emoji.to_string(),
            key: message.key.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = connection.send_message(&chat, reaction).await {
                debug!("Auto-react failed: chat={}, error={}", chat, e);
            }
        });
    }
}
