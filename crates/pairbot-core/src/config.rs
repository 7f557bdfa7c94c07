//! Configuration types for pairbot.
//!
//! Configuration is read from an optional YAML file and then overlaid with
//! environment variables, so a bare deployment can be driven entirely by
//! `PORT`, `AUTO_REACT`, `MENU_IMAGE_URL` and friends.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::jid::normalize_phone;
use crate::Error;

/// Default menu image.
pub const DEFAULT_MENU_IMAGE_URL: &str = "https://i.postimg.cc/B6w4rV6T/20250611-123112.png";

/// Server configuration loaded from YAML file and environment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server settings
    pub server: ServerSettings,
    /// On-disk locations
    pub storage: StorageSettings,
    /// Bot behaviour settings
    pub bot: BotSettings,
    /// Protocol bridge settings
    pub transport: TransportSettings,
    /// Reconnect pacing
    pub reconnect: ReconnectSettings,
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the process environment.
    pub fn apply_process_env(&mut self) -> crate::Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from an environment lookup function.
    ///
    /// `AUTO_REACT` set to an empty string disables auto-reactions; an unset
    /// variable leaves the configured value alone.
    pub fn apply_env<F>(&mut self, lookup: F) -> crate::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("PORT is not a valid port: {port}")))?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Some(dir) = lookup("PUBLIC_DIR") {
            self.server.public_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SESSIONS_DIR") {
            self.storage.sessions_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("DOWNLOADS_DIR") {
            self.storage.downloads_dir = PathBuf::from(dir);
        }
        // Blank keeps the configured status text
        if let Some(text) = lookup("AUTO_STATUS_TEXT").filter(|t| !t.trim().is_empty()) {
            self.bot.auto_status_text = text;
        }
        if let Some(emoji) = lookup("AUTO_REACT") {
            self.bot.auto_react = emoji;
        }
        if let Some(url) = lookup("MENU_IMAGE_URL") {
            self.bot.menu_image_url = url;
        }
        if let Some(owner) = lookup("OWNER_NUMBER") {
            let digits = normalize_phone(&owner);
            self.bot.owner_number = (!digits.is_empty()).then_some(digits);
        }
        if let Some(url) = lookup("BRIDGE_URL") {
            self.transport.bridge_url = url;
        }
        self.validate()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("server.port must be > 0".to_string()));
        }

        if self.bot.command_prefix.is_whitespace() {
            return Err(Error::Config(
                "bot.command_prefix cannot be whitespace".to_string(),
            ));
        }

        if self.transport.request_timeout_ms == 0 || self.transport.logout_timeout_ms == 0 {
            return Err(Error::Config("transport timeouts must be > 0".to_string()));
        }

        if self.reconnect.multiplier < 1.0 {
            return Err(Error::Config(
                "reconnect.multiplier must be >= 1.0".to_string(),
            ));
        }

        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(Error::Config(
                "reconnect.max_delay_ms must be >= reconnect.initial_delay_ms".to_string(),
            ));
        }

        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listening port
    pub port: u16,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Directory holding the static dashboard
    pub public_dir: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 3000,
            log_level: "info".to_string(),
            public_dir: PathBuf::from("public"),
        }
    }
}

/// On-disk locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// One credential namespace per session lives under this directory
    pub sessions_dir: PathBuf,
    /// Profile photos fetched by the `dp` command are written here
    pub downloads_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("sessions"),
            downloads_dir: PathBuf::from("downloads"),
        }
    }
}

/// Bot behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// Display name used in the menu header
    pub name: String,
    /// Profile status text set on connect (empty in a config file = leave
    /// unchanged; a blank environment value keeps this setting)
    pub auto_status_text: String,
    /// Emoji reacted to private messages with (empty = disabled)
    pub auto_react: String,
    /// Image attached to the menu
    pub menu_image_url: String,
    /// Digits-only number notified with the menu on connect
    pub owner_number: Option<String>,
    /// Character that starts a command
    pub command_prefix: char,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            name: "Xdemon Bug Bot".to_string(),
            auto_status_text: "Xdemon Bug Bot online ⚡".to_string(),
            auto_react: "👍".to_string(),
            menu_image_url: DEFAULT_MENU_IMAGE_URL.to_string(),
            owner_number: None,
            command_prefix: '.',
        }
    }
}

impl BotSettings {
    /// Reaction emoji, or `None` when auto-react is disabled.
    pub fn auto_react(&self) -> Option<&str> {
        let emoji = self.auto_react.trim();
        (!emoji.is_empty()).then_some(emoji)
    }

    /// Status text, or `None` when no status update is wanted.
    pub fn auto_status_text(&self) -> Option<&str> {
        let text = self.auto_status_text.trim();
        (!text.is_empty()).then_some(text)
    }
}

/// Protocol bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// WebSocket URL of the protocol bridge
    pub bridge_url: String,
    /// Upper bound on a single remote call
    pub request_timeout_ms: u64,
    /// Upper bound on the logout call made while deleting a session
    pub logout_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            bridge_url: "ws://127.0.0.1:8787".to_string(),
            request_timeout_ms: 30_000,
            logout_timeout_ms: 5_000,
        }
    }
}

impl TransportSettings {
    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Logout timeout as a duration.
    pub fn logout_timeout(&self) -> Duration {
        Duration::from_millis(self.logout_timeout_ms)
    }
}

/// Reconnect pacing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Delay before the second consecutive reconnect attempt
    pub initial_delay_ms: u64,
    /// Cap on the delay between attempts
    pub max_delay_ms: u64,
    /// Growth factor between consecutive attempts
    pub multiplier: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}
