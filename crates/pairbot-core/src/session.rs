//! Session types for chat session management.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum length of a session identifier.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Unique identifier for a chat session.
///
/// The identifier doubles as the name of the session's credential namespace
/// on disk, so it is restricted to `[A-Za-z0-9_.-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Parse and validate a session identifier.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidSessionId("sessionId required".to_string()));
        }
        if id.len() > MAX_SESSION_ID_LEN {
            return Err(Error::InvalidSessionId(format!(
                "sessionId longer than {MAX_SESSION_ID_LEN} characters"
            )));
        }
        if id == "." || id == ".." {
            return Err(Error::InvalidSessionId(format!("sessionId '{id}' is reserved")));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(Error::InvalidSessionId(format!(
                "sessionId contains invalid character {bad:?}"
            )));
        }
        Ok(Self(id))
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a chat session as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// A connection attempt is in progress
    Connecting,
    /// The connection is open and authenticated
    Connected,
    /// The connection dropped (a reconnect may be pending)
    Closed,
    /// No live connection exists for the session
    Stopped,
}

impl SessionState {
    /// Whether a session in this state still owns a usable connection handle.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }

    /// Lowercase name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
            SessionState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about a known session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier
    pub id: SessionId,
    /// Current state
    pub state: SessionState,
}

impl SessionInfo {
    /// Create new session info.
    pub fn new(id: SessionId, state: SessionState) -> Self {
        Self { id, state }
    }
}
