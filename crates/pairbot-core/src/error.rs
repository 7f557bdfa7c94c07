//! Error types for pairbot.

use thiserror::Error;

/// Main error type for pairbot operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Phone number missing or malformed
    #[error("{0}")]
    InvalidPhone(String),

    /// Session identifier missing or malformed
    #[error("{0}")]
    InvalidSessionId(String),

    /// Chat identity could not be parsed
    #[error("Invalid identity: {0}")]
    InvalidJid(String),

    /// Transport-level failure (connect, send, call)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection handle is gone or was never opened
    #[error("Connection closed")]
    ConnectionClosed,

    /// A remote call did not complete in time
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Credential store failure
    #[error("Credential store error: {0}")]
    Credentials(String),

    /// Media download failure
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Target identity has no profile photo
    #[error("No profile photo")]
    NoProfilePhoto,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error was caused by bad caller input rather than a failure
    /// while carrying out the request.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidPhone(_)
                | Error::InvalidSessionId(_)
                | Error::InvalidJid(_)
                | Error::InvalidInput(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
