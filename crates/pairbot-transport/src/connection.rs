//! Connection handle and event types.
//!
//! A [`Connector`] opens one [`Connection`] per attempt and hands back the
//! receiving half of that connection's event channel. Events arrive strictly
//! in the order the remote produced them; the channel closes once the
//! connection is terminated or the transport goes away.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use pairbot_core::{InboundMessage, Jid, OutboundMessage, Presence, Result, SessionId, UpsertKind};

use crate::credentials::{CredentialUpdate, Credentials};

/// Buffer size of each connection's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why a connection closed, derived from the remote status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// 401: the account was logged out; credentials are no longer valid
    LoggedOut,
    /// 403: access forbidden
    Forbidden,
    /// 408: connection lost or timed out
    ConnectionLost,
    /// 411: multi-device mismatch
    MultideviceMismatch,
    /// 428: connection closed by the remote
    ConnectionClosed,
    /// 440: another client replaced this connection
    ConnectionReplaced,
    /// 500: bad session
    BadSession,
    /// 503: service unavailable
    UnavailableService,
    /// 515: the remote asked for a restart
    RestartRequired,
    /// Missing or unrecognized status
    Unknown,
}

impl DisconnectReason {
    /// Map a status code to a reason.
    pub fn from_status(code: u16) -> Self {
        match code {
            401 => DisconnectReason::LoggedOut,
            403 => DisconnectReason::Forbidden,
            408 => DisconnectReason::ConnectionLost,
            411 => DisconnectReason::MultideviceMismatch,
            428 => DisconnectReason::ConnectionClosed,
            440 => DisconnectReason::ConnectionReplaced,
            500 => DisconnectReason::BadSession,
            503 => DisconnectReason::UnavailableService,
            515 => DisconnectReason::RestartRequired,
            _ => DisconnectReason::Unknown,
        }
    }

    /// Status code for this reason, if it has one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DisconnectReason::LoggedOut => Some(401),
            DisconnectReason::Forbidden => Some(403),
            DisconnectReason::ConnectionLost => Some(408),
            DisconnectReason::MultideviceMismatch => Some(411),
            DisconnectReason::ConnectionClosed => Some(428),
            DisconnectReason::ConnectionReplaced => Some(440),
            DisconnectReason::BadSession => Some(500),
            DisconnectReason::UnavailableService => Some(503),
            DisconnectReason::RestartRequired => Some(515),
            DisconnectReason::Unknown => None,
        }
    }

    /// Only an explicit logout ends a session for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }
}

/// Event emitted by a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// The transport started (re)connecting
    Connecting,
    /// The connection is open and authenticated
    Open,
    /// The connection closed
    Close {
        /// Remote status code, when one was reported
        #[serde(default)]
        status_code: Option<u16>,
        /// Human-readable failure description
        #[serde(default)]
        error: Option<String>,
    },
    /// Credential material changed and must be persisted
    CredsUpdate {
        /// Keys to write (`null` removes a key)
        update: CredentialUpdate,
    },
    /// A batch of messages
    Messages {
        /// Live notification or history backfill
        kind: UpsertKind,
        /// Messages in the batch
        messages: Vec<InboundMessage>,
    },
}

impl ConnectionEvent {
    /// Build a close event for a reason.
    pub fn close(reason: DisconnectReason, error: Option<String>) -> Self {
        ConnectionEvent::Close {
            status_code: reason.status_code(),
            error,
        }
    }

    /// Classified close reason, for `Close` events.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self {
            ConnectionEvent::Close { status_code, .. } => Some(
                status_code
                    .map(DisconnectReason::from_status)
                    .unwrap_or(DisconnectReason::Unknown),
            ),
            _ => None,
        }
    }

    /// Short event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connecting => "connecting",
            ConnectionEvent::Open => "open",
            ConnectionEvent::Close { .. } => "close",
            ConnectionEvent::CredsUpdate { .. } => "creds.update",
            ConnectionEvent::Messages { .. } => "messages.upsert",
        }
    }
}

/// What a connection is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    /// Regular long-lived session
    Session,
    /// Short-lived connection used to obtain a pairing code
    Pairing,
}

/// Parameters for opening a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Session the connection belongs to
    pub session_id: SessionId,
    /// Session or pairing mode
    pub mode: ConnectMode,
    /// Credential material loaded from the store
    pub credentials: Credentials,
}

/// A live connection handle.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Session this connection belongs to.
    fn session_id(&self) -> &SessionId;

    /// Send a message; returns the remote message id.
    async fn send_message(&self, to: &Jid, message: OutboundMessage) -> Result<String>;

    /// Announce presence.
    async fn send_presence(&self, presence: Presence) -> Result<()>;

    /// Whether [`Connection::update_profile_status`] does anything.
    fn supports_profile_status(&self) -> bool {
        false
    }

    /// Update the account's profile status text. No-op unless supported.
    async fn update_profile_status(&self, _text: &str) -> Result<()> {
        Ok(())
    }

    /// Resolve the profile photo URL of an identity; `None` if it has none.
    async fn profile_picture_url(&self, jid: &Jid) -> Result<Option<String>>;

    /// Ask the remote service for a pairing code for a phone number.
    async fn request_pairing_code(&self, phone: &str) -> Result<String>;

    /// Invalidate the remote authentication of this session.
    async fn logout(&self) -> Result<()>;

    /// Tear the connection down locally. Idempotent.
    async fn terminate(&self);
}

/// A freshly opened connection together with its event stream.
pub struct EstablishedConnection {
    /// The handle
    pub connection: Arc<dyn Connection>,
    /// Ordered events for this handle
    pub events: mpsc::Receiver<ConnectionEvent>,
}

/// Factory for connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection. Returns once the handle exists; the handshake itself
    /// is reported through the event stream.
    async fn connect(&self, options: ConnectOptions) -> Result<EstablishedConnection>;
}
