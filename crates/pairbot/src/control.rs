//! Control façade.
//!
//! The four operations the HTTP layer exposes: pair, start, logout and list.
//! Input is validated here, before any effect on the registry.

use tracing::instrument;

use pairbot_core::{validate_phone, Error, Result, SessionId, SessionInfo};
use pairbot_session::SessionRegistry;

/// A pairing code issued for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCode {
    /// Code the user types into the phone app
    pub code: String,
    /// Session the credentials will be stored under
    pub session_id: SessionId,
}

/// Validating front for a [`SessionRegistry`].
#[derive(Clone)]
pub struct ControlFacade {
    registry: SessionRegistry,
}

impl ControlFacade {
    /// Wrap a registry.
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Request a pairing code for `phone`.
    ///
    /// The phone is reduced to its digits and must be 8–15 long. The session
    /// id defaults to those digits. The session is not started.
    #[instrument(skip_all)]
    pub async fn pair(
        &self,
        phone: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<PairingCode> {
        let digits = validate_phone(phone.unwrap_or_default())?;
        let session_id = match non_blank(session_id) {
            Some(id) => SessionId::new(id)?,
            None => SessionId::new(digits.clone())?,
        };

        let code = self.registry.pair(&digits, &session_id).await?;
        Ok(PairingCode { code, session_id })
    }

    /// Start a session, or attach to its live connection.
    #[instrument(skip_all)]
    pub async fn start(&self, session_id: Option<&str>) -> Result<SessionId> {
        let session_id = required_session_id(session_id)?;
        self.registry.start(&session_id).await?;
        Ok(session_id)
    }

    /// Log a session out and delete its stored credentials.
    #[instrument(skip_all)]
    pub async fn logout(&self, session_id: Option<&str>) -> Result<()> {
        let session_id = required_session_id(session_id)?;
        self.registry.delete(&session_id).await
    }

    /// Every session with stored credentials, with its current state.
    pub async fn list(&self) -> Result<Vec<SessionInfo>> {
        self.registry.sessions().await
    }
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn required_session_id(raw: Option<&str>) -> Result<SessionId> {
    match non_blank(raw) {
        Some(id) => SessionId::new(id),
        None => Err(Error::InvalidSessionId("sessionId required".to_string())),
    }
}
