//! Short-lived pairing connections.
//!
//! A pairing connection exists only to obtain a pairing code and to persist
//! the credentials the remote issues once the user enters that code. It is
//! never registered as a started session; starting or deleting the session
//! tears it down.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pairbot_core::SessionId;
use pairbot_transport::{Connection, ConnectionEvent};

use crate::registry::SessionRegistry;

struct PairingHandle {
    pairing_id: Uuid,
    connection: Arc<dyn Connection>,
}

/// Open pairing connections by session id.
#[derive(Default)]
pub(crate) struct PairingHandles {
    handles: Mutex<HashMap<SessionId, PairingHandle>>,
}

impl PairingHandles {
    /// Track a new pairing connection; returns the one it replaces.
    pub(crate) async fn replace(
        &self,
        session_id: &SessionId,
        pairing_id: Uuid,
        connection: Arc<dyn Connection>,
    ) -> Option<Arc<dyn Connection>> {
        self.handles
            .lock()
            .await
            .insert(
                session_id.clone(),
                PairingHandle {
                    pairing_id,
                    connection,
                },
            )
            .map(|old| old.connection)
    }

    /// Stop tracking a session's pairing connection and return it.
    pub(crate) async fn take(&self, session_id: &SessionId) -> Option<Arc<dyn Connection>> {
        self.handles
            .lock()
            .await
            .remove(session_id)
            .map(|handle| handle.connection)
    }

    /// Stop tracking `pairing_id` if it is still the current one.
    pub(crate) async fn remove_if_current(&self, session_id: &SessionId, pairing_id: Uuid) {
        let mut handles = self.handles.lock().await;
        if handles
            .get(session_id)
            .is_some_and(|handle| handle.pairing_id == pairing_id)
        {
            handles.remove(session_id);
        }
    }

    /// Whether a pairing connection is open for `session_id`.
    pub(crate) async fn contains(&self, session_id: &SessionId) -> bool {
        self.handles.lock().await.contains_key(session_id)
    }

    /// Remove and return every pairing connection.
    pub(crate) async fn drain(&self) -> Vec<Arc<dyn Connection>> {
        self.handles
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle.connection)
            .collect()
    }
}

/// Persist credential updates of a pairing connection, in order, until its
/// event stream ends.
pub(crate) async fn run(
    registry: SessionRegistry,
    session_id: SessionId,
    pairing_id: Uuid,
    mut events: mpsc::Receiver<ConnectionEvent>,
) {
    debug!("Pairing task started: session={}", session_id);

    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::CredsUpdate { update } => {
                if let Err(e) = registry.store().apply(&session_id, &update).await {
                    warn!(
                        "Failed to persist pairing credentials: session={}, error={}",
                        session_id, e
                    );
                }
            }
            ConnectionEvent::Open => {
                info!("Pairing connection open: session={}", session_id);
            }
            ref close @ ConnectionEvent::Close { .. } => {
                info!(
                    "Pairing connection closed: session={}, reason={:?}",
                    session_id,
                    close.disconnect_reason()
                );
            }
            other => {
                debug!(
                    "Ignoring pairing event: session={}, event={}",
                    session_id,
                    other.name()
                );
            }
        }
    }

    registry
        .pairing_handles()
        .remove_if_current(&session_id, pairing_id)
        .await;
    debug!("Pairing task finished: session={}", session_id);
}
