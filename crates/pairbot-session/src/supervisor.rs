//! Per-connection event loop.
//!
//! Exactly one supervisor task consumes each session connection's events, in
//! arrival order:
//!
//! ```text
//! connecting ──open──▶ connected ──close(other)──▶ closed ──reconnect──▶ connecting
//!      │                   │
//!      └───close(401)──────┴──────────────────────▶ closed (terminal)
//! ```
//!
//! Side effects of `open` run as detached best-effort tasks so a slow remote
//! never holds up credential persistence or message handling.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pairbot_core::{Jid, Presence, SessionId, SessionState};
use pairbot_transport::{Connection, ConnectionEvent, DisconnectReason};

use crate::registry::SessionRegistry;

/// Consume a session connection's events until the stream ends or a newer
/// connection takes over the session.
pub(crate) async fn run(
    registry: SessionRegistry,
    session_id: SessionId,
    generation: Uuid,
    connection: Arc<dyn Connection>,
    mut events: mpsc::Receiver<ConnectionEvent>,
) {
    debug!("Supervisor started: session={}, generation={}", session_id, generation);

    while let Some(event) = events.recv().await {
        if !registry.is_current(&session_id, generation).await {
            debug!(
                "Dropping stale event: session={}, event={}",
                session_id,
                event.name()
            );
            break;
        }

        match event {
            ConnectionEvent::Connecting => {
                registry
                    .transition(&session_id, generation, SessionState::Connecting)
                    .await;
            }
            ConnectionEvent::Open => {
                if registry
                    .transition(&session_id, generation, SessionState::Connected)
                    .await
                {
                    info!("Session connected: {}", session_id);
                    spawn_open_tasks(&registry, &session_id, &connection);
                }
            }
            ref close @ ConnectionEvent::Close { .. } => {
                let reason = close.disconnect_reason().unwrap_or(DisconnectReason::Unknown);
                if !registry
                    .transition(&session_id, generation, SessionState::Closed)
                    .await
                {
                    continue;
                }
                if let ConnectionEvent::Close {
                    error: Some(error), ..
                } = close
                {
                    debug!("Close detail: session={}, error={}", session_id, error);
                }

                if reason.is_terminal() {
                    warn!(
                        "Session logged out, not reconnecting: session={}, reason={:?}",
                        session_id, reason
                    );
                    connection.terminate().await;
                } else {
                    warn!(
                        "Session closed, reconnecting: session={}, reason={:?}",
                        session_id, reason
                    );
                    tokio::spawn(registry.reconnect(session_id.clone(), generation));
                }
            }
            ConnectionEvent::CredsUpdate { update } => {
                if let Err(e) = registry.store().apply(&session_id, &update).await {
                    warn!(
                        "Failed to persist credentials: session={}, error={}",
                        session_id, e
                    );
                }
            }
            ConnectionEvent::Messages { kind, messages } => {
                registry
                    .dispatcher()
                    .handle_upsert(&connection, kind, &messages)
                    .await;
            }
        }
    }

    debug!("Supervisor finished: session={}, generation={}", session_id, generation);
}

/// Presence, profile status and owner notification after `open`.
fn spawn_open_tasks(
    registry: &SessionRegistry,
    session_id: &SessionId,
    connection: &Arc<dyn Connection>,
) {
    let settings = registry.dispatcher().settings();

    let conn = Arc::clone(connection);
    let id = session_id.clone();
    tokio::spawn(async move {
        if let Err(e) = conn.send_presence(Presence::Available).await {
            debug!("Presence update failed: session={}, error={}", id, e);
        }
    });

    if let Some(text) = settings.auto_status_text() {
        if connection.supports_profile_status() {
            let conn = Arc::clone(connection);
            let id = session_id.clone();
            let text = text.to_string();
            tokio::spawn(async move {
                if let Err(e) = conn.update_profile_status(&text).await {
                    debug!("Profile status update failed: session={}, error={}", id, e);
                }
            });
        }
    }

    if let Some(owner) = settings.owner_number.as_deref().and_then(Jid::from_phone) {
        let conn = Arc::clone(connection);
        let dispatcher = Arc::clone(registry.dispatcher());
        let id = session_id.clone();
        tokio::spawn(async move {
            let sent = match dispatcher.menu_message().await {
                Ok(menu) => conn.send_message(&owner, menu).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                debug!("Owner notification failed: session={}, error={}", id, e);
            }
        });
    }
}
