//! Session registry for coordinating multiple chat sessions.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use pairbot_commands::Dispatcher;
use pairbot_core::{Result, ServerConfig, SessionId, SessionInfo, SessionState};
use pairbot_transport::{ConnectMode, ConnectOptions, Connection, Connector, CredentialStore};

use crate::backoff::ReconnectPolicy;
use crate::pairing::{self, PairingHandles};
use crate::supervisor;

/// Configuration for the session registry.
#[derive(Debug, Clone)]
pub struct SessionRegistryConfig {
    /// Pacing of automatic reconnects
    pub reconnect: ReconnectPolicy,

    /// Upper bound on the remote logout made while deleting a session
    pub logout_timeout: Duration,
}

impl Default for SessionRegistryConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            logout_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionRegistryConfig {
    /// Derive registry settings from the server configuration.
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            reconnect: ReconnectPolicy::from(&config.reconnect),
            logout_timeout: config.transport.logout_timeout(),
        }
    }
}

/// One live (or recently closed) session.
struct SessionRecord {
    state: SessionState,
    connection: Arc<dyn Connection>,
    /// Connection attempt that owns this record
    generation: Uuid,
    /// Consecutive reconnects since the session last reached `open`
    attempt: u32,
    updated_at: DateTime<Utc>,
}

struct RegistryInner {
    connector: Arc<dyn Connector>,
    store: Arc<dyn CredentialStore>,
    dispatcher: Arc<Dispatcher>,
    config: SessionRegistryConfig,
    records: RwLock<HashMap<SessionId, SessionRecord>>,
    start_guards: StdMutex<HashMap<SessionId, Arc<Mutex<()>>>>,
    pairing: PairingHandles,
}

/// Registry of named sessions: the single source of truth for which
/// sessions exist and what state they are in.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create a registry.
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn CredentialStore>,
        dispatcher: Arc<Dispatcher>,
        config: SessionRegistryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connector,
                store,
                dispatcher,
                config,
                records: RwLock::new(HashMap::new()),
                start_guards: StdMutex::new(HashMap::new()),
                pairing: PairingHandles::default(),
            }),
        }
    }

    /// Start a session, or attach to it if it already has a live connection.
    ///
    /// Concurrent calls for the same id open exactly one connection.
    #[instrument(skip(self, session_id), fields(session = %session_id))]
    pub async fn start(&self, session_id: &SessionId) -> Result<Arc<dyn Connection>> {
        match self.start_inner(session_id, None, 0).await? {
            Some(connection) => Ok(connection),
            // Only reconnects can be superseded
            None => Err(pairbot_core::Error::Other(format!(
                "session {session_id} was replaced while starting"
            ))),
        }
    }

    /// Current state of a session; `stopped` if it has no live record.
    pub async fn get_state(&self, session_id: &SessionId) -> SessionState {
        self.inner
            .records
            .read()
            .await
            .get(session_id)
            .map(|record| record.state)
            .unwrap_or(SessionState::Stopped)
    }

    /// When the session last changed state, if it has a record.
    pub async fn updated_at(&self, session_id: &SessionId) -> Option<DateTime<Utc>> {
        self.inner
            .records
            .read()
            .await
            .get(session_id)
            .map(|record| record.updated_at)
    }

    /// Every known session id (stored or live), sorted and deduplicated.
    pub async fn list(&self) -> Result<Vec<SessionId>> {
        let mut ids: BTreeSet<SessionId> = self.inner.store.list().await?.into_iter().collect();
        ids.extend(self.inner.records.read().await.keys().cloned());
        Ok(ids.into_iter().collect())
    }

    /// Every known session with its current state.
    pub async fn sessions(&self) -> Result<Vec<SessionInfo>> {
        let ids = self.list().await?;
        let records = self.inner.records.read().await;
        Ok(ids
            .into_iter()
            .map(|id| {
                let state = records
                    .get(&id)
                    .map(|record| record.state)
                    .unwrap_or(SessionState::Stopped);
                SessionInfo::new(id, state)
            })
            .collect())
    }

    /// Log a session out and erase it permanently.
    ///
    /// Remote logout is best effort and bounded by the logout timeout; local
    /// teardown and credential removal always happen.
    #[instrument(skip(self, session_id), fields(session = %session_id))]
    pub async fn delete(&self, session_id: &SessionId) -> Result<()> {
        let guard = self.start_guard(session_id);
        let result = {
            let _held = guard.lock().await;
            self.delete_locked(session_id).await
        };
        drop(guard);
        self.prune_start_guard(session_id);
        result
    }

    async fn delete_locked(&self, session_id: &SessionId) -> Result<()> {
        // Removing first turns any close event caused by the logout into a
        // stale event, so it cannot trigger a reconnect.
        let record = self.inner.records.write().await.remove(session_id);

        if let Some(record) = record {
            if record.state.is_live() {
                match tokio::time::timeout(
                    self.inner.config.logout_timeout,
                    record.connection.logout(),
                )
                .await
                {
                    Ok(Ok(())) => debug!("Remote logout succeeded"),
                    Ok(Err(e)) => debug!("Remote logout failed: {}", e),
                    Err(_) => debug!(
                        "Remote logout timed out after {:?}",
                        self.inner.config.logout_timeout
                    ),
                }
            }
            record.connection.terminate().await;
        }

        if let Some(pairing) = self.inner.pairing.take(session_id).await {
            pairing.terminate().await;
        }

        self.inner.store.delete(session_id).await?;
        info!("Session deleted: {}", session_id);
        Ok(())
    }

    /// Open a pairing connection and request a pairing code for `phone`.
    ///
    /// `phone` must already be normalized to digits. Credentials issued
    /// during pairing are persisted under `session_id`; the session itself is
    /// not started.
    #[instrument(skip(self, phone, session_id), fields(session = %session_id))]
    pub async fn pair(&self, phone: &str, session_id: &SessionId) -> Result<String> {
        let credentials = self.inner.store.load(session_id).await?;
        let established = self
            .inner
            .connector
            .connect(ConnectOptions {
                session_id: session_id.clone(),
                mode: ConnectMode::Pairing,
                credentials,
            })
            .await?;
        let connection = established.connection;

        let pairing_id = Uuid::new_v4();
        if let Some(previous) = self
            .inner
            .pairing
            .replace(session_id, pairing_id, Arc::clone(&connection))
            .await
        {
            previous.terminate().await;
        }
        tokio::spawn(pairing::run(
            self.clone(),
            session_id.clone(),
            pairing_id,
            established.events,
        ));

        match connection.request_pairing_code(phone).await {
            Ok(code) => {
                info!("Pairing code issued: session={}", session_id);
                Ok(code)
            }
            Err(e) => {
                warn!("Pairing code request failed: session={}, error={}", session_id, e);
                self.inner
                    .pairing
                    .remove_if_current(session_id, pairing_id)
                    .await;
                connection.terminate().await;
                Err(e)
            }
        }
    }

    /// Whether a pairing connection is open for `session_id`.
    pub async fn is_pairing(&self, session_id: &SessionId) -> bool {
        self.inner.pairing.contains(session_id).await
    }

    /// Terminate every connection without logging out. Credentials stay in
    /// place so sessions can be started again after a restart.
    pub async fn shutdown(&self) {
        let records: Vec<(SessionId, SessionRecord)> =
            self.inner.records.write().await.drain().collect();
        for (session_id, record) in records {
            debug!("Terminating session on shutdown: {}", session_id);
            record.connection.terminate().await;
        }
        for pairing in self.inner.pairing.drain().await {
            pairing.terminate().await;
        }
        info!("Session registry shut down");
    }

    /// Number of sessions with a record.
    pub async fn session_count(&self) -> usize {
        self.inner.records.read().await.len()
    }

    pub(crate) fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub(crate) fn pairing_handles(&self) -> &PairingHandles {
        &self.inner.pairing
    }

    /// Whether `generation` still owns the session's record.
    pub(crate) async fn is_current(&self, session_id: &SessionId, generation: Uuid) -> bool {
        self.inner
            .records
            .read()
            .await
            .get(session_id)
            .is_some_and(|record| record.generation == generation)
    }

    /// Move the record to `state` if `generation` still owns it.
    pub(crate) async fn transition(
        &self,
        session_id: &SessionId,
        generation: Uuid,
        state: SessionState,
    ) -> bool {
        let mut records = self.inner.records.write().await;
        match records.get_mut(session_id) {
            Some(record) if record.generation == generation => {
                if record.state != state {
                    debug!(
                        "Session state: session={}, {} -> {}",
                        session_id, record.state, state
                    );
                }
                record.state = state;
                record.updated_at = Utc::now();
                if state == SessionState::Connected {
                    record.attempt = 0;
                }
                true
            }
            _ => false,
        }
    }

    /// Re-establish a session after a recoverable close.
    ///
    /// Gives up as soon as the record is deleted or owned by a newer
    /// generation. Boxed so the supervisor can spawn it without making the
    /// start/supervise cycle an infinitely sized future.
    pub(crate) fn reconnect(&self, session_id: SessionId, generation: Uuid) -> BoxFuture<'static, ()> {
        let registry = self.clone();
        Box::pin(async move {
            let mut attempt = {
                let records = registry.inner.records.read().await;
                match records.get(&session_id) {
                    Some(record) if record.generation == generation => record.attempt,
                    _ => {
                        debug!("Reconnect abandoned before start: session={}", session_id);
                        return;
                    }
                }
            };

            loop {
                let delay = registry.inner.config.reconnect.delay_for_attempt(attempt);
                if !delay.is_zero() {
                    info!(
                        "Reconnecting in {:?}: session={}, attempt={}",
                        delay,
                        session_id,
                        attempt + 1
                    );
                    tokio::time::sleep(delay).await;
                }
                attempt = attempt.saturating_add(1);

                match registry
                    .start_inner(&session_id, Some(generation), attempt)
                    .await
                {
                    Ok(Some(_)) => {
                        info!("Reconnect opened: session={}, attempt={}", session_id, attempt);
                        return;
                    }
                    Ok(None) => {
                        debug!("Reconnect abandoned: session={}", session_id);
                        return;
                    }
                    Err(e) => {
                        error!(
                            "Reconnect failed: session={}, attempt={}, error={}",
                            session_id, attempt, e
                        );
                    }
                }
            }
        })
    }

    fn start_guard(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        let mut guards = self
            .inner
            .start_guards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(guards.entry(session_id.clone()).or_default())
    }

    /// Forget the session's start guard once no caller holds it. Guards are
    /// only cloned under the map lock.
    fn prune_start_guard(&self, session_id: &SessionId) {
        let mut guards = self
            .inner
            .start_guards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guards
            .get(session_id)
            .is_some_and(|guard| Arc::strong_count(guard) == 1)
        {
            guards.remove(session_id);
        }
    }

    /// Open a session connection unless one is live.
    ///
    /// With `expected` set (reconnects), only proceeds while that generation
    /// still owns the record; returns `Ok(None)` otherwise.
    async fn start_inner(
        &self,
        session_id: &SessionId,
        expected: Option<Uuid>,
        attempt: u32,
    ) -> Result<Option<Arc<dyn Connection>>> {
        let guard = self.start_guard(session_id);
        let result = {
            let _held = guard.lock().await;
            self.start_locked(session_id, expected, attempt).await
        };
        drop(guard);
        self.prune_start_guard(session_id);
        result
    }

    async fn start_locked(
        &self,
        session_id: &SessionId,
        expected: Option<Uuid>,
        attempt: u32,
    ) -> Result<Option<Arc<dyn Connection>>> {
        {
            let records = self.inner.records.read().await;
            match (records.get(session_id), expected) {
                (Some(record), Some(generation)) if record.generation != generation => {
                    return Ok(None)
                }
                (None, Some(_)) => return Ok(None),
                (Some(record), None) if record.state.is_live() => {
                    debug!("Attaching to live session: {}", session_id);
                    return Ok(Some(Arc::clone(&record.connection)));
                }
                _ => {}
            }
        }

        if let Some(pairing) = self.inner.pairing.take(session_id).await {
            debug!("Closing pairing connection before start: {}", session_id);
            pairing.terminate().await;
        }

        let credentials = self.inner.store.load(session_id).await?;
        let established = self
            .inner
            .connector
            .connect(ConnectOptions {
                session_id: session_id.clone(),
                mode: ConnectMode::Session,
                credentials,
            })
            .await?;

        let connection = established.connection;
        let generation = Uuid::new_v4();
        let previous = self.inner.records.write().await.insert(
            session_id.clone(),
            SessionRecord {
                state: SessionState::Connecting,
                connection: Arc::clone(&connection),
                generation,
                attempt,
                updated_at: Utc::now(),
            },
        );
        if let Some(previous) = previous {
            previous.connection.terminate().await;
        }

        tokio::spawn(supervisor::run(
            self.clone(),
            session_id.clone(),
            generation,
            Arc::clone(&connection),
            established.events,
        ));

        info!("Session connecting: {}", session_id);
        Ok(Some(connection))
    }
}

#[cfg(test)]
impl SessionRegistry {
    fn start_guard_count(&self) -> usize {
        self.inner
            .start_guards
            .lock()
            .map(|guards| guards.len())
            .unwrap_or(0)
    }
}
