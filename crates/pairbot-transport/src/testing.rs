//! In-memory connector, connection and credential store for tests.
//!
//! [`MockConnector`] hands out [`MockConnection`]s whose event streams are
//! driven by the test through [`MockConnection::emit`]. Everything a
//! connection is asked to do is recorded for later assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use pairbot_core::{Error, Jid, OutboundMessage, Presence, Result, SessionId};

use crate::connection::{
    ConnectMode, ConnectOptions, Connection, ConnectionEvent, Connector, EstablishedConnection,
    EVENT_CHANNEL_CAPACITY,
};
use crate::credentials::{CredentialStore, CredentialUpdate, Credentials};

/// How long the `wait_for_*` helpers wait before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// How a mock connection answers `logout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogoutBehavior {
    /// Succeed immediately
    #[default]
    Succeed,
    /// Fail immediately
    Fail,
    /// Never complete
    Hang,
}

/// Behaviour shared by every connection a [`MockConnector`] creates.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Profile photo URLs by identity; missing identities have no photo
    pub profile_pictures: HashMap<Jid, String>,
    /// Logout outcome
    pub logout: LogoutBehavior,
    /// Whether profile status updates are supported
    pub profile_status: bool,
    /// Code returned by `request_pairing_code`
    pub pairing_code: String,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            profile_pictures: HashMap::new(),
            logout: LogoutBehavior::Succeed,
            profile_status: false,
            pairing_code: "ABCD-1234".to_string(),
        }
    }
}

/// Re-check `check` on every change notification until it holds or
/// [`WAIT_TIMEOUT`] elapses.
async fn wait_until<F: FnMut() -> bool>(notify: &Notify, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        let notified = notify.notified();
        if check() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return false;
        }
        // Short naps cover changes made from inside a held lock
        let nap = tokio::time::sleep(remaining.min(Duration::from_millis(20)));
        tokio::select! {
            _ = notified => {}
            _ = nap => {}
        }
    }
}

#[derive(Default)]
struct ConnectorState {
    connects: Vec<ConnectOptions>,
    connections: Vec<Arc<MockConnection>>,
    fail_next: usize,
}

/// Connector that creates scriptable [`MockConnection`]s.
#[derive(Default)]
pub struct MockConnector {
    state: Mutex<ConnectorState>,
    behavior: Mutex<MockBehavior>,
    changed: Notify,
}

impl MockConnector {
    /// Create a connector with default behaviour.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector with the given behaviour.
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            ..Self::default()
        }
    }

    /// Replace the behaviour used for connections created from now on.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        if let Ok(mut current) = self.behavior.lock() {
            *current = behavior;
        }
    }

    /// Make the next `count` connect calls fail.
    pub fn fail_next_connects(&self, count: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next = count;
        }
    }

    /// Number of connect calls made, including failed ones.
    pub fn connect_count(&self) -> usize {
        self.state.lock().map(|s| s.connects.len()).unwrap_or(0)
    }

    /// Options passed to every connect call, in order.
    pub fn connect_options(&self) -> Vec<ConnectOptions> {
        self.state
            .lock()
            .map(|s| s.connects.clone())
            .unwrap_or_default()
    }

    /// Every connection created, in order.
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.state
            .lock()
            .map(|s| s.connections.clone())
            .unwrap_or_default()
    }

    /// Connections created for one session and mode, in order.
    pub fn connections_for(&self, session_id: &SessionId, mode: ConnectMode) -> Vec<Arc<MockConnection>> {
        self.connections()
            .into_iter()
            .filter(|c| c.session_id() == session_id && c.mode() == mode)
            .collect()
    }

    /// The most recent connection, if any.
    pub fn last_connection(&self) -> Option<Arc<MockConnection>> {
        self.connections().last().cloned()
    }

    /// Wait until at least `count` connections exist; returns them all.
    pub async fn wait_for_connections(&self, count: usize) -> Vec<Arc<MockConnection>> {
        wait_until(&self.changed, || self.connections().len() >= count).await;
        self.connections()
    }

    /// Wait until at least `count` connect calls were made.
    pub async fn wait_for_connect_calls(&self, count: usize) -> bool {
        wait_until(&self.changed, || self.connect_count() >= count).await
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, options: ConnectOptions) -> Result<EstablishedConnection> {
        let behavior = self
            .behavior
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default();

        let outcome = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| Error::Other("mock connector poisoned".to_string()))?;
            state.connects.push(options.clone());
            if state.fail_next > 0 {
                state.fail_next -= 1;
                Err(Error::Transport("mock connect failure".to_string()))
            } else {
                let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
                let connection = Arc::new(MockConnection::new(
                    options.session_id.clone(),
                    options.mode,
                    options.credentials.clone(),
                    behavior,
                    tx,
                ));
                state.connections.push(Arc::clone(&connection));
                Ok(EstablishedConnection {
                    connection,
                    events: rx,
                })
            }
        };
        self.changed.notify_waiters();
        outcome
    }
}

#[derive(Default)]
struct ConnectionLog {
    sent: Vec<(Jid, OutboundMessage)>,
    presence: Vec<Presence>,
    status_updates: Vec<String>,
    pairing_requests: Vec<String>,
    logout_calls: usize,
}

/// Scriptable connection handle.
pub struct MockConnection {
    session_id: SessionId,
    mode: ConnectMode,
    credentials: Credentials,
    behavior: MockBehavior,
    events: Mutex<Option<mpsc::Sender<ConnectionEvent>>>,
    log: Mutex<ConnectionLog>,
    terminated: AtomicBool,
    terminate_calls: AtomicUsize,
    changed: Arc<Notify>,
}

impl MockConnection {
    fn new(
        session_id: SessionId,
        mode: ConnectMode,
        credentials: Credentials,
        behavior: MockBehavior,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            session_id,
            mode,
            credentials,
            behavior,
            events: Mutex::new(Some(events)),
            log: Mutex::new(ConnectionLog::default()),
            terminated: AtomicBool::new(false),
            terminate_calls: AtomicUsize::new(0),
            changed: Arc::new(Notify::new()),
        }
    }

    fn record<F: FnOnce(&mut ConnectionLog)>(&self, f: F) {
        if let Ok(mut log) = self.log.lock() {
            f(&mut log);
        }
        self.changed.notify_waiters();
    }

    fn read<T, F: FnOnce(&ConnectionLog) -> T>(&self, f: F) -> Option<T> {
        self.log.lock().ok().map(|log| f(&log))
    }

    /// Mode the connection was opened in.
    pub fn mode(&self) -> ConnectMode {
        self.mode
    }

    /// Credentials the connection was opened with.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Push an event into the connection's stream. Returns false once the
    /// connection was terminated or nobody listens any more.
    pub async fn emit(&self, event: ConnectionEvent) -> bool {
        let sender = self.events.lock().ok().and_then(|s| s.clone());
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Messages sent, in order.
    pub fn sent(&self) -> Vec<(Jid, OutboundMessage)> {
        self.read(|log| log.sent.clone()).unwrap_or_default()
    }

    /// Text bodies sent, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|(_, m)| m.as_text().map(str::to_string))
            .collect()
    }

    /// Presence updates announced, in order.
    pub fn presence(&self) -> Vec<Presence> {
        self.read(|log| log.presence.clone()).unwrap_or_default()
    }

    /// Profile status updates, in order.
    pub fn status_updates(&self) -> Vec<String> {
        self.read(|log| log.status_updates.clone())
            .unwrap_or_default()
    }

    /// Phone numbers pairing codes were requested for.
    pub fn pairing_requests(&self) -> Vec<String> {
        self.read(|log| log.pairing_requests.clone())
            .unwrap_or_default()
    }

    /// Number of logout calls.
    pub fn logout_calls(&self) -> usize {
        self.read(|log| log.logout_calls).unwrap_or(0)
    }

    /// Whether `terminate` was called.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Number of `terminate` calls.
    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` messages were sent; returns them all.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<(Jid, OutboundMessage)> {
        wait_until(&self.changed, || self.sent().len() >= count).await;
        self.sent()
    }

    /// Wait until at least `count` presence updates were announced.
    pub async fn wait_for_presence(&self, count: usize) -> Vec<Presence> {
        wait_until(&self.changed, || self.presence().len() >= count).await;
        self.presence()
    }

    /// Wait until the connection was terminated.
    pub async fn wait_for_terminated(&self) -> bool {
        wait_until(&self.changed, || self.is_terminated()).await
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn send_message(&self, to: &Jid, message: OutboundMessage) -> Result<String> {
        if self.is_terminated() {
            return Err(Error::ConnectionClosed);
        }
        let mut id = String::new();
        self.record(|log| {
            log.sent.push((to.clone(), message));
            id = format!("MOCK{}", log.sent.len());
        });
        Ok(id)
    }

    async fn send_presence(&self, presence: Presence) -> Result<()> {
        if self.is_terminated() {
            return Err(Error::ConnectionClosed);
        }
        self.record(|log| log.presence.push(presence));
        Ok(())
    }

    fn supports_profile_status(&self) -> bool {
        self.behavior.profile_status
    }

    async fn update_profile_status(&self, text: &str) -> Result<()> {
        if !self.behavior.profile_status {
            return Ok(());
        }
        self.record(|log| log.status_updates.push(text.to_string()));
        Ok(())
    }

    async fn profile_picture_url(&self, jid: &Jid) -> Result<Option<String>> {
        if self.is_terminated() {
            return Err(Error::ConnectionClosed);
        }
        Ok(self.behavior.profile_pictures.get(jid).cloned())
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String> {
        if self.is_terminated() {
            return Err(Error::ConnectionClosed);
        }
        self.record(|log| log.pairing_requests.push(phone.to_string()));
        Ok(self.behavior.pairing_code.clone())
    }

    async fn logout(&self) -> Result<()> {
        self.record(|log| log.logout_calls += 1);
        match self.behavior.logout {
            LogoutBehavior::Succeed => Ok(()),
            LogoutBehavior::Fail => Err(Error::Transport("mock logout failure".to_string())),
            LogoutBehavior::Hang => std::future::pending().await,
        }
    }

    async fn terminate(&self) {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        self.terminated.store(true, Ordering::SeqCst);
        if let Ok(mut events) = self.events.lock() {
            events.take();
        }
        self.changed.notify_waiters();
    }
}

/// Credential store kept in memory.
#[derive(Default)]
pub struct MemoryCredentialStore {
    namespaces: Mutex<HashMap<SessionId, Credentials>>,
    applied: Mutex<Vec<(SessionId, CredentialUpdate)>>,
    deleted: Mutex<Vec<SessionId>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a namespace with the given credentials.
    pub fn seed(&self, session_id: &SessionId, credentials: Credentials) {
        if let Ok(mut namespaces) = self.namespaces.lock() {
            namespaces.insert(session_id.clone(), credentials);
        }
    }

    /// Current credentials of a session, if it has a namespace.
    pub fn get(&self, session_id: &SessionId) -> Option<Credentials> {
        self.namespaces
            .lock()
            .ok()
            .and_then(|n| n.get(session_id).cloned())
    }

    /// Every update applied, in order.
    pub fn applied(&self) -> Vec<(SessionId, CredentialUpdate)> {
        self.applied
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Sessions deleted, in order.
    pub fn deleted(&self) -> Vec<SessionId> {
        self.deleted
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    fn poisoned() -> Error {
        Error::Credentials("memory store poisoned".to_string())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, session_id: &SessionId) -> Result<Credentials> {
        let mut namespaces = self.namespaces.lock().map_err(|_| Self::poisoned())?;
        Ok(namespaces.entry(session_id.clone()).or_default().clone())
    }

    async fn apply(&self, session_id: &SessionId, update: &CredentialUpdate) -> Result<()> {
        {
            let mut namespaces = self.namespaces.lock().map_err(|_| Self::poisoned())?;
            update.apply_to(namespaces.entry(session_id.clone()).or_default());
        }
        self.applied
            .lock()
            .map_err(|_| Self::poisoned())?
            .push((session_id.clone(), update.clone()));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionId>> {
        let namespaces = self.namespaces.lock().map_err(|_| Self::poisoned())?;
        let mut ids: Vec<SessionId> = namespaces.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, session_id: &SessionId) -> Result<()> {
        self.namespaces
            .lock()
            .map_err(|_| Self::poisoned())?
            .remove(session_id);
        self.deleted
            .lock()
            .map_err(|_| Self::poisoned())?
            .push(session_id.clone());
        Ok(())
    }
}
