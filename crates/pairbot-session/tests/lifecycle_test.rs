//! Session lifecycle tests driven through the mock connector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use pairbot_commands::{Dispatcher, MediaFetcher};
use pairbot_core::{
    BotSettings, Error, InboundMessage, Jid, MessageContent, MessageKey, OutboundMessage, Presence,
    Result, SessionId, SessionState, UpsertKind,
};
use pairbot_session::{ReconnectPolicy, SessionRegistry, SessionRegistryConfig};
use pairbot_transport::testing::{
    LogoutBehavior, MemoryCredentialStore, MockBehavior, MockConnector,
};
use pairbot_transport::{ConnectMode, ConnectionEvent, CredentialStore, CredentialUpdate};

#[derive(Default)]
struct StaticFetcher {
    bodies: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Fetch(format!("404 for {url}")))
    }
}

struct Harness {
    registry: SessionRegistry,
    connector: Arc<MockConnector>,
    store: Arc<MemoryCredentialStore>,
    downloads: tempfile::TempDir,
}

fn fast_config() -> SessionRegistryConfig {
    SessionRegistryConfig {
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        },
        logout_timeout: Duration::from_millis(100),
    }
}

fn harness_with(
    behavior: MockBehavior,
    settings: BotSettings,
    fetcher: StaticFetcher,
    config: SessionRegistryConfig,
) -> Harness {
    let connector = Arc::new(MockConnector::with_behavior(behavior));
    let store = Arc::new(MemoryCredentialStore::new());
    let downloads = tempfile::tempdir().unwrap();
    let dispatcher = Arc::new(Dispatcher::with_default_commands(
        settings,
        Arc::new(fetcher),
        downloads.path().join("downloads"),
    ));
    let registry = SessionRegistry::new(connector.clone(), store.clone(), dispatcher, config);
    Harness {
        registry,
        connector,
        store,
        downloads,
    }
}

fn harness() -> Harness {
    let settings = BotSettings {
        auto_react: String::new(),
        ..BotSettings::default()
    };
    harness_with(
        MockBehavior::default(),
        settings,
        StaticFetcher::default(),
        fast_config(),
    )
}

fn sid(s: &str) -> SessionId {
    SessionId::new(s).unwrap()
}

async fn wait_for_state(registry: &SessionRegistry, id: &SessionId, state: SessionState) -> bool {
    for _ in 0..500 {
        if registry.get_state(id).await == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn close(status: u16) -> ConnectionEvent {
    ConnectionEvent::Close {
        status_code: Some(status),
        error: Some("stream errored".to_string()),
    }
}

#[tokio::test]
async fn test_never_started_is_stopped() {
    let h = harness();
    assert_eq!(h.registry.get_state(&sid("nobody")).await, SessionState::Stopped);
    assert!(h.registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repeated_start_attaches() {
    let h = harness();
    let id = sid("alpha");

    let first = h.registry.start(&id).await.unwrap();
    let second = h.registry.start(&id).await.unwrap();

    assert!(std::ptr::eq(
        Arc::as_ptr(&first) as *const (),
        Arc::as_ptr(&second) as *const ()
    ));
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test]
async fn test_concurrent_start_opens_one_connection() {
    let h = harness();
    let id = sid("alpha");

    let (a, b, c) = tokio::join!(
        h.registry.start(&id),
        h.registry.start(&id),
        h.registry.start(&id)
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test]
async fn test_start_passes_stored_credentials() {
    let h = harness();
    let id = sid("alpha");
    let mut creds = pairbot_transport::Credentials::new();
    creds.insert("creds".to_string(), json!({"me": "1@s.whatsapp.net"}));
    h.store.seed(&id, creds.clone());

    h.registry.start(&id).await.unwrap();

    let options = h.connector.connect_options();
    assert_eq!(options[0].mode, ConnectMode::Session);
    assert_eq!(options[0].credentials, creds);
}

#[tokio::test]
async fn test_open_marks_connected_and_announces_presence() {
    let h = harness();
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let conn = h.connector.last_connection().unwrap();

    conn.emit(ConnectionEvent::Connecting).await;
    assert!(wait_for_state(&h.registry, &id, SessionState::Connecting).await);

    conn.emit(ConnectionEvent::Open).await;
    assert!(wait_for_state(&h.registry, &id, SessionState::Connected).await);
    assert_eq!(conn.wait_for_presence(1).await, vec![Presence::Available]);
    // Capability absent: status left alone
    assert!(conn.status_updates().is_empty());
}

#[tokio::test]
async fn test_open_updates_status_when_supported() {
    let h = harness_with(
        MockBehavior {
            profile_status: true,
            ..MockBehavior::default()
        },
        BotSettings::default(),
        StaticFetcher::default(),
        fast_config(),
    );
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let conn = h.connector.last_connection().unwrap();

    conn.emit(ConnectionEvent::Open).await;
    conn.wait_for_presence(1).await;
    for _ in 0..100 {
        if !conn.status_updates().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(conn.status_updates(), vec!["Xdemon Bug Bot online ⚡".to_string()]);
}

#[tokio::test]
async fn test_open_notifies_owner_with_menu() {
    let mut bodies = HashMap::new();
    bodies.insert("http://menu.test/m.png".to_string(), b"PNG".to_vec());
    let settings = BotSettings {
        owner_number: Some("15550001111".to_string()),
        menu_image_url: "http://menu.test/m.png".to_string(),
        auto_react: String::new(),
        ..BotSettings::default()
    };
    let h = harness_with(
        MockBehavior::default(),
        settings,
        StaticFetcher { bodies },
        fast_config(),
    );
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let conn = h.connector.last_connection().unwrap();

    conn.emit(ConnectionEvent::Open).await;
    let sent = conn.wait_for_sent(1).await;

    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, Jid::parse("15550001111@s.whatsapp.net").unwrap());
    assert!(matches!(&sent[0].1, OutboundMessage::Image { data, .. } if data == b"PNG"));
}

#[tokio::test]
async fn test_recoverable_close_reconnects() {
    let h = harness();
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let first = h.connector.last_connection().unwrap();

    first.emit(ConnectionEvent::Open).await;
    assert!(wait_for_state(&h.registry, &id, SessionState::Connected).await);

    first.emit(close(428)).await;
    let connections = h.connector.wait_for_connections(2).await;
    assert_eq!(connections.len(), 2);
    assert!(wait_for_state(&h.registry, &id, SessionState::Connecting).await);

    // The replaced handle is released and its events no longer count
    assert!(first.wait_for_terminated().await);
    assert!(!first.emit(ConnectionEvent::Open).await);
    assert_eq!(h.registry.get_state(&id).await, SessionState::Connecting);

    connections[1].emit(ConnectionEvent::Open).await;
    assert!(wait_for_state(&h.registry, &id, SessionState::Connected).await);
}

#[tokio::test]
async fn test_close_without_status_reconnects() {
    let h = harness();
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let first = h.connector.last_connection().unwrap();

    first
        .emit(ConnectionEvent::Close {
            status_code: None,
            error: None,
        })
        .await;
    assert_eq!(h.connector.wait_for_connections(2).await.len(), 2);
}

#[tokio::test]
async fn test_failed_reconnects_back_off_and_retry() {
    let h = harness_with(
        MockBehavior::default(),
        BotSettings::default(),
        StaticFetcher::default(),
        SessionRegistryConfig {
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(200),
                max_delay: Duration::from_millis(400),
                multiplier: 2.0,
            },
            logout_timeout: Duration::from_millis(100),
        },
    );
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let first = h.connector.last_connection().unwrap();
    first.emit(ConnectionEvent::Open).await;
    assert!(wait_for_state(&h.registry, &id, SessionState::Connected).await);

    h.connector.fail_next_connects(1);
    first.emit(close(503)).await;

    // Immediate retry fails; the session waits in `closed` for the backoff
    assert!(h.connector.wait_for_connect_calls(2).await);
    assert_eq!(h.registry.get_state(&id).await, SessionState::Closed);
    assert_eq!(h.connector.connections().len(), 1);

    // Second attempt after the delay succeeds
    assert_eq!(h.connector.wait_for_connections(2).await.len(), 2);
    assert!(wait_for_state(&h.registry, &id, SessionState::Connecting).await);
    assert_eq!(h.connector.connect_count(), 3);
}

#[tokio::test]
async fn test_logged_out_close_is_terminal() {
    let h = harness();
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let conn = h.connector.last_connection().unwrap();

    conn.emit(ConnectionEvent::Open).await;
    conn.emit(close(401)).await;
    assert!(wait_for_state(&h.registry, &id, SessionState::Closed).await);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.connector.connect_count(), 1);
    assert_eq!(h.registry.get_state(&id).await, SessionState::Closed);
    // The dead socket is released, credentials stay in place
    assert!(conn.wait_for_terminated().await);
    assert_eq!(conn.terminate_calls(), 1);
    assert!(h.store.deleted().is_empty());
    assert_eq!(h.registry.list().await.unwrap(), vec![id.clone()]);

    // An explicit start opens a fresh connection
    h.registry.start(&id).await.unwrap();
    assert_eq!(h.connector.connect_count(), 2);
}

#[tokio::test]
async fn test_credential_updates_persist_in_order() {
    let h = harness();
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let conn = h.connector.last_connection().unwrap();

    conn.emit(ConnectionEvent::CredsUpdate {
        update: CredentialUpdate::new().set("creds", json!(1)),
    })
    .await;
    conn.emit(ConnectionEvent::CredsUpdate {
        update: CredentialUpdate::new().set("creds", json!(2)).set("key-a", json!("a")),
    })
    .await;
    conn.emit(ConnectionEvent::CredsUpdate {
        update: CredentialUpdate::new().set("creds", json!(3)).remove("key-a"),
    })
    .await;

    for _ in 0..200 {
        if h.store.applied().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let applied = h.store.applied();
    assert_eq!(applied.len(), 3);
    let values: Vec<_> = applied
        .iter()
        .map(|(_, update)| update.0["creds"].clone().unwrap())
        .collect();
    assert_eq!(values, vec![json!(1), json!(2), json!(3)]);

    let creds = h.store.load(&id).await.unwrap();
    assert_eq!(creds["creds"], json!(3));
    assert!(!creds.contains_key("key-a"));
}

#[tokio::test]
async fn test_messages_reach_dispatcher() {
    let h = harness();
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let conn = h.connector.last_connection().unwrap();

    let message = InboundMessage {
        key: MessageKey {
            remote_jid: Jid::parse("15550001111@s.whatsapp.net").unwrap(),
            from_me: false,
            id: "M1".to_string(),
            participant: None,
        },
        message: Some(MessageContent {
            conversation: Some(".ping".to_string()),
            ..Default::default()
        }),
    };
    conn.emit(ConnectionEvent::Messages {
        kind: UpsertKind::Notify,
        messages: vec![message],
    })
    .await;

    let sent = conn.wait_for_sent(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, OutboundMessage::text("pong"));
}

#[tokio::test]
async fn test_dp_saves_into_downloads_dir() {
    let target = Jid::parse("15552223333@s.whatsapp.net").unwrap();
    let mut behavior = MockBehavior::default();
    behavior
        .profile_pictures
        .insert(target, "http://cdn.test/dp.jpg".to_string());
    let mut bodies = HashMap::new();
    bodies.insert("http://cdn.test/dp.jpg".to_string(), b"JPEG".to_vec());
    let settings = BotSettings {
        auto_react: String::new(),
        ..BotSettings::default()
    };
    let h = harness_with(behavior, settings, StaticFetcher { bodies }, fast_config());
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let conn = h.connector.last_connection().unwrap();

    let message = InboundMessage {
        key: MessageKey {
            remote_jid: Jid::parse("15550001111@s.whatsapp.net").unwrap(),
            from_me: false,
            id: "M1".to_string(),
            participant: None,
        },
        message: Some(MessageContent {
            conversation: Some(".dp 15552223333".to_string()),
            ..Default::default()
        }),
    };
    conn.emit(ConnectionEvent::Messages {
        kind: UpsertKind::Notify,
        messages: vec![message],
    })
    .await;

    let sent = conn.wait_for_sent(1).await;
    assert_eq!(
        sent[0].1,
        OutboundMessage::text("✅ DP saved: 15552223333_s.whatsapp.net.jpg")
    );
    let saved = h
        .downloads
        .path()
        .join("downloads")
        .join("15552223333_s.whatsapp.net.jpg");
    assert_eq!(std::fs::read(saved).unwrap(), b"JPEG");
}

#[tokio::test]
async fn test_delete_with_failing_logout() {
    let h = harness_with(
        MockBehavior {
            logout: LogoutBehavior::Fail,
            ..MockBehavior::default()
        },
        BotSettings::default(),
        StaticFetcher::default(),
        fast_config(),
    );
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let conn = h.connector.last_connection().unwrap();
    conn.emit(ConnectionEvent::Open).await;
    assert!(wait_for_state(&h.registry, &id, SessionState::Connected).await);

    h.registry.delete(&id).await.unwrap();

    assert_eq!(conn.logout_calls(), 1);
    assert!(conn.is_terminated());
    assert_eq!(h.registry.get_state(&id).await, SessionState::Stopped);
    assert!(h.registry.list().await.unwrap().is_empty());
    assert_eq!(h.store.deleted(), vec![id]);
}

#[tokio::test]
async fn test_delete_with_hanging_logout_is_bounded() {
    let h = harness_with(
        MockBehavior {
            logout: LogoutBehavior::Hang,
            ..MockBehavior::default()
        },
        BotSettings::default(),
        StaticFetcher::default(),
        fast_config(),
    );
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();

    let deleted = tokio::time::timeout(Duration::from_secs(2), h.registry.delete(&id)).await;
    assert!(matches!(deleted, Ok(Ok(()))));
    assert!(h.registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_does_not_trigger_reconnect() {
    let h = harness();
    let id = sid("alpha");
    h.registry.start(&id).await.unwrap();
    let conn = h.connector.last_connection().unwrap();
    conn.emit(ConnectionEvent::Open).await;
    assert!(wait_for_state(&h.registry, &id, SessionState::Connected).await);

    h.registry.delete(&id).await.unwrap();
    // A late close from the old handle is ignored
    conn.emit(close(428)).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(h.connector.connect_count(), 1);
    assert_eq!(h.registry.get_state(&id).await, SessionState::Stopped);
}

#[tokio::test]
async fn test_delete_unknown_session_is_ok() {
    let h = harness();
    h.registry.delete(&sid("ghost")).await.unwrap();
    assert_eq!(h.store.deleted(), vec![sid("ghost")]);
}

#[tokio::test]
async fn test_pair_returns_code_without_starting() {
    let h = harness();
    let id = sid("15551234567");

    let code = h.registry.pair("15551234567", &id).await.unwrap();

    assert_eq!(code, "ABCD-1234");
    let conn = h.connector.last_connection().unwrap();
    assert_eq!(conn.mode(), ConnectMode::Pairing);
    assert_eq!(conn.pairing_requests(), vec!["15551234567".to_string()]);
    assert_eq!(h.registry.get_state(&id).await, SessionState::Stopped);
    assert!(h.registry.is_pairing(&id).await);
    // Namespace exists, so the session is listed
    assert_eq!(h.registry.list().await.unwrap(), vec![id]);
}

#[tokio::test]
async fn test_pairing_credentials_persist() {
    let h = harness();
    let id = sid("paired");
    h.registry.pair("15551234567", &id).await.unwrap();
    let conn = h.connector.last_connection().unwrap();

    conn.emit(ConnectionEvent::CredsUpdate {
        update: CredentialUpdate::new().set("creds", json!({"registered": true})),
    })
    .await;

    for _ in 0..200 {
        if !h.store.applied().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        h.store.get(&id).unwrap()["creds"],
        json!({"registered": true})
    );
}

#[tokio::test]
async fn test_start_after_pair_closes_pairing_connection() {
    let h = harness();
    let id = sid("paired");
    h.registry.pair("15551234567", &id).await.unwrap();
    let pairing = h.connector.last_connection().unwrap();

    h.registry.start(&id).await.unwrap();

    assert!(pairing.is_terminated());
    assert!(!h.registry.is_pairing(&id).await);
    assert_eq!(
        h.connector.connections_for(&id, ConnectMode::Session).len(),
        1
    );
}

#[tokio::test]
async fn test_delete_closes_pairing_connection() {
    let h = harness();
    let id = sid("paired");
    h.registry.pair("15551234567", &id).await.unwrap();
    let pairing = h.connector.last_connection().unwrap();

    h.registry.delete(&id).await.unwrap();

    assert!(pairing.is_terminated());
    assert!(h.registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connect_failure_leaves_no_record() {
    let h = harness();
    let id = sid("alpha");
    h.connector.fail_next_connects(1);

    assert!(h.registry.start(&id).await.is_err());
    assert_eq!(h.registry.get_state(&id).await, SessionState::Stopped);

    h.registry.start(&id).await.unwrap();
    assert_eq!(h.registry.get_state(&id).await, SessionState::Connecting);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let h = harness();
    h.registry.start(&sid("a")).await.unwrap();
    h.registry.start(&sid("b")).await.unwrap();
    let a = h.connector.connections_for(&sid("a"), ConnectMode::Session)[0].clone();

    a.emit(close(401)).await;
    assert!(wait_for_state(&h.registry, &sid("a"), SessionState::Closed).await);
    assert_eq!(h.registry.get_state(&sid("b")).await, SessionState::Connecting);

    let sessions = h.registry.sessions().await.unwrap();
    assert_eq!(sessions.len(), 2);
}
