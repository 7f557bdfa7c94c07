//! WebSocket client for the external protocol bridge.
//!
//! The bridge owns the actual chat protocol (handshake, encryption, framing).
//! Each [`BridgeConnection`] is one WebSocket carrying JSON text frames:
//!
//! - client → bridge: `connect`, `call`, `terminate`
//! - bridge → client: `hello`, `event`, `result`
//!
//! Calls are correlated by id and bounded by the request timeout. If the
//! socket drops without the bridge having reported a `close` event, a
//! synthetic `close` with status 408 is emitted so the session layer still
//! sees the disconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pairbot_core::{Error, Jid, OutboundMessage, Presence, Result, SessionId};

use crate::connection::{
    ConnectMode, ConnectOptions, Connection, ConnectionEvent, Connector, DisconnectReason,
    EstablishedConnection, EVENT_CHANNEL_CAPACITY,
};
use crate::credentials::Credentials;

/// Capability name the bridge advertises for profile status updates.
const CAP_PROFILE_STATUS: &str = "profile_status";

/// Frame sent to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Open the protocol session
    Connect {
        /// Session id
        session_id: SessionId,
        /// Session or pairing mode
        mode: ConnectMode,
        /// Stored credential material
        credentials: Credentials,
    },
    /// Remote procedure call
    Call {
        /// Correlation id
        id: String,
        /// The call
        call: BridgeCall,
    },
    /// Close the protocol session without logging out
    Terminate,
}

/// Remote calls supported by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum BridgeCall {
    /// Send a message
    SendMessage {
        /// Recipient chat
        to: Jid,
        /// Payload
        message: OutboundMessage,
    },
    /// Announce presence
    SendPresence {
        /// Presence
        presence: Presence,
    },
    /// Update profile status text
    UpdateProfileStatus {
        /// New status
        text: String,
    },
    /// Look up a profile photo URL
    ProfilePictureUrl {
        /// Identity
        jid: Jid,
    },
    /// Request a pairing code
    RequestPairingCode {
        /// Digits-only phone number
        phone: String,
    },
    /// Log the session out
    Logout,
}

impl BridgeCall {
    fn method(&self) -> &'static str {
        match self {
            BridgeCall::SendMessage { .. } => "send_message",
            BridgeCall::SendPresence { .. } => "send_presence",
            BridgeCall::UpdateProfileStatus { .. } => "update_profile_status",
            BridgeCall::ProfilePictureUrl { .. } => "profile_picture_url",
            BridgeCall::RequestPairingCode { .. } => "request_pairing_code",
            BridgeCall::Logout => "logout",
        }
    }
}

/// Frame received from the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    /// Sent once after `connect`
    Hello {
        /// Optional capabilities of this bridge
        #[serde(default)]
        capabilities: Vec<String>,
    },
    /// Connection event
    Event {
        /// The event
        event: ConnectionEvent,
    },
    /// Outcome of a call
    Result {
        /// Correlation id
        id: String,
        /// Whether the call succeeded
        ok: bool,
        /// Return value on success
        #[serde(default)]
        value: Option<Value>,
        /// Failure description
        #[serde(default)]
        error: Option<String>,
    },
}

type PendingCalls = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>>;

/// Opens [`BridgeConnection`]s against a bridge URL.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    url: String,
    request_timeout: Duration,
}

impl BridgeConnector {
    /// Create a connector.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            request_timeout,
        }
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(&self, options: ConnectOptions) -> Result<EstablishedConnection> {
        let session_id = options.session_id.clone();
        info!(
            "Opening bridge connection: session={}, mode={:?}, url={}",
            session_id, options.mode, self.url
        );

        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("bridge connect failed: {e}")))?;
        let (mut write, read) = ws_stream.split();

        let hello = serde_json::to_string(&ClientFrame::Connect {
            session_id: options.session_id,
            mode: options.mode,
            credentials: options.credentials,
        })?;
        write
            .send(Message::Text(hello))
            .await
            .map_err(|e| Error::Transport(format!("bridge handshake failed: {e}")))?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let profile_status = Arc::new(AtomicBool::new(false));

        // Write task
        let session_for_write = session_id.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    debug!("Bridge write failed: session={}, error={}", session_for_write, e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        spawn_reader(
            read,
            session_id.clone(),
            Arc::clone(&pending),
            Arc::clone(&profile_status),
            events_tx,
        );

        let connection = BridgeConnection {
            session_id,
            outbound: outbound_tx,
            pending,
            profile_status,
            terminated: AtomicBool::new(false),
            request_timeout: self.request_timeout,
        };

        Ok(EstablishedConnection {
            connection: Arc::new(connection),
            events: events_rx,
        })
    }
}

/// Spawn the read side of a bridge socket.
///
/// Result frames complete their pending call as soon as they are read.
/// Events pass through an unbounded staging queue to a forwarder that feeds
/// the bounded session channel, so a slow event consumer never holds back
/// call results. Event order is preserved.
fn spawn_reader<S>(
    mut read: S,
    session_id: SessionId,
    pending: PendingCalls,
    profile_status: Arc<AtomicBool>,
    events_tx: mpsc::Sender<ConnectionEvent>,
) where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin + Send + 'static,
{
    let (staged_tx, mut staged_rx) = mpsc::unbounded_channel::<ConnectionEvent>();

    tokio::spawn(async move {
        while let Some(event) = staged_rx.recv().await {
            if events_tx.send(event).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut saw_close = false;
        while let Some(frame) = read.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Bridge read error: session={}, error={}", session_id, e);
                    break;
                }
            };

            match serde_json::from_str::<BridgeFrame>(&text) {
                Ok(BridgeFrame::Hello { capabilities }) => {
                    let supported = capabilities.iter().any(|c| c == CAP_PROFILE_STATUS);
                    profile_status.store(supported, Ordering::Relaxed);
                }
                Ok(BridgeFrame::Event { event }) => {
                    saw_close |= matches!(event, ConnectionEvent::Close { .. });
                    if staged_tx.send(event).is_err() {
                        // Nobody is listening any more.
                        break;
                    }
                }
                Ok(BridgeFrame::Result {
                    id,
                    ok,
                    value,
                    error,
                }) => {
                    let waiter = pending.lock().await.remove(&id);
                    if let Some(waiter) = waiter {
                        let outcome = if ok {
                            Ok(value.unwrap_or(Value::Null))
                        } else {
                            Err(Error::Transport(
                                error.unwrap_or_else(|| "bridge call failed".to_string()),
                            ))
                        };
                        let _ = waiter.send(outcome);
                    }
                }
                Err(e) => {
                    error!("Unparseable bridge frame: session={}, error={}", session_id, e);
                }
            }
        }

        // Fail outstanding calls
        pending.lock().await.clear();

        if !saw_close {
            let _ = staged_tx.send(ConnectionEvent::close(
                DisconnectReason::ConnectionLost,
                Some("bridge socket closed".to_string()),
            ));
        }
        debug!("Bridge read task finished: session={}", session_id);
    });
}

/// One bridge-backed connection handle.
pub struct BridgeConnection {
    session_id: SessionId,
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingCalls,
    profile_status: Arc<AtomicBool>,
    terminated: AtomicBool,
    request_timeout: Duration,
}

impl BridgeConnection {
    async fn call(&self, call: BridgeCall) -> Result<Value> {
        if self.terminated.load(Ordering::Relaxed) {
            return Err(Error::ConnectionClosed);
        }

        let id = Uuid::new_v4().to_string();
        let method = call.method();
        let frame = serde_json::to_string(&ClientFrame::Call {
            id: id.clone(),
            call,
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if self.outbound.send(Message::Text(frame)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::ConnectionClosed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped: the socket went away
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                debug!(
                    "Bridge call timed out: session={}, method={}",
                    self.session_id, method
                );
                Err(Error::Timeout(self.request_timeout.as_millis() as u64))
            }
        }
    }
}

#[async_trait]
impl Connection for BridgeConnection {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn send_message(&self, to: &Jid, message: OutboundMessage) -> Result<String> {
        let value = self
            .call(BridgeCall::SendMessage {
                to: to.clone(),
                message,
            })
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn send_presence(&self, presence: Presence) -> Result<()> {
        self.call(BridgeCall::SendPresence { presence }).await?;
        Ok(())
    }

    fn supports_profile_status(&self) -> bool {
        self.profile_status.load(Ordering::Relaxed)
    }

    async fn update_profile_status(&self, text: &str) -> Result<()> {
        if !self.supports_profile_status() {
            return Ok(());
        }
        self.call(BridgeCall::UpdateProfileStatus {
            text: text.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn profile_picture_url(&self, jid: &Jid) -> Result<Option<String>> {
        let value = self
            .call(BridgeCall::ProfilePictureUrl { jid: jid.clone() })
            .await?;
        Ok(value.as_str().filter(|s| !s.is_empty()).map(str::to_string))
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String> {
        let value = self
            .call(BridgeCall::RequestPairingCode {
                phone: phone.to_string(),
            })
            .await?;
        value
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Transport("bridge returned no pairing code".to_string()))
    }

    async fn logout(&self) -> Result<()> {
        self.call(BridgeCall::Logout).await?;
        Ok(())
    }

    async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Terminating bridge connection: session={}", self.session_id);
        if let Ok(frame) = serde_json::to_string(&ClientFrame::Terminate) {
            let _ = self.outbound.send(Message::Text(frame));
        }
        let _ = self.outbound.send(Message::Close(None));
        self.pending.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_wire_format() {
        let frame = ClientFrame::Call {
            id: "1".into(),
            call: BridgeCall::RequestPairingCode {
                phone: "15551234567".into(),
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "op": "call",
                "id": "1",
                "call": {"method": "request_pairing_code", "phone": "15551234567"}
            })
        );
    }

    #[test]
    fn test_connect_frame_wire_format() {
        let frame = ClientFrame::Connect {
            session_id: SessionId::new("alpha").unwrap(),
            mode: ConnectMode::Pairing,
            credentials: Credentials::new(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["op"], "connect");
        assert_eq!(json["mode"], "pairing");
        assert_eq!(json["session_id"], "alpha");
    }

    #[test]
    fn test_bridge_frame_parsing() {
        let frame: BridgeFrame =
            serde_json::from_str(r#"{"type":"result","id":"7","ok":false,"error":"nope"}"#)
                .unwrap();
        match frame {
            BridgeFrame::Result { id, ok, error, .. } => {
                assert_eq!(id, "7");
                assert!(!ok);
                assert_eq!(error.as_deref(), Some("nope"));
            }
            other => panic!("unexpected frame {other:?}"),
        }

        let frame: BridgeFrame = serde_json::from_str(
            r#"{"type":"event","event":{"type":"close","status_code":515}}"#,
        )
        .unwrap();
        match frame {
            BridgeFrame::Event { event } => assert_eq!(
                event.disconnect_reason(),
                Some(DisconnectReason::RestartRequired)
            ),
            other => panic!("unexpected frame {other:?}"),
        }

        let frame: BridgeFrame =
            serde_json::from_str(r#"{"type":"hello","capabilities":["profile_status"]}"#)
                .unwrap();
        assert!(matches!(frame, BridgeFrame::Hello { capabilities } if capabilities.len() == 1));
    }

    #[test]
    fn test_call_method_names_match_wire_tags() {
        let call = BridgeCall::Logout;
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["method"], call.method());
    }

    fn frame(value: Value) -> std::result::Result<Message, WsError> {
        Ok(Message::Text(value.to_string()))
    }

    #[tokio::test]
    async fn test_results_arrive_while_event_channel_is_full() {
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert("call-1".to_string(), tx);

        let mut frames: Vec<_> = (0..EVENT_CHANNEL_CAPACITY + 10)
            .map(|_| frame(serde_json::json!({"type": "event", "event": {"type": "connecting"}})))
            .collect();
        frames.push(frame(
            serde_json::json!({"type": "result", "id": "call-1", "ok": true, "value": "MSG1"}),
        ));
        // Keep the socket open so the read loop stays alive
        let read = futures_util::stream::iter(frames).chain(futures_util::stream::pending());

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        spawn_reader(
            Box::pin(read),
            SessionId::new("alpha").unwrap(),
            Arc::clone(&pending),
            Arc::new(AtomicBool::new(false)),
            events_tx,
        );

        let outcome = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("result not delivered")
            .unwrap();
        assert_eq!(outcome.unwrap(), Value::String("MSG1".to_string()));

        // Every event still arrives, in order, once the consumer drains
        for _ in 0..EVENT_CHANNEL_CAPACITY + 10 {
            assert_eq!(events_rx.recv().await, Some(ConnectionEvent::Connecting));
        }
    }

    #[tokio::test]
    async fn test_socket_end_emits_synthetic_close() {
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let read = futures_util::stream::iter(vec![frame(
            serde_json::json!({"type": "event", "event": {"type": "open"}}),
        )]);

        spawn_reader(
            read,
            SessionId::new("alpha").unwrap(),
            pending,
            Arc::new(AtomicBool::new(false)),
            events_tx,
        );

        assert_eq!(events_rx.recv().await, Some(ConnectionEvent::Open));
        let close = events_rx.recv().await.unwrap();
        assert_eq!(
            close.disconnect_reason(),
            Some(DisconnectReason::ConnectionLost)
        );
    }
}
