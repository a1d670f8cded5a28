//! Gateway bridge transport
//!
//! Talks to a sidecar process that owns the actual network client. Frames
//! are newline-delimited JSON over TCP:
//!
//! ```text
//! -> {"id":1,"op":"connect","credential":"<hex>"|null}
//! -> {"id":2,"op":"send_message","to":"...","text":"..."}
//! -> {"id":3,"op":"fetch_group_members","group":"..."}
//! <- {"type":"response","id":1,"ok":true,"result":...}
//! <- {"type":"response","id":2,"ok":false,"code":"rejected","error":"..."}
//! <- {"type":"event","kind":"pairing","payload":"..."}
//! <- {"type":"event","kind":"open","own_address":"..."}
//! <- {"type":"event","kind":"close","reason":"logged_out"}
//! <- {"type":"event","kind":"credentials","credential":"<hex>"}
//! -> {"id":4,"op":"credentials_saved","credential":"<hex>"}
//! <- {"type":"event","kind":"membership","group":"...","action":"add","participants":[...]}
//! ```
//!
//! `credentials_saved` is sent only once the credentials from a
//! `credentials` event are on disk; until then the gateway must keep the
//! previous credentials valid.
//!
//! Losing the socket surfaces as `Closed { cause: ConnectionLost }`.

use super::event_stream::{event_channel, EventSender, EventStream};
use super::traits::*;
use crate::address::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Bridge connection settings
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// `host:port` of the gateway
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

/// Transport backed by a gateway sidecar
#[derive(Clone)]
pub struct BridgeTransport {
    config: Arc<BridgeConfig>,
    link: Arc<Mutex<Option<Arc<BridgeLink>>>>,
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// One live socket to the gateway
struct BridgeLink {
    outgoing: mpsc::UnboundedSender<String>,
    pending: PendingReplies,
    next_id: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for BridgeLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Connect { credential: Option<String> },
    SendMessage { to: &'a str, text: &'a str },
    FetchGroupMembers { group: &'a str },
    CredentialsSaved { credential: String },
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: Request<'a>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Response(Reply),
    Event(WireEvent),
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result: serde_json::Value,
}

impl Reply {
    fn into_result(self) -> TransportResult<serde_json::Value> {
        if self.ok {
            return Ok(self.result);
        }
        let message = self.error.unwrap_or_else(|| "unspecified failure".to_string());
        Err(match self.code.as_deref() {
            Some("unauthorized") => TransportError::Unauthorized,
            Some("timeout") => TransportError::Timeout(message),
            Some("network") => TransportError::Network(message),
            Some("not_connected") => TransportError::NotConnected,
            Some("protocol") => TransportError::Protocol(message),
            _ => TransportError::Rejected(message),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireEvent {
    Pairing {
        payload: String,
    },
    Open {
        own_address: String,
    },
    Close {
        reason: String,
    },
    Credentials {
        credential: String,
    },
    Membership {
        group: String,
        action: MembershipAction,
        participants: Vec<String>,
        #[serde(default)]
        group_name: Option<String>,
        #[serde(default)]
        timestamp: Option<u64>,
    },
}

impl WireEvent {
    fn into_transport_event(self) -> TransportResult<TransportEvent> {
        Ok(match self {
            WireEvent::Pairing { payload } => TransportEvent::PairingChallenge(payload),
            WireEvent::Open { own_address } => TransportEvent::Opened {
                own_address: Address(own_address),
            },
            WireEvent::Close { reason } => TransportEvent::Closed {
                cause: DisconnectCause::from_reason(&reason),
            },
            WireEvent::Credentials { credential } => {
                let bytes = hex::decode(credential.trim())
                    .map_err(|e| TransportError::Protocol(format!("credential not hex: {}", e)))?;
                TransportEvent::CredentialsUpdated(Credential(bytes))
            }
            WireEvent::Membership {
                group,
                action,
                participants,
                group_name,
                timestamp,
            } => TransportEvent::MembershipChanged(MembershipEvent {
                group: GroupId(group),
                action,
                affected: participants.into_iter().map(Address).collect(),
                group_name,
                timestamp: timestamp.unwrap_or_else(|| crate::time::unix_millis(SystemTime::now())),
            }),
        })
    }
}

impl BridgeTransport {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config: Arc::new(config),
            link: Arc::new(Mutex::new(None)),
        }
    }

    fn current_link(&self) -> TransportResult<Arc<BridgeLink>> {
        self.link
            .lock()
            .map_err(|_| TransportError::Protocol("bridge state poisoned".to_string()))?
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn replace_link(&self, link: Option<Arc<BridgeLink>>) {
        if let Ok(mut current) = self.link.lock() {
            *current = link;
        }
    }

    async fn open_socket(&self) -> TransportResult<TcpStream> {
        match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.endpoint),
        )
        .await
        {
            Ok(Ok(socket)) => Ok(socket),
            Ok(Err(e)) => Err(TransportError::Network(format!(
                "{}: {}",
                self.config.endpoint, e
            ))),
            Err(_) => Err(TransportError::Timeout(format!(
                "connecting to {}",
                self.config.endpoint
            ))),
        }
    }

    async fn request(&self, request: Request<'_>) -> TransportResult<serde_json::Value> {
        let link = self.current_link()?;
        link.request(request, self.config.request_timeout).await
    }
}

impl BridgeLink {
    fn start(socket: TcpStream, events: EventSender) -> Self {
        let (reader, mut writer) = socket.into_split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));

        let write_task = tokio::spawn(async move {
            while let Some(line) = outgoing_rx.recv().await {
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    warn!(error = %e, "Bridge write failed");
                    break;
                }
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let read_task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<Frame>(&line) {
                        Ok(Frame::Response(reply)) => {
                            let waiter = reader_pending
                                .lock()
                                .ok()
                                .and_then(|mut p| p.remove(&reply.id));
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(reply);
                                }
                                None => debug!(id = reply.id, "Reply for unknown request"),
                            }
                        }
                        Ok(Frame::Event(event)) => match event.into_transport_event() {
                            Ok(event) => {
                                if events.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Dropping malformed bridge event"),
                        },
                        Err(e) => warn!(error = %e, "Unparseable bridge frame"),
                    },
                    Ok(None) | Err(_) => {
                        let _ = events.send(TransportEvent::Closed {
                            cause: DisconnectCause::ConnectionLost,
                        });
                        break;
                    }
                }
            }
            // Fail outstanding requests instead of letting them time out
            if let Ok(mut p) = reader_pending.lock() {
                p.clear();
            }
        });

        Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            tasks: vec![write_task, read_task],
        }
    }

    async fn request(
        &self,
        request: Request<'_>,
        timeout: Duration,
    ) -> TransportResult<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&Envelope { id, request })
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| TransportError::Protocol("bridge state poisoned".to_string()))?
            .insert(id, tx);

        if self.outgoing.send(line).is_err() {
            self.forget(id);
            return Err(TransportError::NotConnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply.into_result(),
            Ok(Err(_)) => Err(TransportError::NotConnected),
            Err(_) => {
                self.forget(id);
                Err(TransportError::Timeout(format!("request {}", id)))
            }
        }
    }

    fn forget(&self, id: u64) {
        if let Ok(mut p) = self.pending.lock() {
            p.remove(&id);
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(&self, credential: Option<&Credential>) -> TransportResult<EventStream> {
        // One session at a time; a new connect supersedes the old socket
        self.replace_link(None);

        let socket = self.open_socket().await?;
        let (stream, events) = event_channel();
        let link = Arc::new(BridgeLink::start(socket, events));
        self.replace_link(Some(link.clone()));

        let request = Request::Connect {
            credential: credential.map(|c| hex::encode(&c.0)),
        };
        if let Err(e) = link.request(request, self.config.request_timeout).await {
            self.replace_link(None);
            return Err(e);
        }

        Ok(stream)
    }

    async fn send_message(&self, to: &Address, text: &str) -> TransportResult<()> {
        self.request(Request::SendMessage {
            to: to.as_str(),
            text,
        })
        .await
        .map(|_| ())
    }

    async fn fetch_group_members(&self, group: &GroupId) -> TransportResult<Vec<Address>> {
        let result = self
            .request(Request::FetchGroupMembers {
                group: group.as_str(),
            })
            .await?;
        let members: Vec<String> = serde_json::from_value(result)
            .map_err(|e| TransportError::Protocol(format!("member list: {}", e)))?;
        Ok(members.into_iter().map(Address).collect())
    }

    async fn acknowledge_credentials(&self, credential: &Credential) -> TransportResult<()> {
        self.request(Request::CredentialsSaved {
            credential: hex::encode(&credential.0),
        })
        .await
        .map(|_| ())
    }

    async fn disconnect(&self) {
        self.replace_link(None);
    }
}
