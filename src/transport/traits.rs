//! Transport Trait Abstractions
//!
//! The core never speaks a wire protocol itself. It drives the network
//! client through this capability set, which lets `MockTransport` stand in
//! for the real gateway in every test.

use super::event_stream::EventStream;
use crate::address::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Group (conversation) identifier as reported by the network
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque session material that lets a session resume without pairing
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(pub Vec<u8>);

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipAction {
    Add,
    Remove,
}

/// Participants joined or left a group
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipEvent {
    pub group: GroupId,
    pub action: MembershipAction,
    pub affected: Vec<Address>,
    /// Display name, when the network included it
    pub group_name: Option<String>,
    /// Unix milliseconds
    pub timestamp: u64,
}

/// Why an open session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The remote invalidated the session; credentials are dead
    LoggedOut,
    ConnectionLost,
    ConnectionClosed,
    TimedOut,
    /// Another client took over the session
    ConnectionReplaced,
    RestartRequired,
    Other(String),
}

impl DisconnectCause {
    pub fn is_authoritative_logout(&self) -> bool {
        matches!(self, DisconnectCause::LoggedOut)
    }

    /// Map a gateway reason string onto a cause
    pub fn from_reason(reason: &str) -> Self {
        match reason.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "logged_out" | "loggedout" => DisconnectCause::LoggedOut,
            "connection_lost" | "connectionlost" => DisconnectCause::ConnectionLost,
            "connection_closed" | "connectionclosed" => DisconnectCause::ConnectionClosed,
            "timed_out" | "timedout" | "timeout" => DisconnectCause::TimedOut,
            "connection_replaced" | "connectionreplaced" => DisconnectCause::ConnectionReplaced,
            "restart_required" | "restartrequired" => DisconnectCause::RestartRequired,
            _ => DisconnectCause::Other(reason.to_string()),
        }
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectCause::LoggedOut => f.write_str("logged out"),
            DisconnectCause::ConnectionLost => f.write_str("connection lost"),
            DisconnectCause::ConnectionClosed => f.write_str("connection closed"),
            DisconnectCause::TimedOut => f.write_str("timed out"),
            DisconnectCause::ConnectionReplaced => f.write_str("connection replaced"),
            DisconnectCause::RestartRequired => f.write_str("restart required"),
            DisconnectCause::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Everything the network reports for one session, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Opaque pairing payload to show the operator
    PairingChallenge(String),
    /// Handshake finished
    Opened { own_address: Address },
    Closed { cause: DisconnectCause },
    CredentialsUpdated(Credential),
    MembershipChanged(MembershipEvent),
}

/// Result type for Transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Rejected by remote: {0}")]
    Rejected(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl TransportError {
    /// Transient faults are recovered through reconnect backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_) | TransportError::Timeout(_) | TransportError::NotConnected
        )
    }
}

/// Messaging-network client capability set
#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    /// Start a session, resuming with `credential` or pairing fresh when `None`.
    ///
    /// Returns the ordered event stream for this session. The stream ends
    /// (or yields `Closed`) when the session is gone.
    async fn connect(&self, credential: Option<&Credential>) -> TransportResult<EventStream>;

    /// Send a direct text message
    async fn send_message(&self, to: &Address, text: &str) -> TransportResult<()>;

    /// Current participants of a group
    async fn fetch_group_members(&self, group: &GroupId) -> TransportResult<Vec<Address>>;

    /// Tell the network side that `credential`, from a `CredentialsUpdated`
    /// event, is now durably stored. Only called after the save succeeded.
    async fn acknowledge_credentials(&self, credential: &Credential) -> TransportResult<()>;

    /// Tear down the current session, if any
    async fn disconnect(&self);
}
