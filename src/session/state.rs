//! Connection states and the events the lifecycle manager publishes.

use crate::address::Address;
use crate::transport::{DisconnectCause, MembershipEvent};
use std::fmt;
use std::time::Duration;

/// Session state machine
///
/// ```text
/// Disconnected -> Pairing -> Open
/// Disconnected -> Connecting -> Open -> Disconnected (loop)
/// Open -> LoggedOut (terminal)
/// Disconnected -> Failed (terminal, retries exhausted or fatal connect)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    /// Session started without credentials; waiting for the operator to pair
    Pairing,
    Connecting,
    Open,
    LoggedOut,
    Failed,
}

impl ConnectionState {
    /// No further automatic connection attempts happen from here
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::LoggedOut | ConnectionState::Failed)
    }

    /// A session exists (or is being established)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Pairing | ConnectionState::Connecting | ConnectionState::Open
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Pairing => "pairing",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::LoggedOut => "logged-out",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Reconnect bookkeeping, reset on every successful open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectDiagnostics {
    /// Close-then-retry cycles since the last open
    pub attempts: u32,
    /// Delay used for the most recently scheduled attempt
    pub current_delay: Duration,
}

/// Published to external collaborators (pairing display, operator output)
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    StateChanged(ConnectionState),
    PairingChallenge(String),
    Opened { own_address: Address },
    Disconnected { cause: DisconnectCause },
    ReconnectScheduled { attempt: u32, delay: Duration },
    LoggedOut,
    RetriesExhausted { attempts: u32 },
}

/// Forwarded to the dispatcher, in the order the transport delivered them
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened { own_address: Address },
    Membership(MembershipEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::LoggedOut.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Open.is_terminal());
    }

    #[test]
    fn test_active_states() {
        assert!(ConnectionState::Pairing.is_active());
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Open.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(!ConnectionState::LoggedOut.is_active());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::LoggedOut.to_string(), "logged-out");
        assert_eq!(ConnectionState::Open.to_string(), "open");
    }
}
