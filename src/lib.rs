//! Welcomer - group welcome bot core
//!
//! Greets members added to messaging-network groups exactly once per dedup
//! key, and keeps one long-lived session alive across transient disconnects.
//!
//! Key pieces:
//! - `session`: connection lifecycle state machine with reconnect backoff
//! - `dispatch`: idempotent greeting dispatch over a crash-safe ledger
//! - `transport`: the network capability set, a bridge client, and a mock
//!
//! The lifecycle manager and the dispatcher run as independent tasks joined
//! by an ordered event queue (see `bot`).

pub mod address;
pub mod bot;
pub mod dispatch;
pub mod persistence;
pub mod session;
pub mod shutdown;
pub mod time;
pub mod transport;
