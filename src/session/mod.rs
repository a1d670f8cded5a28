//! Session lifecycle: connection state machine, reconnect backoff, and the
//! credential store that lets a restarted process resume without pairing.

pub mod backoff;
pub mod credentials;
pub mod lifecycle;
pub mod state;

#[cfg(test)]
mod proptests;

pub use backoff::{Backoff, BackoffConfig, ReconnectPolicy};
pub use credentials::{CredentialError, CredentialResult, CredentialStore, FileCredentialStore};
pub use lifecycle::{
    ConnectionHandle, ConnectionManager, LifecycleConfig, LifecycleError, Termination,
};
pub use state::{ConnectionState, LifecycleEvent, ReconnectDiagnostics, SessionEvent};
