//! Connection Lifecycle Manager
//!
//! Owns the transport session and drives it through the state machine in
//! [`ConnectionState`]. Reconnection is an explicit loop (connect, drive the
//! session until it closes, sleep the backoff delay, repeat) so arbitrarily
//! many reconnects never deepen the call stack.
//!
//! Guarantees:
//! - at most one session at a time (`connect()` refuses while active)
//! - credentials are persisted before the next transport event is handled
//! - an authoritative logout ends the loop; nothing reconnects afterwards
//! - shutdown cancels any pending backoff sleep

use super::backoff::{Backoff, BackoffConfig};
use super::credentials::{CredentialError, CredentialStore};
use super::state::{ConnectionState, LifecycleEvent, ReconnectDiagnostics, SessionEvent};
use crate::address::Address;
use crate::shutdown::ShutdownListener;
use crate::transport::{DisconnectCause, EventStream, Transport, TransportError, TransportEvent};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const LIFECYCLE_EVENT_CAPACITY: usize = 64;

/// Lifecycle manager settings
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    /// Bound on a single `Transport::connect` call
    pub connect_timeout: Duration,
    /// Bound on Connecting -> Open when resuming with credentials
    pub handshake_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
        }
    }
}

/// How `ConnectionManager::run` ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Shutdown was requested
    Shutdown,
    /// The remote invalidated the session; re-pairing is required
    LoggedOut,
    /// The reconnect policy gave up
    RetriesExhausted { attempts: u32 },
}

/// Lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("connect() refused: session is already {0}")]
    AlreadyActive(ConnectionState),

    #[error("session is {0}; a restart is required")]
    Terminal(ConnectionState),

    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    #[error("credential store: {0}")]
    Credentials(#[from] CredentialError),
}

/// Read-only view of a manager, cheap to clone into other tasks
#[derive(Clone)]
pub struct ConnectionHandle {
    state: watch::Receiver<ConnectionState>,
    diagnostics: watch::Receiver<ReconnectDiagnostics>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl ConnectionHandle {
    pub fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn diagnostics(&self) -> ReconnectDiagnostics {
        *self.diagnostics.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Wait until the manager reports `target`
    pub async fn wait_for_state(&self, target: ConnectionState) -> ConnectionState {
        let mut rx = self.state.clone();
        if rx.wait_for(|state| *state == target).await.is_ok() {
            return target;
        }
        // Manager gone; report where it stopped
        let last = *rx.borrow();
        last
    }
}

/// Why a session stopped being driven
enum SessionEnd {
    Closed(DisconnectCause),
    Shutdown,
}

/// Connection lifecycle manager
pub struct ConnectionManager<T: Transport, S: CredentialStore> {
    transport: T,
    store: S,
    config: LifecycleConfig,
    backoff: Backoff,
    state_tx: watch::Sender<ConnectionState>,
    diagnostics_tx: watch::Sender<ReconnectDiagnostics>,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    dispatch_tx: mpsc::UnboundedSender<SessionEvent>,
    session: Option<EventStream>,
    handshake_deadline: Option<Instant>,
    own_address: Option<Address>,
}

impl<T: Transport, S: CredentialStore> ConnectionManager<T, S> {
    pub fn new(
        transport: T,
        store: S,
        config: LifecycleConfig,
        dispatch_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (diagnostics_tx, _) = watch::channel(ReconnectDiagnostics::default());
        let (lifecycle_tx, _) = broadcast::channel(LIFECYCLE_EVENT_CAPACITY);
        let backoff = Backoff::new(config.backoff.clone());

        Self {
            transport,
            store,
            config,
            backoff,
            state_tx,
            diagnostics_tx,
            lifecycle_tx,
            dispatch_tx,
            session: None,
            handshake_deadline: None,
            own_address: None,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            state: self.state_tx.subscribe(),
            diagnostics: self.diagnostics_tx.subscribe(),
            events: self.lifecycle_tx.clone(),
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Own identity reported by the last successful open
    pub fn own_address(&self) -> Option<&Address> {
        self.own_address.as_ref()
    }

    /// Start a session with stored credentials, or pair fresh without them.
    ///
    /// Refused while a session is Pairing / Connecting / Open, so a second
    /// concurrent session can never be created.
    pub async fn connect(&mut self) -> Result<(), LifecycleError> {
        let state = self.current_state();
        if state.is_active() {
            return Err(LifecycleError::AlreadyActive(state));
        }
        if state.is_terminal() {
            return Err(LifecycleError::Terminal(state));
        }

        let credential = self.store.load()?;
        if credential.is_some() {
            self.set_state(ConnectionState::Connecting);
        } else {
            info!("No stored credentials, starting fresh pairing");
            self.set_state(ConnectionState::Pairing);
        }

        let attempt = tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(credential.as_ref()),
        )
        .await;

        match attempt {
            Ok(Ok(stream)) => {
                self.session = Some(stream);
                self.handshake_deadline = credential
                    .is_some()
                    .then(|| Instant::now() + self.config.handshake_timeout);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                Err(LifecycleError::Connect(e))
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                Err(LifecycleError::Connect(TransportError::Timeout(format!(
                    "connect exceeded {:?}",
                    self.config.connect_timeout
                ))))
            }
        }
    }

    /// Drive sessions until logout, retry exhaustion, shutdown, or a fatal
    /// startup fault.
    pub async fn run(
        mut self,
        mut shutdown: ShutdownListener,
    ) -> Result<Termination, LifecycleError> {
        loop {
            if shutdown.is_triggered() {
                return Ok(self.stop().await);
            }

            let cause = match self.connect().await {
                Ok(()) => match self.drive_session(&mut shutdown).await {
                    Ok(SessionEnd::Closed(cause)) => cause,
                    Ok(SessionEnd::Shutdown) => return Ok(self.stop().await),
                    Err(e) => {
                        self.transport.disconnect().await;
                        self.set_state(ConnectionState::Failed);
                        return Err(e);
                    }
                },
                Err(LifecycleError::Connect(TransportError::Unauthorized)) => {
                    warn!("Stored credentials rejected by remote");
                    DisconnectCause::LoggedOut
                }
                Err(LifecycleError::Connect(e)) if e.is_transient() => {
                    warn!(error = %e, "Connect attempt failed");
                    match e {
                        TransportError::Timeout(_) => DisconnectCause::TimedOut,
                        _ => DisconnectCause::ConnectionLost,
                    }
                }
                Err(e) => {
                    error!(error = %e, "Fatal connect failure");
                    self.set_state(ConnectionState::Failed);
                    return Err(e);
                }
            };

            self.session = None;
            self.handshake_deadline = None;

            if cause.is_authoritative_logout() {
                self.transport.disconnect().await;
                self.set_state(ConnectionState::LoggedOut);
                self.publish(LifecycleEvent::LoggedOut);
                error!(
                    "Session logged out by remote; stored credentials are invalid and re-pairing is required"
                );
                return Ok(Termination::LoggedOut);
            }

            self.set_state(ConnectionState::Disconnected);

            let Some(delay) = self.backoff.next_delay() else {
                let attempts = self.backoff.attempts();
                self.transport.disconnect().await;
                self.set_state(ConnectionState::Failed);
                self.publish(LifecycleEvent::RetriesExhausted { attempts });
                error!(attempts, "Reconnect attempts exhausted; manual restart required");
                return Ok(Termination::RetriesExhausted { attempts });
            };

            let diagnostics = self.backoff.diagnostics();
            self.diagnostics_tx.send_replace(diagnostics);
            self.publish(LifecycleEvent::ReconnectScheduled {
                attempt: diagnostics.attempts,
                delay,
            });
            info!(
                attempt = diagnostics.attempts,
                delay_ms = delay.as_millis() as u64,
                cause = %cause,
                "Reconnect scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.triggered() => return Ok(self.stop().await),
            }
        }
    }

    async fn drive_session(
        &mut self,
        shutdown: &mut ShutdownListener,
    ) -> Result<SessionEnd, LifecycleError> {
        let Some(mut stream) = self.session.take() else {
            return Ok(SessionEnd::Closed(DisconnectCause::ConnectionClosed));
        };

        loop {
            let deadline = self.handshake_deadline;
            let event = tokio::select! {
                _ = shutdown.triggered() => return Ok(SessionEnd::Shutdown),
                _ = handshake_expiry(deadline) => {
                    warn!("Handshake did not complete in time");
                    self.transport.disconnect().await;
                    return Ok(SessionEnd::Closed(DisconnectCause::TimedOut));
                }
                event = stream.next() => event,
            };

            let Some(event) = event else {
                debug!("Transport event stream ended");
                return Ok(SessionEnd::Closed(DisconnectCause::ConnectionLost));
            };

            if let Some(cause) = self.handle_event(event).await? {
                return Ok(SessionEnd::Closed(cause));
            }
        }
    }

    /// Apply one transport event. Returns the cause when the session closed.
    async fn handle_event(
        &mut self,
        event: TransportEvent,
    ) -> Result<Option<DisconnectCause>, LifecycleError> {
        match event {
            TransportEvent::PairingChallenge(payload) => {
                self.handshake_deadline = None;
                if self.current_state() != ConnectionState::Pairing {
                    self.set_state(ConnectionState::Pairing);
                }
                info!("Pairing challenge received; waiting for the operator to pair");
                self.publish(LifecycleEvent::PairingChallenge(payload));
            }
            TransportEvent::Opened { own_address } => {
                self.handshake_deadline = None;
                self.backoff.reset();
                self.diagnostics_tx.send_replace(self.backoff.diagnostics());
                self.own_address = Some(own_address.clone());
                self.set_state(ConnectionState::Open);
                info!(own_address = %own_address, "Session open");
                self.publish(LifecycleEvent::Opened {
                    own_address: own_address.clone(),
                });
                self.forward(SessionEvent::Opened { own_address });
            }
            TransportEvent::Closed { cause } => {
                warn!(cause = %cause, "Session closed");
                self.publish(LifecycleEvent::Disconnected {
                    cause: cause.clone(),
                });
                return Ok(Some(cause));
            }
            TransportEvent::CredentialsUpdated(credential) => {
                if let Err(e) = self.store.save(&credential) {
                    error!(error = %e, "Failed to persist updated credentials");
                    return Err(e.into());
                }
                debug!("Updated credentials persisted");
                // The gateway keeps the old credentials valid until this lands
                if let Err(e) = self.transport.acknowledge_credentials(&credential).await {
                    warn!(error = %e, "Failed to acknowledge persisted credentials");
                }
            }
            TransportEvent::MembershipChanged(membership) => {
                self.forward(SessionEvent::Membership(membership));
            }
        }
        Ok(None)
    }

    async fn stop(&mut self) -> Termination {
        self.session = None;
        self.transport.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
        info!("Lifecycle manager stopped");
        Termination::Shutdown
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
            self.publish(LifecycleEvent::StateChanged(state));
        }
    }

    fn publish(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.lifecycle_tx.send(event);
    }

    fn forward(&self, event: SessionEvent) {
        if self.dispatch_tx.send(event).is_err() {
            warn!("Dispatcher is gone; session event dropped");
        }
    }
}

async fn handshake_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::backoff::ReconnectPolicy;
    use crate::session::credentials::{CredentialResult, FileCredentialStore};
    use crate::shutdown::Shutdown;
    use crate::transport::{Credential, MockTransport};
    use tempfile::TempDir;

    fn test_config(policy: ReconnectPolicy) -> LifecycleConfig {
        LifecycleConfig {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(20),
            backoff: BackoffConfig {
                policy,
                floor: Duration::from_secs(1),
                cap: Duration::from_secs(8),
                growth_factor: 2.0,
                max_attempts: 4,
                startup_attempts: 3,
            },
        }
    }

    fn opened() -> TransportEvent {
        TransportEvent::Opened {
            own_address: Address::from("bot@net"),
        }
    }

    struct Fixture {
        _dir: TempDir,
        transport: MockTransport,
        store: FileCredentialStore,
        dispatch_rx: mpsc::UnboundedReceiver<SessionEvent>,
        manager: ConnectionManager<MockTransport, FileCredentialStore>,
    }

    fn fixture(policy: ReconnectPolicy, credential: Option<Credential>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.bin"));
        if let Some(credential) = credential {
            store.save(&credential).unwrap();
        }
        let transport = MockTransport::new();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            transport.clone(),
            store.clone(),
            test_config(policy),
            dispatch_tx,
        );
        Fixture {
            _dir: dir,
            transport,
            store,
            dispatch_rx,
            manager,
        }
    }

    async fn next_matching(
        rx: &mut broadcast::Receiver<LifecycleEvent>,
        wanted: impl Fn(&LifecycleEvent) -> bool,
    ) -> LifecycleEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_reentrant_safe() {
        let mut f = fixture(ReconnectPolicy::Capped, Some(Credential(vec![1])));

        f.manager.connect().await.unwrap();
        assert_eq!(f.manager.current_state(), ConnectionState::Connecting);

        let second = f.manager.connect().await;
        assert!(matches!(
            second,
            Err(LifecycleError::AlreadyActive(ConnectionState::Connecting))
        ));
        assert_eq!(f.transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_credentials_enters_pairing() {
        let mut f = fixture(ReconnectPolicy::Capped, None);

        f.manager.connect().await.unwrap();
        assert_eq!(f.manager.current_state(), ConnectionState::Pairing);
        assert_eq!(f.transport.connect_credentials(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_uses_stored_credential() {
        let mut f = fixture(ReconnectPolicy::Capped, Some(Credential(vec![7, 7])));

        f.manager.connect().await.unwrap();
        assert_eq!(
            f.transport.connect_credentials(),
            vec![Some(Credential(vec![7, 7]))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_flow_persists_credentials_and_opens() {
        let f = fixture(ReconnectPolicy::Capped, None);
        let handle = f.manager.handle();
        let mut events = handle.subscribe();
        let mut dispatch_rx = f.dispatch_rx;
        let shutdown = Shutdown::new();

        f.transport.script_next_session(vec![
            TransportEvent::PairingChallenge("2@pairing-ref".to_string()),
            TransportEvent::CredentialsUpdated(Credential(b"fresh".to_vec())),
            opened(),
        ]);
        let task = tokio::spawn(f.manager.run(shutdown.listener()));

        let challenge = next_matching(&mut events, |e| {
            matches!(e, LifecycleEvent::PairingChallenge(_))
        })
        .await;
        assert_eq!(
            challenge,
            LifecycleEvent::PairingChallenge("2@pairing-ref".to_string())
        );

        handle.wait_for_state(ConnectionState::Open).await;
        assert_eq!(f.store.load().unwrap(), Some(Credential(b"fresh".to_vec())));
        assert_eq!(
            f.transport.acknowledged_credentials(),
            vec![Credential(b"fresh".to_vec())]
        );
        assert_eq!(
            dispatch_rx.recv().await,
            Some(SessionEvent::Opened {
                own_address: Address::from("bot@net")
            })
        );

        shutdown.trigger();
        assert_eq!(task.await.unwrap().unwrap(), Termination::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_close_reconnects_with_same_credentials() {
        let f = fixture(ReconnectPolicy::Capped, Some(Credential(vec![1])));
        let handle = f.manager.handle();
        let mut events = handle.subscribe();
        let shutdown = Shutdown::new();

        f.transport.script_next_session(vec![opened()]);
        f.transport.script_next_session(vec![opened()]);
        let task = tokio::spawn(f.manager.run(shutdown.listener()));

        next_matching(&mut events, |e| matches!(e, LifecycleEvent::Opened { .. })).await;
        f.transport
            .emit(TransportEvent::Closed {
                cause: DisconnectCause::ConnectionLost,
            })
            .unwrap();

        let scheduled = next_matching(&mut events, |e| {
            matches!(e, LifecycleEvent::ReconnectScheduled { .. })
        })
        .await;
        assert_eq!(
            scheduled,
            LifecycleEvent::ReconnectScheduled {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );

        next_matching(&mut events, |e| matches!(e, LifecycleEvent::Opened { .. })).await;
        assert_eq!(f.transport.connect_count(), 2);
        assert_eq!(
            f.transport.connect_credentials(),
            vec![Some(Credential(vec![1])), Some(Credential(vec![1]))]
        );
        // Open resets the counter
        assert_eq!(handle.diagnostics(), ReconnectDiagnostics::default());

        shutdown.trigger();
        assert_eq!(task.await.unwrap().unwrap(), Termination::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_is_terminal() {
        let f = fixture(ReconnectPolicy::Unbounded, Some(Credential(vec![1])));
        let handle = f.manager.handle();
        let mut events = handle.subscribe();
        let shutdown = Shutdown::new();

        f.transport.script_next_session(vec![
            opened(),
            TransportEvent::Closed {
                cause: DisconnectCause::LoggedOut,
            },
        ]);
        let task = tokio::spawn(f.manager.run(shutdown.listener()));

        assert_eq!(task.await.unwrap().unwrap(), Termination::LoggedOut);
        assert_eq!(handle.current_state(), ConnectionState::LoggedOut);
        next_matching(&mut events, |e| *e == LifecycleEvent::LoggedOut).await;

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(f.transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_credentials_count_as_logout() {
        let f = fixture(ReconnectPolicy::Capped, Some(Credential(vec![1])));
        f.transport.fail_next_connect(TransportError::Unauthorized);
        let shutdown = Shutdown::new();

        let result = f.manager.run(shutdown.listener()).await.unwrap();
        assert_eq!(result, Termination::LoggedOut);
        assert_eq!(f.transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capped_policy_gives_up() {
        let f = fixture(ReconnectPolicy::Capped, Some(Credential(vec![1])));
        let handle = f.manager.handle();
        let mut events = handle.subscribe();
        let shutdown = Shutdown::new();

        // Opens once, then every later connect fails
        f.transport.script_next_session(vec![opened()]);
        let task = tokio::spawn(f.manager.run(shutdown.listener()));
        next_matching(&mut events, |e| matches!(e, LifecycleEvent::Opened { .. })).await;

        for _ in 0..10 {
            f.transport
                .fail_next_connect(TransportError::Network("unreachable".to_string()));
        }
        f.transport
            .emit(TransportEvent::Closed {
                cause: DisconnectCause::ConnectionClosed,
            })
            .unwrap();

        let result = task.await.unwrap().unwrap();
        assert_eq!(result, Termination::RetriesExhausted { attempts: 4 });
        assert_eq!(handle.current_state(), ConnectionState::Failed);
        // initial connect + 4 retries
        assert_eq!(f.transport.connect_count(), 5);

        let mut delays = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let LifecycleEvent::ReconnectScheduled { delay, .. } = event {
                delays.push(delay.as_secs());
            }
        }
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_transient_failures_are_bounded() {
        let f = fixture(ReconnectPolicy::Unbounded, Some(Credential(vec![1])));
        for _ in 0..10 {
            f.transport
                .fail_next_connect(TransportError::Network("unreachable".to_string()));
        }
        let shutdown = Shutdown::new();

        let result = f.manager.run(shutdown.listener()).await.unwrap();
        assert_eq!(result, Termination::RetriesExhausted { attempts: 3 });
        assert_eq!(f.transport.connect_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_connect_error_surfaces() {
        let f = fixture(ReconnectPolicy::Capped, Some(Credential(vec![1])));
        let handle = f.manager.handle();
        f.transport
            .fail_next_connect(TransportError::Protocol("unsupported version".to_string()));
        let shutdown = Shutdown::new();

        let result = f.manager.run(shutdown.listener()).await;
        assert!(matches!(
            result,
            Err(LifecycleError::Connect(TransportError::Protocol(_)))
        ));
        assert_eq!(handle.current_state(), ConnectionState::Failed);
        assert_eq!(f.transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_is_transient() {
        let f = fixture(ReconnectPolicy::Capped, Some(Credential(vec![1])));
        let handle = f.manager.handle();
        let mut events = handle.subscribe();
        let shutdown = Shutdown::new();

        // First session never opens; the second does
        f.transport.script_next_session(vec![]);
        f.transport.script_next_session(vec![opened()]);
        let task = tokio::spawn(f.manager.run(shutdown.listener()));

        next_matching(&mut events, |e| matches!(e, LifecycleEvent::Opened { .. })).await;
        assert_eq!(f.transport.connect_count(), 2);
        assert_eq!(f.transport.disconnect_count(), 1);

        shutdown.trigger();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_reconnect() {
        let f = fixture(ReconnectPolicy::Capped, Some(Credential(vec![1])));
        let handle = f.manager.handle();
        let mut events = handle.subscribe();
        let shutdown = Shutdown::new();

        f.transport.script_next_session(vec![
            opened(),
            TransportEvent::Closed {
                cause: DisconnectCause::ConnectionLost,
            },
        ]);
        let task = tokio::spawn(f.manager.run(shutdown.listener()));

        next_matching(&mut events, |e| {
            matches!(e, LifecycleEvent::ReconnectScheduled { .. })
        })
        .await;
        shutdown.trigger();

        assert_eq!(task.await.unwrap().unwrap(), Termination::Shutdown);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.transport.connect_count(), 1);
        assert_eq!(handle.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_events_forwarded_in_order() {
        use crate::transport::{GroupId, MembershipAction, MembershipEvent};

        let f = fixture(ReconnectPolicy::Capped, Some(Credential(vec![1])));
        let mut dispatch_rx = f.dispatch_rx;
        let shutdown = Shutdown::new();

        let membership = |who: &str| {
            TransportEvent::MembershipChanged(MembershipEvent {
                group: GroupId::new("g1"),
                action: MembershipAction::Add,
                affected: vec![Address::from(who)],
                group_name: None,
                timestamp: 0,
            })
        };
        f.transport
            .script_next_session(vec![opened(), membership("a@net"), membership("b@net")]);
        let task = tokio::spawn(f.manager.run(shutdown.listener()));

        assert!(matches!(
            dispatch_rx.recv().await,
            Some(SessionEvent::Opened { .. })
        ));
        let first = dispatch_rx.recv().await.unwrap();
        let second = dispatch_rx.recv().await.unwrap();
        match (first, second) {
            (SessionEvent::Membership(a), SessionEvent::Membership(b)) => {
                assert_eq!(a.affected, vec![Address::from("a@net")]);
                assert_eq!(b.affected, vec![Address::from("b@net")]);
            }
            other => panic!("unexpected events: {:?}", other),
        }

        shutdown.trigger();
        task.await.unwrap().unwrap();
    }

    struct BrokenStore;

    impl CredentialStore for BrokenStore {
        fn load(&self) -> CredentialResult<Option<Credential>> {
            Ok(Some(Credential(vec![1])))
        }

        fn save(&self, _credential: &Credential) -> CredentialResult<()> {
            Err(CredentialError::Io {
                path: "/read-only/credentials.bin".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        fn clear(&self) -> CredentialResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_persist_failure_is_fatal() {
        let transport = MockTransport::new();
        let (dispatch_tx, _dispatch_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            transport.clone(),
            BrokenStore,
            test_config(ReconnectPolicy::Capped),
            dispatch_tx,
        );
        transport.script_next_session(vec![
            opened(),
            TransportEvent::CredentialsUpdated(Credential(vec![2])),
        ]);
        let shutdown = Shutdown::new();

        let result = manager.run(shutdown.listener()).await;
        assert!(matches!(result, Err(LifecycleError::Credentials(_))));
        assert_eq!(transport.connect_count(), 1);
        // Nothing is acknowledged that never reached disk
        assert!(transport.acknowledged_credentials().is_empty());
    }
}
