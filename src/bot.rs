//! Welcome bot: the lifecycle manager and the dispatcher as two tasks joined
//! by an ordered session-event queue.
//!
//! Whichever task ends first takes the other one down through the shared
//! shutdown signal, so a logout, retry exhaustion, or ledger escalation
//! stops the whole bot.

use crate::address::AddressNormalizer;
use crate::dispatch::{DedupLedger, DispatchConfig, DispatchError, NotificationDispatcher};
use crate::session::{
    ConnectionHandle, ConnectionManager, CredentialStore, LifecycleConfig, LifecycleError,
    SessionEvent, Termination,
};
use crate::shutdown::Shutdown;
use crate::transport::Transport;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::info;

/// Bot errors
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("bot task failed: {0}")]
    Task(#[from] JoinError),
}

pub struct WelcomeBot<T: Transport, S: CredentialStore> {
    manager: ConnectionManager<T, S>,
    dispatcher: NotificationDispatcher<T>,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl<T: Transport, S: CredentialStore> WelcomeBot<T, S> {
    pub fn new(
        transport: T,
        store: S,
        lifecycle: LifecycleConfig,
        ledger: DedupLedger,
        normalizer: AddressNormalizer,
        dispatch: DispatchConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(transport.clone(), store, lifecycle, tx);
        let dispatcher = NotificationDispatcher::new(transport, ledger, normalizer, dispatch);
        Self {
            manager,
            dispatcher,
            session_events: rx,
        }
    }

    /// Lifecycle view for pairing display and status output
    pub fn handle(&self) -> ConnectionHandle {
        self.manager.handle()
    }

    /// Run until shutdown, logout, retry exhaustion, or a fatal error.
    ///
    /// The ledger is flushed before this returns.
    pub async fn run(self, shutdown: &Shutdown) -> Result<Termination, BotError> {
        let mut manager_task = tokio::spawn(self.manager.run(shutdown.listener()));
        let mut dispatcher_task = tokio::spawn(
            self.dispatcher
                .run(self.session_events, shutdown.listener()),
        );

        let (managed, dispatched) = tokio::select! {
            managed = &mut manager_task => {
                shutdown.trigger();
                (managed, dispatcher_task.await)
            }
            dispatched = &mut dispatcher_task => {
                shutdown.trigger();
                (manager_task.await, dispatched)
            }
        };

        // A dispatcher fault is the root cause when both stop
        dispatched??;
        let termination = managed??;
        info!(?termination, "Bot stopped");
        Ok(termination)
    }
}
