//! Notification Dispatcher
//!
//! Consumes session events from the lifecycle manager and greets members
//! added to groups, at most once per dedup key.
//!
//! Per recipient, in array order:
//! 1. normalize; skip the session's own identity
//! 2. compute the dedup key; skip when already committed
//! 3. render and send
//! 4. on success, commit the key to the ledger; on failure record it and
//!    move on to the next recipient

use super::ledger::{DedupLedger, LedgerEntry, LedgerError};
use super::pacing::Pacing;
use super::policy::{DedupKey, DedupPolicy};
use super::template::GreetingTemplate;
use crate::address::{Address, AddressNormalizer};
use crate::session::SessionEvent;
use crate::shutdown::ShutdownListener;
use crate::time::now_rfc3339;
use crate::transport::{GroupId, MembershipAction, MembershipEvent, Transport};
use std::collections::HashSet;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const DEFAULT_MAX_LEDGER_FAILURES: u32 = 3;

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub policy: DedupPolicy,
    pub template: GreetingTemplate,
    /// Spacing between consecutive sends; `None` sends back to back
    pub pacing: Option<Pacing>,
    /// Consecutive ledger write failures tolerated before giving up
    pub max_ledger_failures: u32,
    /// Groups re-scanned after every successful open
    pub reconcile_groups: Vec<GroupId>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            policy: DedupPolicy::default(),
            template: GreetingTemplate::default(),
            pacing: None,
            max_ledger_failures: DEFAULT_MAX_LEDGER_FAILURES,
            reconcile_groups: Vec::new(),
        }
    }
}

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("ledger unavailable after {failures} consecutive write failures: {source}")]
    LedgerUnavailable {
        failures: u32,
        #[source]
        source: LedgerError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSend {
    pub recipient: Address,
    pub reason: String,
}

/// Outcome of one `notify_members_added` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: Vec<Address>,
    /// Already in the ledger, or repeated within the batch
    pub duplicates: Vec<Address>,
    pub failed: Vec<FailedSend>,
    /// The session's own identity was among the added members
    pub bot_joined: bool,
    /// Shutdown stopped the batch before every recipient was handled
    pub interrupted: bool,
}

/// Idempotent greeting dispatcher
pub struct NotificationDispatcher<T: Transport> {
    transport: T,
    ledger: DedupLedger,
    normalizer: AddressNormalizer,
    config: DispatchConfig,
    own_address: Option<Address>,
    ledger_failures: u32,
    shutdown: Option<ShutdownListener>,
}

impl<T: Transport> NotificationDispatcher<T> {
    pub fn new(
        transport: T,
        ledger: DedupLedger,
        normalizer: AddressNormalizer,
        config: DispatchConfig,
    ) -> Self {
        Self {
            transport,
            ledger,
            normalizer,
            config,
            own_address: None,
            ledger_failures: 0,
            shutdown: None,
        }
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    /// Identity of the current session; never greeted
    pub fn set_own_address(&mut self, address: &Address) {
        self.own_address = Some(self.normalizer.normalize(address));
    }

    /// Greet every newly added member of `group` that has not been greeted
    /// under the configured policy.
    ///
    /// Send failures are isolated to their recipient. Only repeated ledger
    /// write failures are returned as an error.
    pub async fn notify_members_added(
        &mut self,
        group: &GroupId,
        addresses: &[Address],
        group_name: &str,
    ) -> Result<DispatchReport, DispatchError> {
        let mut report = DispatchReport::default();
        let mut seen: HashSet<DedupKey> = HashSet::new();
        let mut sent_in_batch = false;

        for raw in addresses {
            let recipient = self.normalizer.normalize(raw);
            if recipient.is_empty() {
                warn!(raw = %raw, group = %group, "Ignoring empty address");
                continue;
            }

            if self.own_address.as_ref() == Some(&recipient) {
                info!(group = %group, "Bot joined group");
                report.bot_joined = true;
                continue;
            }

            let key = self.config.policy.key(group, &recipient);
            if !seen.insert(key.clone()) || self.ledger.contains(&key) {
                info!(recipient = %recipient, group = %group, "Already greeted, skipping");
                report.duplicates.push(recipient);
                continue;
            }

            if sent_in_batch && !self.pace().await {
                info!(group = %group, "Shutdown during batch; remaining recipients left for later");
                report.interrupted = true;
                break;
            }
            sent_in_batch = true;

            let text = self.config.template.render(group_name, SystemTime::now());
            if let Err(e) = self.transport.send_message(&recipient, &text).await {
                warn!(recipient = %recipient, group = %group, error = %e, "Greeting send failed");
                report.failed.push(FailedSend {
                    recipient,
                    reason: e.to_string(),
                });
                continue;
            }

            let entry = LedgerEntry {
                recipient: recipient.clone(),
                group: group.clone(),
                sent_at: now_rfc3339(),
            };
            match self.ledger.record(key, entry) {
                Ok(()) => {
                    self.ledger_failures = 0;
                    info!(recipient = %recipient, group = %group, "Greeting sent");
                    report.sent.push(recipient);
                }
                Err(e) => {
                    self.ledger_failures += 1;
                    error!(
                        recipient = %recipient,
                        group = %group,
                        error = %e,
                        failures = self.ledger_failures,
                        "Greeting sent but not recorded; recipient stays eligible"
                    );
                    report.failed.push(FailedSend {
                        recipient,
                        reason: e.to_string(),
                    });
                    if self.ledger_failures >= self.config.max_ledger_failures {
                        return Err(DispatchError::LedgerUnavailable {
                            failures: self.ledger_failures,
                            source: e,
                        });
                    }
                }
            }
        }

        Ok(report)
    }

    /// Greet members of the configured groups who joined while disconnected
    pub async fn reconcile(&mut self) -> Result<(), DispatchError> {
        for group in self.config.reconcile_groups.clone() {
            match self.transport.fetch_group_members(&group).await {
                Ok(members) => {
                    debug!(group = %group, members = members.len(), "Reconciling group");
                    let report = self
                        .notify_members_added(&group, &members, group.as_str())
                        .await?;
                    if !report.sent.is_empty() {
                        info!(group = %group, sent = report.sent.len(), "Reconciliation greeted members");
                    }
                    if report.interrupted {
                        break;
                    }
                }
                Err(e) => {
                    warn!(group = %group, error = %e, "Reconciliation fetch failed");
                }
            }
        }
        Ok(())
    }

    /// Apply one session event
    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<(), DispatchError> {
        match event {
            SessionEvent::Opened { own_address } => {
                self.set_own_address(&own_address);
                self.reconcile().await
            }
            SessionEvent::Membership(MembershipEvent {
                group,
                action: MembershipAction::Add,
                affected,
                group_name,
                ..
            }) => {
                let name = group_name.unwrap_or_else(|| group.to_string());
                let report = self.notify_members_added(&group, &affected, &name).await?;
                debug!(
                    group = %group,
                    sent = report.sent.len(),
                    duplicates = report.duplicates.len(),
                    failed = report.failed.len(),
                    "Membership add handled"
                );
                Ok(())
            }
            SessionEvent::Membership(event) => {
                debug!(group = %event.group, action = ?event.action, "Ignoring membership change");
                Ok(())
            }
        }
    }

    /// Consume session events until shutdown or the sender side closes,
    /// then flush the ledger.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        shutdown: ShutdownListener,
    ) -> Result<(), DispatchError> {
        let mut stop = shutdown.clone();
        self.shutdown = Some(shutdown);

        let result = loop {
            let event = tokio::select! {
                biased;
                _ = stop.triggered() => break Ok(()),
                event = events.recv() => event,
            };
            let Some(event) = event else {
                debug!("Session event channel closed");
                break Ok(());
            };
            if let Err(e) = self.handle_event(event).await {
                error!(error = %e, "Dispatcher stopping");
                break Err(e);
            }
        };

        if let Err(e) = self.ledger.flush() {
            error!(error = %e, "Final ledger flush failed");
        }
        info!(entries = self.ledger.len(), "Dispatcher stopped");
        result
    }

    /// Wait out the pacing delay. `false` when shutdown cut it short.
    async fn pace(&mut self) -> bool {
        let Some(pacing) = self.config.pacing else {
            return true;
        };
        let delay = pacing.next_delay();
        match self.shutdown.as_mut() {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = shutdown.triggered() => false,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}
