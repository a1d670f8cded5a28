//! Idempotent greeting dispatch: dedup policy, the durable ledger, greeting
//! rendering, send pacing, and the dispatcher task itself.

pub mod dispatcher;
pub mod ledger;
pub mod pacing;
pub mod policy;
pub mod template;

pub use dispatcher::{
    DispatchConfig, DispatchError, DispatchReport, FailedSend, NotificationDispatcher,
};
pub use ledger::{DedupLedger, LedgerEntry, LedgerError, LedgerResult};
pub use pacing::Pacing;
pub use policy::{DedupKey, DedupPolicy};
pub use template::{GreetingTemplate, DEFAULT_GREETING};
