//! Dedup policy: what counts as "already greeted".

use crate::address::Address;
use crate::transport::GroupId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Greet each person at most once, across all groups
    Global,
    /// Greet each person once per group
    #[default]
    PerGroup,
}

impl DedupPolicy {
    /// Key for an already-normalized address.
    ///
    /// Per-group keys are `group/address` with `%` and `/` percent-escaped in
    /// both parts, so the separator is unambiguous.
    pub fn key(&self, group: &GroupId, address: &Address) -> DedupKey {
        match self {
            DedupPolicy::Global => DedupKey(address.as_str().to_string()),
            DedupPolicy::PerGroup => DedupKey(format!(
                "{}/{}",
                escape_component(group.as_str()),
                escape_component(address.as_str())
            )),
        }
    }
}

fn escape_component(raw: &str) -> String {
    raw.replace('%', "%25").replace('/', "%2F")
}

impl fmt::Display for DedupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupPolicy::Global => f.write_str("global"),
            DedupPolicy::PerGroup => f.write_str("per_group"),
        }
    }
}

/// Identifier under which the ledger tracks a greeting
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(pub String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
