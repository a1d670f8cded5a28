//! Recipient addresses and their canonical form
//!
//! The network hands us addresses in several spellings for the same endpoint
//! (device suffixes, mixed case, formatted phone numbers, legacy domains).
//! Dedup only works if every spelling collapses to one canonical string, so
//! everything that reaches the ledger goes through [`AddressNormalizer`].
//!
//! Invariant: `normalize(normalize(x)) == normalize(x)`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A user or group endpoint on the messaging network
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Characters tolerated inside a formatted numeric user part
const NUMBER_FORMATTING: &[char] = &['+', '-', '(', ')', '.', ' '];

/// Canonicalizes raw addresses.
///
/// Rules, applied in order:
/// 1. trim and lowercase
/// 2. split `user@domain` at the first `@`
/// 3. drop a device suffix from the user part (`user:3` -> `user`)
/// 4. a user part made only of digits and phone formatting keeps the digits
/// 5. the domain is replaced through `domain_aliases`, or filled from
///    `default_domain` when missing
///
/// An address whose user part ends up empty normalizes to the empty address,
/// whatever its domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressNormalizer {
    /// Domain appended to bare user parts
    #[serde(default)]
    pub default_domain: Option<String>,

    /// Legacy domain -> canonical domain
    #[serde(default)]
    pub domain_aliases: BTreeMap<String, String>,
}

/// Normalizer configuration errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressConfigError {
    #[error("domain alias target '{0}' is itself an alias")]
    ChainedAlias(String),

    #[error("default domain '{0}' is an alias; use its target instead")]
    AliasedDefault(String),
}

impl AddressNormalizer {
    /// Reject alias tables that would make normalization non-idempotent
    pub fn validate(&self) -> Result<(), AddressConfigError> {
        for target in self.domain_aliases.values() {
            if self.alias_for(target).is_some() {
                return Err(AddressConfigError::ChainedAlias(target.clone()));
            }
        }
        if let Some(default) = &self.default_domain {
            if self.alias_for(default).is_some() {
                return Err(AddressConfigError::AliasedDefault(default.clone()));
            }
        }
        Ok(())
    }

    pub fn normalize(&self, raw: &Address) -> Address {
        let lowered = raw.0.trim().to_lowercase();

        let (user, domain) = match lowered.split_once('@') {
            Some((user, domain)) => (user, Some(domain.trim())),
            None => (lowered.as_str(), None),
        };

        let user = user.split(':').next().unwrap_or_default().trim();
        let user = if is_formatted_number(user) {
            user.chars().filter(char::is_ascii_digit).collect::<String>()
        } else {
            user.to_string()
        };
        if user.is_empty() {
            return Address(String::new());
        }

        let domain = match domain.filter(|d| !d.is_empty()) {
            Some(d) => Some(self.alias_for(d).unwrap_or_else(|| d.to_string())),
            None => self
                .default_domain
                .as_ref()
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty()),
        };

        match domain {
            Some(domain) => Address(format!("{}@{}", user, domain)),
            None => Address(user),
        }
    }

    fn alias_for(&self, domain: &str) -> Option<String> {
        let domain = domain.trim();
        self.domain_aliases
            .iter()
            .find(|(alias, _)| alias.trim().eq_ignore_ascii_case(domain))
            .map(|(_, canonical)| canonical.trim().to_lowercase())
    }
}

fn is_formatted_number(user: &str) -> bool {
    user.chars().any(|c| c.is_ascii_digit())
        && user
            .chars()
            .all(|c| c.is_ascii_digit() || NUMBER_FORMATTING.contains(&c))
}
