//! Dedup Ledger
//!
//! Durable record of who has already been greeted. Owned by the dispatcher;
//! nothing else mutates it.
//!
//! On-disk layout:
//!
//! ```json
//! { "entries": { "<dedupKey>": { "recipient": "...", "group": "...", "sentAt": "..." } } }
//! ```
//!
//! Every mutation rewrites the whole document through [`atomic_write`], so a
//! crash mid-write leaves the previously committed file intact.
//!
//! Entries are committed *after* the send is acknowledged. A crash between
//! the two can produce one duplicate greeting on restart; the remote network
//! offers nothing to make the pair transactional.

use super::policy::{DedupKey, DedupPolicy};
use crate::address::{Address, AddressNormalizer};
use crate::persistence::{atomic_write, read_optional};
use crate::time::now_rfc3339;
use crate::transport::GroupId;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("IO error on ledger '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ledger '{path}' is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode ledger: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub recipient: Address,
    pub group: GroupId,
    /// RFC 3339
    pub sent_at: String,
}

#[derive(Deserialize)]
struct LedgerDocument {
    #[serde(default)]
    entries: BTreeMap<DedupKey, LedgerEntry>,

    /// Older layout: group -> greeted addresses
    #[serde(default)]
    welcomed: Option<BTreeMap<GroupId, Vec<Address>>>,
}

/// What reading the file changed relative to its stored form
struct LoadChanges {
    /// Entries whose key or recipient was rebuilt under the active policy
    rekeyed: usize,
    /// Entries imported from the older layout, if the file used it
    imported: Option<usize>,
}

impl LoadChanges {
    fn needs_rewrite(&self) -> bool {
        self.rekeyed > 0 || self.imported.is_some()
    }
}

#[derive(Serialize)]
struct LedgerSnapshot<'a> {
    entries: &'a BTreeMap<DedupKey, LedgerEntry>,
}

/// In-memory ledger mirrored to a JSON file
#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    entries: BTreeMap<DedupKey, LedgerEntry>,
}

impl DedupLedger {
    /// Open the ledger at `path`, creating an empty one when absent.
    ///
    /// Keys are rebuilt from each entry's recipient and group under `policy`,
    /// so a ledger written under the other policy (or an older normalizer)
    /// still blocks every committed recipient/group pair. Entries that
    /// collapse onto one key keep the earliest `sentAt`.
    ///
    /// A file in the older `welcomed` layout is imported under `policy`.
    /// Either change rewrites the file atomically. An unreadable file is an
    /// error; the caller must not proceed with an empty ledger in its place.
    pub fn load(
        path: impl AsRef<Path>,
        policy: DedupPolicy,
        normalizer: &AddressNormalizer,
    ) -> LedgerResult<Self> {
        let path = path.as_ref();
        let Some((ledger, changes)) = Self::read(path, policy, normalizer)? else {
            let ledger = Self {
                path: path.to_path_buf(),
                entries: BTreeMap::new(),
            };
            ledger.persist()?;
            info!(path = %ledger.path.display(), "Created empty ledger");
            return Ok(ledger);
        };

        if changes.needs_rewrite() {
            ledger.persist()?;
        }
        if changes.rekeyed > 0 {
            info!(
                rekeyed = changes.rekeyed,
                policy = %policy,
                path = %ledger.path.display(),
                "Rebuilt ledger keys for the active dedup policy"
            );
        }
        if let Some(imported) = changes.imported {
            info!(imported, path = %ledger.path.display(), "Imported legacy ledger layout");
        }
        Ok(ledger)
    }

    /// Read the ledger without creating or rewriting anything. `None` when
    /// the file does not exist.
    pub fn inspect(
        path: impl AsRef<Path>,
        policy: DedupPolicy,
        normalizer: &AddressNormalizer,
    ) -> LedgerResult<Option<Self>> {
        Ok(Self::read(path.as_ref(), policy, normalizer)?.map(|(ledger, _)| ledger))
    }

    /// Parse the file and bring it in line with `policy`, in memory only
    fn read(
        path: &Path,
        policy: DedupPolicy,
        normalizer: &AddressNormalizer,
    ) -> LedgerResult<Option<(Self, LoadChanges)>> {
        let bytes = read_optional(path).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let document: LedgerDocument =
            serde_json::from_slice(&bytes).map_err(|source| LedgerError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;

        let mut ledger = Self {
            path: path.to_path_buf(),
            entries: BTreeMap::new(),
        };
        let rekeyed = ledger.adopt(document.entries, policy, normalizer);
        let imported = document
            .welcomed
            .map(|welcomed| ledger.import_legacy(welcomed, policy, normalizer));

        Ok(Some((ledger, LoadChanges { rekeyed, imported })))
    }

    /// Insert stored entries under keys derived for `policy`. Returns how
    /// many entries changed key or recipient.
    fn adopt(
        &mut self,
        stored: BTreeMap<DedupKey, LedgerEntry>,
        policy: DedupPolicy,
        normalizer: &AddressNormalizer,
    ) -> usize {
        let mut rekeyed = 0;
        for (stored_key, mut entry) in stored {
            let recipient = normalizer.normalize(&entry.recipient);
            // Nothing to derive a key from; keep it as written
            let key = if recipient.is_empty() {
                stored_key.clone()
            } else {
                policy.key(&entry.group, &recipient)
            };
            if key != stored_key || (!recipient.is_empty() && recipient != entry.recipient) {
                rekeyed += 1;
            }
            if !recipient.is_empty() {
                entry.recipient = recipient;
            }

            match self.entries.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
                Entry::Occupied(mut slot) => {
                    // RFC 3339 UTC strings order chronologically
                    if entry.sent_at < slot.get().sent_at {
                        slot.insert(entry);
                    }
                }
            }
        }
        rekeyed
    }

    fn import_legacy(
        &mut self,
        welcomed: BTreeMap<GroupId, Vec<Address>>,
        policy: DedupPolicy,
        normalizer: &AddressNormalizer,
    ) -> usize {
        let imported_at = now_rfc3339();
        let mut imported = 0;
        for (group, addresses) in welcomed {
            for raw in addresses {
                let recipient = normalizer.normalize(&raw);
                if recipient.is_empty() {
                    continue;
                }
                let key = policy.key(&group, &recipient);
                if !self.entries.contains_key(&key) {
                    self.entries.insert(
                        key,
                        LedgerEntry {
                            recipient,
                            group: group.clone(),
                            sent_at: imported_at.clone(),
                        },
                    );
                    imported += 1;
                }
            }
        }
        imported
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &DedupKey) -> Option<&LedgerEntry> {
        self.entries.get(key)
    }

    /// Insert and persist. On a persist failure the in-memory insert is
    /// rolled back so the recipient stays eligible for a later retry.
    pub fn record(&mut self, key: DedupKey, entry: LedgerEntry) -> LedgerResult<()> {
        let previous = self.entries.insert(key.clone(), entry);
        if let Err(e) = self.persist() {
            match previous {
                Some(previous) => {
                    self.entries.insert(key, previous);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Rewrite the file from memory
    pub fn flush(&self) -> LedgerResult<()> {
        self.persist()
    }

    fn persist(&self) -> LedgerResult<()> {
        let snapshot = LedgerSnapshot {
            entries: &self.entries,
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        atomic_write(&self.path, &json).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DedupKey, &LedgerEntry)> {
        self.entries.iter()
    }

    /// Entry count per group
    pub fn group_counts(&self) -> BTreeMap<GroupId, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.group.clone()).or_insert(0) += 1;
        }
        counts
    }
}
