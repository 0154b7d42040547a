// =============================================================================
// controller.rs — THE FRONT DESK
// =============================================================================
//
// Everything callers do goes through here: record a fingerprint, look
// fingerprints up, delete one, or ask who is sharing a fingerprint with whom.
//
// The interesting part is insert. "Insert only if this exact user +
// identifiers combination is not already on file" takes two probes:
//
// 1. A cheap read-only probe. Most repeat visits end here.
// 2. A second, identical probe INSIDE the read-write transaction, right
//    before the write. The first probe is not a lock; two identical inserts
//    racing each other can both pass it. Only one of them can hold the
//    writer, and whoever gets there second sees the first one's entry.
//
// Skip step 2 and concurrent identical inserts both succeed. Ask us how we
// know. (Please don't.)
// =============================================================================

use reqwest::header::HeaderMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::duplicates::{self, Duplicates};
use crate::error::{FingerprintError, Result};
use crate::filters::{match_filters, user_match_filters, Filter, FilteringOpts};
use crate::memory_store::MemoryStore;
use crate::metrics::{FingerprintStats, StatsSnapshot};
use crate::models::{user_agent_key, Entry, EntryId, Identifiers, Relationship};
use crate::store::{ReadTxn, Store};

/// Management layer over a `Store`.
pub struct Controller<S: Store = MemoryStore> {
    store: S,
    stats: Arc<FingerprintStats>,
}

impl Controller<MemoryStore> {
    /// A controller over an empty in-memory store with every index declared.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new(&Relationship::ALL))
    }

    /// A controller over a memory store built from `config`, loading the
    /// snapshot file if one is configured.
    pub fn open(config: &Config) -> Result<Self> {
        let store = match &config.snapshot_path {
            Some(path) => MemoryStore::open(&config.relationships, path)?,
            None => MemoryStore::new(&config.relationships),
        };

        Ok(Self::new(store))
    }
}

impl<S: Store> Controller<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            stats: Arc::new(FingerprintStats::new()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current operation counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Record a fingerprint for `user_id` unless that exact combination is
    /// already on file.
    ///
    /// Returns `Ok(true)` if a new entry was written and `Ok(false)` if it
    /// already existed. An existing entry is not an error.
    pub fn insert(&self, user_id: &str, identifiers: Identifiers) -> Result<bool> {
        let entry = Entry::new(user_id, identifiers);
        if let Err(errs) = entry.validate() {
            self.stats.increment_rejected();
            warn!(user_id = %user_id, error = %errs, "Fingerprint rejected");
            return Err(errs.into());
        }

        let filters = user_match_filters(user_id, &entry.identifiers);

        if self.store.read(|txn| entry_exists(txn, &filters))? {
            self.stats.increment_skipped(false);
            debug!(user_id = %user_id, "Fingerprint already on file — insert skipped");
            return Ok(false);
        }

        let inserted = self.store.batch(|txn| {
            // Same probe again, now that we hold the writer
            if entry_exists(&*txn, &filters)? {
                return Ok(None);
            }

            txn.insert(entry).map(Some)
        })?;

        match inserted {
            Some(entry) => {
                self.stats.increment_inserted();
                info!(
                    entry_id = %entry.id,
                    user_id = %entry.user_id,
                    ip = %entry.identifiers.ip_address,
                    "New fingerprint recorded"
                );
                Ok(true)
            }
            None => {
                self.stats.increment_skipped(true);
                debug!(
                    user_id = %user_id,
                    "Fingerprint appeared between probes — insert skipped"
                );
                Ok(false)
            }
        }
    }

    /// Record the fingerprint carried by a request's headers.
    pub fn insert_from_headers(
        &self,
        user_id: &str,
        headers: &HeaderMap,
        remote_addr: &str,
    ) -> Result<bool> {
        self.insert(user_id, Identifiers::from_headers(headers, remote_addr))
    }

    /// The entry with the given id, or `FingerprintError::NotFound`.
    pub fn get(&self, id: EntryId) -> Result<Entry> {
        self.store.read(|txn| txn.get(id))
    }

    /// Every entry recorded for a user.
    pub fn get_by_user(&self, user_id: &str) -> Result<Vec<Entry>> {
        self.get_filtered(vec![Filter::matching(Relationship::Users, user_id)])
    }

    /// Every entry recorded from an IP address.
    pub fn get_by_ip(&self, ip_address: &str) -> Result<Vec<Entry>> {
        self.get_filtered(vec![Filter::matching(Relationship::IpAddresses, ip_address)])
    }

    /// Every entry recorded with a user agent. Pass the raw string; it is
    /// hashed here.
    pub fn get_by_user_agent(&self, user_agent: &str) -> Result<Vec<Entry>> {
        self.get_filtered(vec![Filter::matching(
            Relationship::UserAgents,
            user_agent_key(user_agent),
        )])
    }

    /// Every entry matching all present identifiers, regardless of user.
    ///
    /// Empty identifiers are ignored, so an all-empty set returns every
    /// entry.
    pub fn get_matches(&self, identifiers: &Identifiers) -> Result<Vec<Entry>> {
        self.get_filtered(match_filters(identifiers))
    }

    /// One page of `get_matches`: at most `limit` entries with ids after
    /// `last_id`.
    pub fn get_matches_page(
        &self,
        identifiers: &Identifiers,
        last_id: Option<EntryId>,
        limit: Option<usize>,
    ) -> Result<Vec<Entry>> {
        let opts = FilteringOpts {
            filters: match_filters(identifiers),
            last_id,
            limit,
        };
        self.store.read(|txn| txn.get_filtered(&opts))
    }

    /// Every signature shared by two or more distinct users.
    pub fn get_duplicates(&self) -> Result<Duplicates> {
        self.scan(None)
    }

    /// `get_duplicates`, abandoned with `FingerprintError::Cancelled` as soon
    /// as `cancel` reads `true`.
    pub fn get_duplicates_until(&self, cancel: &watch::Receiver<bool>) -> Result<Duplicates> {
        self.scan(Some(cancel))
    }

    fn scan(&self, cancel: Option<&watch::Receiver<bool>>) -> Result<Duplicates> {
        let result = self.store.read(|txn| duplicates::scan(txn, cancel));
        match &result {
            Ok(_) => self.stats.increment_scans(false),
            Err(FingerprintError::Cancelled { .. }) => self.stats.increment_scans(true),
            Err(_) => {}
        }
        result
    }

    /// Visit every entry in id order. Return `ControlFlow::Break` to stop.
    ///
    /// `f` sees the entries as of the call and runs outside any
    /// transaction, so it is free to call back into the controller.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&Entry) -> Result<ControlFlow<()>>,
    {
        let entries = self.get_filtered(Vec::new())?;
        for entry in &entries {
            if f(entry)?.is_break() {
                break;
            }
        }

        Ok(())
    }

    /// Delete an entry, returning what was removed.
    pub fn delete(&self, id: EntryId) -> Result<Entry> {
        let removed = self.store.batch(|txn| txn.remove(id))?;
        self.stats.increment_deleted();
        info!(entry_id = %removed.id, user_id = %removed.user_id, "Fingerprint deleted");
        Ok(removed)
    }

    /// Close the underlying store.
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    fn get_filtered(&self, filters: Vec<Filter>) -> Result<Vec<Entry>> {
        let opts = FilteringOpts::new(filters);
        self.store.read(|txn| txn.get_filtered(&opts))
    }
}

/// True if at least one entry matches every filter. Zero matches is a plain
/// `false`; only a real storage failure is an error.
fn entry_exists<T>(txn: &T, filters: &[Filter]) -> Result<bool>
where
    T: ReadTxn + ?Sized,
{
    Ok(txn.cursor(filters)?.next().transpose()?.is_some())
}
