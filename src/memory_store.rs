// =============================================================================
// memory_store.rs — THE VAULT (IN RAM, OPTIONALLY ON DISK)
// =============================================================================
//
// A complete Store: entries in a BTreeMap keyed by sequential id, and one
// ordered posting map per declared relationship (key -> set of entry ids).
// Because the posting maps are BTreeMaps, walking an index visits keys in
// sorted order, and every entry sharing a key comes out in one contiguous
// run. The duplicate scanner leans on exactly that.
//
// Transactions are a parking_lot RwLock:
// - read() holds a read guard for the whole closure, so the closure sees one
//   consistent state and never a half-applied write.
// - batch() holds the write guard, so read-write transactions are serialized.
//   Every mutation is journaled; if the closure fails, the journal is
//   replayed backwards and the tables look like nothing happened.
//
// If a snapshot path is configured, the store loads it on open and writes it
// back on close (write to a temp file, then rename over the old one).
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{FingerprintError, Result};
use crate::filters::Filter;
use crate::models::{Entry, EntryId, Relationship};
use crate::store::{EntryCursor, IndexCursor, ReadTxn, Store, WriteTxn};

/// key -> ids of entries filed under it
type Postings = BTreeMap<String, BTreeSet<EntryId>>;

#[derive(Debug, Default)]
struct Tables {
    entries: BTreeMap<EntryId, Entry>,
    indexes: BTreeMap<Relationship, Postings>,
    last_id: EntryId,
}

impl Tables {
    fn with_indexes(relationships: &[Relationship]) -> Self {
        Self {
            entries: BTreeMap::new(),
            indexes: relationships.iter().map(|r| (*r, Postings::new())).collect(),
            last_id: EntryId::UNASSIGNED,
        }
    }

    fn index(&self, relationship: Relationship) -> Result<&Postings> {
        self.indexes
            .get(&relationship)
            .ok_or(FingerprintError::UnknownIndex(relationship))
    }

    fn entry(&self, id: EntryId) -> Result<&Entry> {
        self.entries
            .get(&id)
            .ok_or_else(|| FingerprintError::Corruption(format!("index references missing entry {}", id)))
    }

    /// Ids matching every filter, ascending. The first filter seeds the
    /// candidate set; the rest are membership checks.
    fn matching_ids(&self, filters: &[Filter]) -> Result<Vec<EntryId>> {
        let Some((first, rest)) = filters.split_first() else {
            return Ok(self.entries.keys().copied().collect());
        };

        // Resolve every index up front so an undeclared one fails even when
        // the seed is empty.
        let seed = self.index(first.relationship)?.get(&first.value);
        let rest = rest
            .iter()
            .map(|f| Ok((self.index(f.relationship)?, f.value.as_str())))
            .collect::<Result<Vec<_>>>()?;

        let Some(seed) = seed else {
            return Ok(Vec::new());
        };

        Ok(seed
            .iter()
            .filter(|id| {
                rest.iter().all(|(postings, value)| {
                    postings.get(*value).is_some_and(|ids| ids.contains(*id))
                })
            })
            .copied()
            .collect())
    }

    fn file(&mut self, entry: &Entry) {
        for (relationship, key) in entry.relationships() {
            // Undeclared relationships are simply not maintained
            if let Some(postings) = self.indexes.get_mut(&relationship) {
                postings.entry(key).or_default().insert(entry.id);
            }
        }
    }

    fn unfile(&mut self, entry: &Entry) {
        for (relationship, key) in entry.relationships() {
            let Some(postings) = self.indexes.get_mut(&relationship) else {
                continue;
            };

            if let Some(ids) = postings.get_mut(&key) {
                ids.remove(&entry.id);
                if ids.is_empty() {
                    postings.remove(&key);
                }
            }
        }
    }

    fn put(&mut self, entry: Entry) {
        self.file(&entry);
        if entry.id > self.last_id {
            self.last_id = entry.id;
        }
        self.entries.insert(entry.id, entry);
    }

    fn take(&mut self, id: EntryId) -> Result<Entry> {
        let entry = self
            .entries
            .remove(&id)
            .ok_or(FingerprintError::NotFound(id))?;
        self.unfile(&entry);
        Ok(entry)
    }
}

impl ReadTxn for Tables {
    fn get(&self, id: EntryId) -> Result<Entry> {
        self.entries
            .get(&id)
            .cloned()
            .ok_or(FingerprintError::NotFound(id))
    }

    fn cursor(&self, filters: &[Filter]) -> Result<EntryCursor<'_>> {
        if filters.is_empty() {
            return Ok(Box::new(self.entries.values().cloned().map(Ok)));
        }

        let ids = self.matching_ids(filters)?;
        Ok(Box::new(
            ids.into_iter().map(move |id| self.entry(id).cloned()),
        ))
    }

    fn index_cursor(
        &self,
        relationship: Relationship,
        filters: &[Filter],
    ) -> Result<IndexCursor<'_>> {
        let postings = self.index(relationship)?;
        let allowed: Option<BTreeSet<EntryId>> = if filters.is_empty() {
            None
        } else {
            Some(self.matching_ids(filters)?.into_iter().collect())
        };

        Ok(Box::new(
            postings
                .iter()
                .flat_map(|(key, ids)| ids.iter().map(move |id| (key, *id)))
                .filter(move |(_, id)| allowed.as_ref().map_or(true, |a| a.contains(id)))
                .map(move |(key, id)| self.entry(id).map(|e| (key.clone(), e.clone()))),
        ))
    }
}

/// One journaled mutation, recorded so it can be undone.
enum Undo {
    Inserted(EntryId),
    Removed(Entry),
}

struct MemoryWriteTxn<'a> {
    tables: &'a mut Tables,
    journal: Vec<Undo>,
    last_id_before: EntryId,
}

impl MemoryWriteTxn<'_> {
    fn rollback(self) {
        let count = self.journal.len();
        for undo in self.journal.into_iter().rev() {
            match undo {
                Undo::Inserted(id) => {
                    // Present by construction, nothing else touched it
                    let _ = self.tables.take(id);
                }
                Undo::Removed(entry) => self.tables.put(entry),
            }
        }
        self.tables.last_id = self.last_id_before;
        debug!(undone = count, "Batch rolled back");
    }
}

impl ReadTxn for MemoryWriteTxn<'_> {
    fn get(&self, id: EntryId) -> Result<Entry> {
        self.tables.get(id)
    }

    fn cursor(&self, filters: &[Filter]) -> Result<EntryCursor<'_>> {
        self.tables.cursor(filters)
    }

    fn index_cursor(
        &self,
        relationship: Relationship,
        filters: &[Filter],
    ) -> Result<IndexCursor<'_>> {
        self.tables.index_cursor(relationship, filters)
    }
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn insert(&mut self, mut entry: Entry) -> Result<Entry> {
        entry.id = self.tables.last_id.next();
        entry.created_at = Utc::now();
        self.tables.put(entry.clone());
        self.journal.push(Undo::Inserted(entry.id));
        Ok(entry)
    }

    fn remove(&mut self, id: EntryId) -> Result<Entry> {
        let entry = self.tables.take(id)?;
        self.journal.push(Undo::Removed(entry.clone()));
        Ok(entry)
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    last_id: EntryId,
    entries: Vec<&'a Entry>,
}

#[derive(Deserialize)]
struct Snapshot {
    last_id: EntryId,
    entries: Vec<Entry>,
}

/// In-memory `Store` with ordered secondary indexes and an optional JSON
/// snapshot file.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// An empty store maintaining exactly the given indexes.
    pub fn new(relationships: &[Relationship]) -> Self {
        Self {
            tables: RwLock::new(Tables::with_indexes(relationships)),
            snapshot_path: None,
        }
    }

    /// A store backed by a snapshot file. The file is loaded if it exists
    /// and rewritten on `close`.
    pub fn open(relationships: &[Relationship], snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let path = snapshot_path.into();
        let mut tables = Tables::with_indexes(relationships);

        if path.exists() {
            let snapshot: Snapshot = serde_json::from_slice(&fs::read(&path)?)?;
            for entry in snapshot.entries {
                tables.put(entry);
            }
            if snapshot.last_id > tables.last_id {
                tables.last_id = snapshot.last_id;
            }
            info!(
                path = %path.display(),
                entries = tables.entries.len(),
                "Snapshot loaded — indexes rebuilt"
            );
        } else {
            info!(path = %path.display(), "No snapshot yet — starting empty");
        }

        Ok(Self {
            tables: RwLock::new(tables),
            snapshot_path: Some(path),
        })
    }

    pub fn len(&self) -> usize {
        self.tables.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the snapshot file, if one is configured.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let bytes = {
            let tables = self.tables.read();
            serde_json::to_vec_pretty(&SnapshotRef {
                last_id: tables.last_id,
                entries: tables.entries.values().collect(),
            })?
        };

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        if let Err(err) = fs::rename(&tmp, path) {
            warn!(path = %path.display(), error = %err, "Snapshot rename failed");
            return Err(err.into());
        }

        info!(path = %path.display(), bytes = bytes.len(), "Snapshot written");
        Ok(())
    }
}

impl Store for MemoryStore {
    fn read<T>(&self, f: impl FnOnce(&dyn ReadTxn) -> Result<T>) -> Result<T> {
        let tables = self.tables.read();
        f(&*tables)
    }

    fn batch<T>(&self, f: impl FnOnce(&mut dyn WriteTxn) -> Result<T>) -> Result<T> {
        let mut tables = self.tables.write();
        let last_id_before = tables.last_id;
        let mut txn = MemoryWriteTxn {
            tables: &mut *tables,
            journal: Vec::new(),
            last_id_before,
        };

        match f(&mut txn) {
            Ok(value) => Ok(value),
            Err(err) => {
                txn.rollback();
                Err(err)
            }
        }
    }

    fn close(&self) -> Result<()> {
        self.save()
    }
}
