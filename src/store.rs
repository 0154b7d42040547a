//! The storage boundary.
//!
//! Anything that keeps entries under engine-assigned ids, maintains the
//! declared secondary indexes, and offers read-only snapshot transactions
//! plus mutually exclusive read-write ones can back the controller.
//!
//! The duplicate scanner only needs one guarantee from an ordered index
//! cursor: entries that share a key come out next to each other.

use crate::error::Result;
use crate::filters::{Filter, FilteringOpts};
use crate::models::{Entry, EntryId, Relationship};

/// Entries matching a filter, in id order.
pub type EntryCursor<'t> = Box<dyn Iterator<Item = Result<Entry>> + 't>;

/// `(index key, entry)` pairs in index key order.
pub type IndexCursor<'t> = Box<dyn Iterator<Item = Result<(String, Entry)>> + 't>;

/// Reads available inside any transaction.
pub trait ReadTxn {
    /// Point lookup. `FingerprintError::NotFound` if there is no such entry.
    fn get(&self, id: EntryId) -> Result<Entry>;

    /// Cursor over the entries matching every filter. No filters, no
    /// restriction.
    fn cursor(&self, filters: &[Filter]) -> Result<EntryCursor<'_>>;

    /// Cursor over the entries filed under `relationship` that also match
    /// every filter, ordered by key. No filters, the whole index.
    fn index_cursor(
        &self,
        relationship: Relationship,
        filters: &[Filter],
    ) -> Result<IndexCursor<'_>>;

    /// Collect the matching entries. Zero matches is an empty list, not an
    /// error.
    fn get_filtered(&self, opts: &FilteringOpts) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        for entry in self.cursor(&opts.filters)? {
            let entry = entry?;
            if opts.last_id.is_some_and(|last| entry.id <= last) {
                continue;
            }

            out.push(entry);
            if opts.limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
        }

        Ok(out)
    }
}

/// Reads plus mutations, only handed out inside a read-write transaction.
pub trait WriteTxn: ReadTxn {
    /// Store a new entry. The store assigns the id and the creation time and
    /// returns the stored copy.
    fn insert(&mut self, entry: Entry) -> Result<Entry>;

    /// Delete an entry and drop it from every index.
    fn remove(&mut self, id: EntryId) -> Result<Entry>;
}

/// A transactional entry store.
pub trait Store: Send + Sync {
    /// Run `f` against a consistent read-only view.
    fn read<T>(&self, f: impl FnOnce(&dyn ReadTxn) -> Result<T>) -> Result<T>;

    /// Run `f` inside a read-write transaction, exclusive against other
    /// read-write transactions. If `f` fails, none of its writes survive.
    fn batch<T>(&self, f: impl FnOnce(&mut dyn WriteTxn) -> Result<T>) -> Result<T>;

    /// Flush whatever needs flushing. The default has nothing to do.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
