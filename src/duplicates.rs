// =============================================================================
// duplicates.rs — THE DOPPELGANGER DETECTOR
// =============================================================================
//
// Finds every signature shared by two or more DIFFERENT users, in one pass.
//
// The trick is the signature index. Walked in key order, all entries with the
// same signature arrive back to back. So instead of building a map of every
// signature in the dataset, we keep one open window: the current signature
// and the set of users seen under it.
//
// 1. Entry arrives with the same signature as the window: add its user.
// 2. Entry arrives with a new signature: flush the window (keep it only if it
//    collected at least two distinct users), then open a new one.
// 3. Stream ends: flush one last time. Nobody else is going to.
//
// A user who shows up five times with the same fingerprint is one user, and
// one user is not a duplicate of themselves. Sets take care of that.
//
// An empty signature never opens a window. It can't happen for a valid
// entry, and if it does, grouping on "" would lump unrelated garbage together.
// =============================================================================

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{FingerprintError, Result};
use crate::models::Relationship;
use crate::store::ReadTxn;

/// signature -> distinct user IDs sharing it. Only groups of two or more.
pub type Duplicates = BTreeMap<String, BTreeSet<String>>;

/// One signature and the users that share it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub signature: String,
    pub users: BTreeSet<String>,
}

/// Flatten a duplicate map into groups, ordered by signature.
pub fn into_groups(duplicates: Duplicates) -> Vec<DuplicateGroup> {
    duplicates
        .into_iter()
        .map(|(signature, users)| DuplicateGroup { signature, users })
        .collect()
}

/// Streaming grouper. Feed it `(signature, user)` pairs in signature order.
#[derive(Debug, Default)]
pub struct DuplicateScanner {
    /// The open window: current signature and the users under it
    window: Option<(String, BTreeSet<String>)>,
    groups: Duplicates,
    observed: u64,
}

impl DuplicateScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one entry.
    pub fn observe(&mut self, signature: &str, user_id: &str) {
        self.observed += 1;

        if signature.is_empty() {
            // Close whatever was open; "" never gets a window of its own
            self.flush();
            return;
        }

        let same = matches!(&self.window, Some((current, _)) if current == signature);
        if !same {
            self.flush();
            self.window = Some((signature.to_owned(), BTreeSet::new()));
        }

        if let Some((_, users)) = self.window.as_mut() {
            users.insert(user_id.to_owned());
        }
    }

    /// Close the open window, keeping it only if two or more users share it.
    fn flush(&mut self) {
        if let Some((signature, users)) = self.window.take() {
            if users.len() >= 2 {
                self.groups.insert(signature, users);
            }
        }
    }

    /// Entries observed so far.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Flush the last window and hand back the groups.
    pub fn finish(mut self) -> Duplicates {
        self.flush();
        self.groups
    }
}

/// Run the scan over a read transaction's signature index.
///
/// If `cancel` is given and flips to `true`, the scan stops at the next entry
/// with `FingerprintError::Cancelled`. Nothing shared was touched, so there
/// is nothing to clean up.
pub fn scan<T>(txn: &T, cancel: Option<&watch::Receiver<bool>>) -> Result<Duplicates>
where
    T: ReadTxn + ?Sized,
{
    let started = Instant::now();
    let mut scanner = DuplicateScanner::new();

    for item in txn.index_cursor(Relationship::Signatures, &[])? {
        if cancel.is_some_and(|rx| *rx.borrow()) {
            warn!(
                scanned = scanner.observed(),
                "Duplicate scan cancelled — partial results discarded"
            );
            return Err(FingerprintError::Cancelled {
                scanned: scanner.observed(),
            });
        }

        let (signature, entry) = item?;
        debug_assert_eq!(signature, entry.signature());
        scanner.observe(&signature, &entry.user_id);
    }

    let scanned = scanner.observed();
    let duplicates = scanner.finish();
    info!(
        scanned = scanned,
        groups = duplicates.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Duplicate scan complete"
    );
    if !duplicates.is_empty() {
        debug!(groups = ?duplicates.keys().collect::<Vec<_>>(), "Shared signatures");
    }

    Ok(duplicates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(pairs: &[(&str, &str)]) -> Duplicates {
        let mut scanner = DuplicateScanner::new();
        for (sig, user) in pairs {
            scanner.observe(sig, user);
        }
        scanner.finish()
    }

    fn users(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_shared_signature_is_grouped() {
        let d = run(&[("a", "user_0"), ("a", "user_1"), ("b", "user_2")]);
        assert_eq!(d.len(), 1);
        assert_eq!(d["a"], users(&["user_0", "user_1"]));
    }

    #[test]
    fn test_same_user_is_not_a_duplicate_of_itself() {
        let d = run(&[("a", "user_0"), ("a", "user_0"), ("a", "user_0")]);
        assert!(d.is_empty());
    }

    #[test]
    fn test_last_window_is_flushed() {
        // The group that matters is the final one; only finish() can keep it
        let d = run(&[("a", "user_0"), ("b", "user_1"), ("b", "user_2")]);
        assert_eq!(d.len(), 1);
        assert_eq!(d["b"], users(&["user_1", "user_2"]));
    }

    #[test]
    fn test_repeats_count_by_distinct_user() {
        let d = run(&[
            ("a", "user_0"),
            ("a", "user_0"),
            ("a", "user_1"),
            ("a", "user_1"),
            ("a", "user_3"),
        ]);
        assert_eq!(d["a"], users(&["user_0", "user_1", "user_3"]));
    }

    #[test]
    fn test_empty_signature_never_groups() {
        let d = run(&[("", "user_0"), ("", "user_1"), ("", "user_2")]);
        assert!(d.is_empty());

        let d = run(&[("", "user_0"), ("", "user_1"), ("a", "user_0"), ("a", "user_1")]);
        assert_eq!(d.len(), 1);
        assert!(d.contains_key("a"));
    }

    #[test]
    fn test_single_entries_leave_nothing_behind() {
        let d = run(&[("a", "user_0"), ("b", "user_0"), ("c", "user_1")]);
        assert!(d.is_empty());
    }

    #[test]
    fn test_into_groups_is_ordered() {
        let groups = into_groups(run(&[
            ("a", "user_0"),
            ("a", "user_1"),
            ("b", "user_2"),
            ("b", "user_3"),
        ]));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].signature, "a");
        assert_eq!(groups[1].users, users(&["user_2", "user_3"]));
    }
}
