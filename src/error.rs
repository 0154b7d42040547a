//! Error types for fingerprint operations.
//!
//! Validation problems are collected rather than short-circuited, so a caller
//! that sends an empty user ID *and* an empty user agent hears about both.

use std::fmt;
use thiserror::Error;

use crate::models::{EntryId, Relationship};

/// Convenience alias used throughout the crate.
pub type Result<T, E = FingerprintError> = std::result::Result<T, E>;

/// Main error type for all fingerprint operations.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// The entry failed validation, every violation is listed
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Point lookup for an entry that does not exist
    #[error("entry {0} not found")]
    NotFound(EntryId),

    /// A filter or ordered scan named an index the store never declared
    #[error("relationship index <{0}> was not declared for this store")]
    UnknownIndex(Relationship),

    /// An index points at an entry that is gone
    #[error("index corruption detected: {0}")]
    Corruption(String),

    /// The duplicate scan was aborted through its cancellation signal
    #[error("duplicate scan cancelled after {scanned} entries")]
    Cancelled { scanned: u64 },

    /// Snapshot file I/O failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single validation violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid user ID, cannot be empty")]
    EmptyUserId,
    #[error("invalid IP address, cannot be empty")]
    EmptyIpAddress,
    #[error("invalid user agent, cannot be empty")]
    EmptyUserAgent,
}

/// Every validation violation found on an entry, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn push(&mut self, err: ValidationError) {
        self.0.push(err);
    }

    pub fn contains(&self, err: ValidationError) -> bool {
        self.0.contains(&err)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok(())` when nothing was pushed, otherwise the whole list.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
