//! Fingerprint tracking for user accounts.
//!
//! A fingerprint is the (IP address, user agent, accept-language) triple a
//! request arrives with. The [`Controller`] records one [`Entry`] per distinct
//! user + fingerprint combination and answers the question that matters:
//! which fingerprints are shared by two or more different users?
//!
//! ```no_run
//! use fingerprints::{Controller, Identifiers};
//!
//! let c = Controller::in_memory();
//! let ids = Identifiers::new("64.233.191.255", "Mozilla/5.0", "en-US");
//! c.insert("user_0", ids.clone())?;
//! c.insert("user_1", ids)?;
//!
//! for (signature, users) in c.get_duplicates()? {
//!     println!("{signature}: {users:?}");
//! }
//! # Ok::<(), fingerprints::FingerprintError>(())
//! ```

pub mod config;
pub mod controller;
pub mod duplicates;
pub mod error;
pub mod filters;
pub mod hash;
pub mod memory_store;
pub mod metrics;
pub mod models;
pub mod request;
pub mod store;

pub use config::Config;
pub use controller::Controller;
pub use duplicates::{into_groups, DuplicateGroup, DuplicateScanner, Duplicates};
pub use error::{FingerprintError, Result, ValidationError, ValidationErrors};
pub use filters::{match_filters, user_match_filters, Filter, FilteringOpts};
pub use hash::{hash_hex, Hash};
pub use memory_store::MemoryStore;
pub use metrics::{FingerprintStats, StatsSnapshot};
pub use models::{Entry, EntryId, Identifiers, Relationship};
pub use store::{EntryCursor, IndexCursor, ReadTxn, Store, WriteTxn};
