// =============================================================================
// models.rs — WHO YOU ARE, ACCORDING TO YOUR HEADERS
// =============================================================================
//
// A fingerprint is three request attributes: the IP address, the user agent
// and the accept-language header. On their own they're boring. Attached to
// a user ID and compared across accounts, they're how you find the one person
// running a dozen "different" users from the same laptop.
//
// An Entry is the persisted pairing of a user ID with one such triple. It is
// immutable once stored. The only way out is deletion.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ValidationError, ValidationErrors};
use crate::hash::hash_hex;

/// The secondary indexes an entry is filed under.
///
/// The store is told about these at construction time; there is no global
/// registry to mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relationship {
    /// Exact user ID
    Users,
    /// Exact IP address
    IpAddresses,
    /// Hashed user agent. The raw string is never an index key.
    UserAgents,
    /// Exact accept-language value
    AcceptLanguages,
    /// Signature of the full identifier triple
    Signatures,
}

impl Relationship {
    /// Every relationship an entry produces, in declaration order.
    pub const ALL: [Relationship; 5] = [
        Relationship::Users,
        Relationship::IpAddresses,
        Relationship::UserAgents,
        Relationship::AcceptLanguages,
        Relationship::Signatures,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Users => "users",
            Relationship::IpAddresses => "ipAddresses",
            Relationship::UserAgents => "userAgents",
            Relationship::AcceptLanguages => "acceptLanguages",
            Relationship::Signatures => "signatures",
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identifiers used for fingerprinting.
///
/// Any field may be empty when the set is used as a lookup filter. A stored
/// entry always has an IP address and a user agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Identifiers {
    /// IP address of the user
    pub ip_address: String,
    /// User agent of the user
    pub user_agent: String,
    /// Accept-Language value for the user, optional
    pub accept_language: String,
}

impl Identifiers {
    pub fn new(
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        accept_language: impl Into<String>,
    ) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            accept_language: accept_language.into(),
        }
    }

    /// Signature of the full triple: hex SHA-256 over ip, user agent and
    /// accept-language, in that order.
    pub fn signature(&self) -> String {
        hash_hex([&self.ip_address, &self.user_agent, &self.accept_language])
    }

    /// The user agent as it appears in the `UserAgents` index.
    pub fn user_agent_key(&self) -> String {
        user_agent_key(&self.user_agent)
    }
}

/// Hash a raw user agent into its index key.
pub fn user_agent_key(user_agent: &str) -> String {
    hash_hex([user_agent])
}

/// Store-assigned entry identifier. Sequential, rendered zero padded.
///
/// Zero is "not assigned yet"; stores hand out ids starting at one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl EntryId {
    pub const UNASSIGNED: EntryId = EntryId(0);

    pub fn next(&self) -> EntryId {
        EntryId(self.0 + 1)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

/// A stored fingerprint: one user, one identifier triple.
///
/// The signature is not a field. It is derived from the identifiers every
/// time it's asked for, so it can't drift from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Assigned by the store on insert
    pub id: EntryId,

    /// When the store accepted the entry
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    /// User the entry belongs to
    #[serde(rename = "userID")]
    pub user_id: String,

    #[serde(flatten)]
    pub identifiers: Identifiers,
}

impl Entry {
    /// A fresh, not-yet-stored entry.
    pub fn new(user_id: impl Into<String>, identifiers: Identifiers) -> Self {
        Self {
            id: EntryId::UNASSIGNED,
            created_at: Utc::now(),
            user_id: user_id.into(),
            identifiers,
        }
    }

    /// Signature of this entry's identifier triple.
    pub fn signature(&self) -> String {
        self.identifiers.signature()
    }

    /// Index keys for this entry, one per relationship.
    ///
    /// Empty keys (an absent accept-language, say) are left out; a store
    /// never files an entry under "".
    pub fn relationships(&self) -> Vec<(Relationship, String)> {
        Relationship::ALL
            .into_iter()
            .filter_map(|r| self.relationship_key(r).map(|key| (r, key)))
            .collect()
    }

    /// The index key this entry has for one relationship, if any.
    pub fn relationship_key(&self, relationship: Relationship) -> Option<String> {
        let key = match relationship {
            Relationship::Users => self.user_id.clone(),
            Relationship::IpAddresses => self.identifiers.ip_address.clone(),
            Relationship::UserAgents => self.identifiers.user_agent_key(),
            Relationship::AcceptLanguages => self.identifiers.accept_language.clone(),
            Relationship::Signatures => self.signature(),
        };

        (!key.is_empty()).then_some(key)
    }

    /// Check the required fields. Every violation is reported, not just the
    /// first one. Accept-language is optional.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::default();
        if self.user_id.is_empty() {
            errs.push(ValidationError::EmptyUserId);
        }

        if self.identifiers.ip_address.is_empty() {
            errs.push(ValidationError::EmptyIpAddress);
        }

        if self.identifiers.user_agent.is_empty() {
            errs.push(ValidationError::EmptyUserAgent);
        }

        errs.into_result()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} via {} ({})",
            self.id, self.user_id, self.identifiers.ip_address, self.identifiers.accept_language
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entry {
        Entry::new(
            "user_0",
            Identifiers::new("64.233.191.255", "Mozilla/5.0", "en-US,en;q=0.9"),
        )
    }

    #[test]
    fn test_valid_entry_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_accept_language_is_optional() {
        let mut e = sample();
        e.identifiers.accept_language.clear();
        assert!(e.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_every_violation() {
        let e = Entry::new("", Identifiers::default());
        let errs = e.validate().unwrap_err();
        assert_eq!(errs.len(), 3);
        assert!(errs.contains(ValidationError::EmptyUserId));
        assert!(errs.contains(ValidationError::EmptyIpAddress));
        assert!(errs.contains(ValidationError::EmptyUserAgent));
    }

    #[test]
    fn test_signature_tracks_identifiers() {
        let mut e = sample();
        let before = e.signature();
        assert_eq!(before, hash_hex(["64.233.191.255", "Mozilla/5.0", "en-US,en;q=0.9"]));

        e.identifiers.accept_language = "de-DE".to_string();
        assert_ne!(e.signature(), before);
    }

    #[test]
    fn test_user_agent_is_hashed_for_indexing() {
        let e = sample();
        let ua = e.relationship_key(Relationship::UserAgents).unwrap();
        assert_eq!(ua, user_agent_key("Mozilla/5.0"));
        assert_ne!(ua, "Mozilla/5.0");
    }

    #[test]
    fn test_empty_keys_are_not_relationships() {
        let mut e = sample();
        e.identifiers.accept_language.clear();
        let rels = e.relationships();
        assert_eq!(rels.len(), 4);
        assert!(rels.iter().all(|(r, _)| *r != Relationship::AcceptLanguages));
        assert!(e.relationship_key(Relationship::AcceptLanguages).is_none());
    }

    #[test]
    fn test_entry_serializes_flat() {
        let mut e = sample();
        e.id = EntryId(7);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["userID"], "user_0");
        assert_eq!(json["ipAddress"], "64.233.191.255");
        assert_eq!(json["acceptLanguage"], "en-US,en;q=0.9");
        assert!(json.get("signature").is_none());
    }

    #[test]
    fn test_entry_id_display_is_padded() {
        assert_eq!(EntryId(42).to_string(), "00000042");
        assert_eq!(EntryId::UNASSIGNED.next(), EntryId(1));
    }
}
