// =============================================================================
// filters.rs — MATCH FILTERS
// =============================================================================
//
// A lookup is a conjunction of "index X equals value Y" predicates, one per
// identifier that is actually present. Missing identifiers contribute
// nothing. That means an all-empty identifier set produces an empty filter
// list, and an empty filter list matches EVERYTHING, not nothing. Callers
// who want "no identifiers means no results" have to say so themselves.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::models::{EntryId, Identifiers, Relationship};

/// An equality predicate against one secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub relationship: Relationship,
    pub value: String,
}

impl Filter {
    /// Match entries filed under `value` in `relationship`.
    pub fn matching(relationship: Relationship, value: impl Into<String>) -> Self {
        Self {
            relationship,
            value: value.into(),
        }
    }
}

/// Append a predicate for every non-empty identifier to `out`.
///
/// The user agent is hashed before it goes into the predicate, since that's
/// the form the index holds.
pub fn append_match_filters(out: &mut Vec<Filter>, identifiers: &Identifiers) {
    if !identifiers.ip_address.is_empty() {
        out.push(Filter::matching(
            Relationship::IpAddresses,
            identifiers.ip_address.as_str(),
        ));
    }

    if !identifiers.user_agent.is_empty() {
        out.push(Filter::matching(
            Relationship::UserAgents,
            identifiers.user_agent_key(),
        ));
    }

    if !identifiers.accept_language.is_empty() {
        out.push(Filter::matching(
            Relationship::AcceptLanguages,
            identifiers.accept_language.as_str(),
        ));
    }
}

/// Filters for a (possibly partial) identifier set, independent of user.
pub fn match_filters(identifiers: &Identifiers) -> Vec<Filter> {
    let mut out = Vec::with_capacity(3);
    append_match_filters(&mut out, identifiers);
    out
}

/// Filters for an exact user + identifiers combination.
///
/// The user predicate always comes first; it is by far the most selective
/// and stores evaluate the leading predicate first.
pub fn user_match_filters(user_id: &str, identifiers: &Identifiers) -> Vec<Filter> {
    let mut out = Vec::with_capacity(4);
    out.push(Filter::matching(Relationship::Users, user_id));
    append_match_filters(&mut out, identifiers);
    out
}

/// Options for a filtered read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteringOpts {
    /// Predicates, AND-composed
    pub filters: Vec<Filter>,
    /// Only return entries with an id greater than this one
    pub last_id: Option<EntryId>,
    /// Stop after this many entries
    pub limit: Option<usize>,
}

impl FilteringOpts {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    pub fn after(mut self, last_id: EntryId) -> Self {
        self.last_id = Some(last_id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
