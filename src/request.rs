//! Pulling identifiers out of HTTP request headers.

use reqwest::header::{HeaderMap, ACCEPT_LANGUAGE, USER_AGENT};

use crate::models::Identifiers;

/// Header consulted first for the client address. Proxies put it there.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

impl Identifiers {
    /// Build identifiers from request headers.
    ///
    /// The IP address comes from `X-Forwarded-For` when present, otherwise
    /// from `remote_addr`. Headers that are missing or not valid visible
    /// ASCII are treated as empty.
    pub fn from_headers(headers: &HeaderMap, remote_addr: &str) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        let mut ip_address = get(X_FORWARDED_FOR);
        if ip_address.is_empty() {
            ip_address = remote_addr.to_string();
        }

        Self {
            ip_address,
            user_agent: get(USER_AGENT.as_str()),
            accept_language: get(ACCEPT_LANGUAGE.as_str()),
        }
    }
}
