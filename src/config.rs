// =============================================================================
// config.rs — THE KNOBS
// =============================================================================
//
// Everything is read from the environment, prefixed FINGERPRINTS_, after a
// best-effort .env load. Nothing here is required; with no variables set the
// CLI reads JSON lines from stdin, keeps everything in memory and logs at
// info.
// =============================================================================

use std::env;
use std::path::PathBuf;

use crate::models::Relationship;

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON snapshot the store is loaded from and saved to.
    /// Unset means nothing survives the process.
    pub snapshot_path: Option<PathBuf>,

    /// JSON-lines file of insert requests for the CLI. Unset means stdin.
    pub input_path: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set. Default: "info"
    pub log_filter: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,

    /// Indexes the store maintains. Always the full set for the CLI; kept
    /// here so the store is told explicitly rather than reaching for a global.
    pub relationships: Vec<Relationship>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            input_path: None,
            log_filter: "info".to_string(),
            log_json: false,
            relationships: Relationship::ALL.to_vec(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        // A missing .env file is the normal case
        let _ = dotenvy::dotenv();

        let defaults = Config::default();
        Config {
            snapshot_path: env_path("FINGERPRINTS_SNAPSHOT_PATH"),
            input_path: env_path("FINGERPRINTS_INPUT"),
            log_filter: env_or_default("FINGERPRINTS_LOG", &defaults.log_filter),
            log_json: parse_bool(&env_or_default("FINGERPRINTS_LOG_JSON", "false")),
            relationships: defaults.relationships,
        }
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_declare_every_index() {
        let c = Config::default();
        assert_eq!(c.relationships, Relationship::ALL.to_vec());
        assert_eq!(c.log_filter, "info");
        assert!(c.snapshot_path.is_none());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool(" YES "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("nope"));
    }
}
