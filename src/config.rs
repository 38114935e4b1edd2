//! Gate policy configuration and named tier loading.
//!
//! A [`GatePolicy`] configures one mounted gate. Deployments that gate
//! several route groups define a [`TierBook`] in YAML, one named policy
//! per group:
//!
//! ```yaml
//! tiers:
//!   strict:
//!     max: 10
//!     window_ms: 60000
//!   standard:
//!     max: 30
//!     window_ms: 60000
//!   relaxed:
//!     max: 60
//!     window_ms: 60000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};

fn default_window_ms() -> u64 {
    60_000
}

fn default_max() -> u32 {
    60
}

fn default_message() -> String {
    "Too many requests, please try again later.".to_string()
}

/// Rate limiting policy for a single mounted gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatePolicy {
    /// Window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Maximum operations allowed per window.
    ///
    /// Zero is legal and denies every request. Negative limits are
    /// unrepresentable.
    #[serde(default = "default_max")]
    pub max: u32,

    /// Message carried by denial responses.
    #[serde(default = "default_message")]
    pub message: String,

    /// When set, successful outcomes hand their slot back and do not
    /// count against the limit.
    #[serde(default)]
    pub skip_successful_requests: bool,

    /// When set, failed outcomes hand their slot back and do not count
    /// against the limit.
    #[serde(default)]
    pub skip_failed_requests: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max: default_max(),
            message: default_message(),
            skip_successful_requests: false,
            skip_failed_requests: false,
        }
    }
}

impl GatePolicy {
    /// Policy allowing `max` operations per `window`.
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window_ms: window.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Reject configurations that cannot express a window.
    ///
    /// A zero window would mean counters that can never expire, so it
    /// fails here at setup time rather than at request time.
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(Error::Config(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Named policy profiles loaded from configuration.
///
/// Typical deployments define a strict tier for endpoints that call out
/// to external services, a standard tier for the rest, and a relaxed
/// tier for health checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierBook {
    /// Map of tier name to policy.
    #[serde(default)]
    pub tiers: HashMap<String, GatePolicy>,
}

impl TierBook {
    /// Load tier definitions from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit tier configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load tier definitions from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let book: TierBook = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse tier config: {}", e)))?;

        for (name, policy) in &book.tiers {
            policy
                .validate()
                .map_err(|e| Error::Config(format!("tier '{}': {}", name, e)))?;
        }

        Ok(book)
    }

    /// Look up a tier by name.
    pub fn get(&self, name: &str) -> Option<&GatePolicy> {
        self.tiers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = GatePolicy::default();
        assert_eq!(policy.window_ms, 60_000);
        assert_eq!(policy.max, 60);
        assert!(!policy.skip_successful_requests);
        assert!(!policy.skip_failed_requests);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let policy = GatePolicy::new(10, Duration::ZERO);
        assert!(matches!(policy.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_max_is_valid_config() {
        // Always-deny is expressed at request time, not as a config error.
        let policy = GatePolicy::new(0, Duration::from_secs(60));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_parse_tier_book() {
        let yaml = r#"
tiers:
  strict:
    max: 10
    window_ms: 60000
  standard:
    max: 30
    window_ms: 60000
  relaxed:
    max: 60
    window_ms: 60000
"#;
        let book = TierBook::from_yaml(yaml).unwrap();
        assert_eq!(book.tiers.len(), 3);

        let strict = book.get("strict").unwrap();
        assert_eq!(strict.max, 10);
        assert_eq!(strict.window(), Duration::from_secs(60));

        assert!(book.get("nonexistent").is_none());
    }

    #[test]
    fn test_parse_tier_with_field_defaults() {
        let yaml = r#"
tiers:
  login:
    max: 5
    skip_successful_requests: true
"#;
        let book = TierBook::from_yaml(yaml).unwrap();
        let login = book.get("login").unwrap();
        assert_eq!(login.max, 5);
        assert_eq!(login.window_ms, 60_000);
        assert!(login.skip_successful_requests);
        assert_eq!(login.message, default_message());
    }

    #[test]
    fn test_invalid_tier_rejected() {
        let yaml = r#"
tiers:
  broken:
    max: 5
    window_ms: 0
"#;
        let result = TierBook::from_yaml(yaml);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let result = TierBook::from_yaml("tiers: [not, a, map]");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
