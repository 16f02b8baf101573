use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing knobs for a room session. Every field falls back to its default
/// when missing from the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often the authoritative TTL is fetched.
    pub poll_interval_ms: u64,
    /// Local countdown step between polls.
    pub tick_interval_ms: u64,
    /// Trailing debounce for message-arrived notifications.
    pub debounce_ms: u64,
    pub grouping_window_ms: u64,
    /// Deadline for each server call made by a running session.
    pub request_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            tick_interval_ms: 1_000,
            debounce_ms: 300,
            grouping_window_ms: 5 * 60 * 1_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn grouping_window(&self) -> Duration {
        Duration::from_millis(self.grouping_window_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::GROUPING_WINDOW;
    use crate::sync::DEBOUNCE_WINDOW;

    #[test]
    fn defaults_match_module_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.debounce_window(), DEBOUNCE_WINDOW);
        assert_eq!(config.grouping_window(), GROUPING_WINDOW);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = SessionConfig::from_json(r#"{"debounce_ms": 50}"#).unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.poll_interval_ms, 1_000);
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = SessionConfig::from_json(
            r#"{"poll_interval_ms": 0, "tick_interval_ms": 0, "request_timeout_ms": 0}"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
        assert_eq!(config.request_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(SessionConfig::from_json(r#"{"debounce_ms": "fast"}"#).is_err());
    }
}
