//! Join client configuration.

use std::time::Duration;

use serde::Deserialize;

/// Join client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Per-attempt deadline in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub retry_count: u32,
    /// Fixed pause between attempts in milliseconds.
    pub backoff_ms: u64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            retry_count: 1,
            backoff_ms: 150,
        }
    }
}

impl JoinConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
