//! Retry/backoff and DLQ policy (§4.7, §5, §6).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DlqPolicy {
    /// Emit to the DLQ on any processing failure.
    Always,
    /// Emit only once the category is permanent or the retry count
    /// reaches `max_retries` — the default (§4.7).
    OnPermanentOrMaxRetries,
}

impl Default for DlqPolicy {
    fn default() -> Self {
        DlqPolicy::OnPermanentOrMaxRetries
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub dlq_policy: DlqPolicy,
}

fn default_max_retries() -> u32 {
    5
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_backoff_ms() -> u64 {
    4_000
}
fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
            dlq_policy: DlqPolicy::default(),
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retry attempt `attempt` (0-indexed),
    /// capped at `max_backoff_ms`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let ms = self.initial_backoff_ms as f64 * self.backoff_factor.powi(attempt as i32);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff_for_attempt(0), Duration::from_millis(1_000));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_millis(2_000));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_millis(4_000));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_millis(4_000));
    }
}
