//! Batch-decision knobs (§4.5 step 5, §6 `batchProcessing.*`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProcessingConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Minimum number of eligible messages before batching is even
    /// considered.
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,

    /// Minimum group size (same token) required to batch that group.
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,

    /// Minimum projected gas savings, as a percentage, required to
    /// prefer batching over signing individually.
    #[serde(default = "default_min_gas_savings_percent")]
    pub min_gas_savings_percent: f64,

    /// Per-transfer gas estimate used for the single-signing side of the
    /// savings comparison.
    #[serde(default = "default_single_tx_gas_estimate")]
    pub single_tx_gas_estimate: u64,

    /// Fixed overhead assumed for a batched transaction, independent of
    /// member count.
    #[serde(default = "default_batch_base_gas")]
    pub batch_base_gas: u64,

    /// Marginal per-member gas assumed for a batched transaction.
    #[serde(default = "default_batch_per_tx_gas")]
    pub batch_per_tx_gas: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_min_batch_size() -> usize {
    2
}
fn default_batch_threshold() -> usize {
    2
}
fn default_min_gas_savings_percent() -> f64 {
    10.0
}
fn default_single_tx_gas_estimate() -> u64 {
    65_000
}
fn default_batch_base_gas() -> u64 {
    35_000
}
fn default_batch_per_tx_gas() -> u64 {
    25_000
}

impl Default for BatchProcessingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            min_batch_size: default_min_batch_size(),
            batch_threshold: default_batch_threshold(),
            min_gas_savings_percent: default_min_gas_savings_percent(),
            single_tx_gas_estimate: default_single_tx_gas_estimate(),
            batch_base_gas: default_batch_base_gas(),
            batch_per_tx_gas: default_batch_per_tx_gas(),
        }
    }
}

impl BatchProcessingConfig {
    /// Expected gas savings percentage of batching `n` transfers versus
    /// signing them individually (§4.5 step 5).
    pub fn savings_percent(&self, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        let single_total = n as f64 * self.single_tx_gas_estimate as f64;
        let batch_total = self.batch_base_gas as f64 + n as f64 * self.batch_per_tx_gas as f64;
        (single_total - batch_total) / single_total * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savings_percent_is_positive_for_typical_batch() {
        let config = BatchProcessingConfig::default();
        assert!(config.savings_percent(5) > 0.0);
    }

    #[test]
    fn savings_percent_is_zero_for_empty_batch() {
        let config = BatchProcessingConfig::default();
        assert_eq!(config.savings_percent(0), 0.0);
    }
}
