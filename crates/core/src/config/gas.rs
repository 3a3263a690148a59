//! Gas and batch-sizing constants (§4.3, §6).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    /// Default block gas limit; a per-chain override lives on
    /// `ChainDetails` (e.g. BSC's 140M).
    #[serde(default = "default_block_gas_limit")]
    pub block_gas_limit: u64,

    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,

    #[serde(default = "default_multicall_overhead")]
    pub multicall_overhead: u64,

    #[serde(default = "default_base_transfer_gas")]
    pub base_transfer_gas: u64,

    #[serde(default = "default_additional_gas_per_call")]
    pub additional_gas_per_call: u64,

    /// Hard cap on batch size, independent of gas bound.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_gas_price_cache_ttl_seconds")]
    pub gas_price_cache_ttl_seconds: u64,
}

fn default_block_gas_limit() -> u64 {
    30_000_000
}
fn default_safety_margin() -> f64 {
    0.75
}
fn default_multicall_overhead() -> u64 {
    35_000
}
fn default_base_transfer_gas() -> u64 {
    65_000
}
fn default_additional_gas_per_call() -> u64 {
    5_000
}
fn default_max_batch_size() -> usize {
    100
}
fn default_gas_price_cache_ttl_seconds() -> u64 {
    30
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            block_gas_limit: default_block_gas_limit(),
            safety_margin: default_safety_margin(),
            multicall_overhead: default_multicall_overhead(),
            base_transfer_gas: default_base_transfer_gas(),
            additional_gas_per_call: default_additional_gas_per_call(),
            max_batch_size: default_max_batch_size(),
            gas_price_cache_ttl_seconds: default_gas_price_cache_ttl_seconds(),
        }
    }
}

impl GasConfig {
    /// `floor(blockGasLimit · safetyMargin)`, using this chain's own
    /// block gas limit override when provided.
    pub fn max_batch_gas(&self, block_gas_limit_override: Option<u64>) -> u64 {
        let limit = block_gas_limit_override.unwrap_or(self.block_gas_limit);
        (limit as f64 * self.safety_margin).floor() as u64
    }

    pub fn gas_price_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.gas_price_cache_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_batch_gas_uses_default_block_limit() {
        let config = GasConfig::default();
        assert_eq!(config.max_batch_gas(None), 22_500_000);
    }

    #[test]
    fn max_batch_gas_honors_chain_override() {
        let config = GasConfig::default();
        assert_eq!(config.max_batch_gas(Some(140_000_000)), 105_000_000);
    }
}
