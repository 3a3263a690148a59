//! Configuration system (§6 "Configuration", §10.4): a TOML-loadable,
//! env-overridable `SignerConfig`, following the same profile/global-
//! singleton pattern the teacher uses for `BotConfig`.

mod batch;
mod chain;
mod gas;
mod nonce;
mod retry;

pub use batch::BatchProcessingConfig;
pub use chain::ChainDetails;
pub use gas::GasConfig;
pub use nonce::NonceConfig;
pub use retry::{DlqPolicy, RetryConfig};

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub batch_processing: BatchProcessingConfig,

    #[serde(default)]
    pub gas: GasConfig,

    #[serde(default)]
    pub nonce: NonceConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// One entry per signer-managed `(chain, network)`.
    #[serde(default)]
    pub chains: Vec<ChainDetails>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            batch_processing: BatchProcessingConfig::default(),
            gas: GasConfig::default(),
            nonce: NonceConfig::default(),
            retry: RetryConfig::default(),
            chains: Vec::new(),
        }
    }
}

impl SignerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the profile named by the `SIGNER_PROFILE` env var, or the
    /// built-in default if unset/unrecognized.
    pub fn from_env() -> Self {
        let profile = std::env::var("SIGNER_PROFILE").unwrap_or_else(|_| "default".to_string());
        match profile.to_lowercase().as_str() {
            "default" => Self::default(),
            other => {
                tracing::warn!(profile = other, "unrecognized SIGNER_PROFILE, using default");
                Self::default()
            }
        }
    }

    pub fn chain(&self, chain: &str, network: &str) -> Option<&ChainDetails> {
        self.chains.iter().find(|c| c.chain == chain && c.network == network)
    }

    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, chains = self.chains.len(), "signer configuration loaded");
        tracing::info!(
            enabled = self.batch_processing.enabled,
            min_batch_size = self.batch_processing.min_batch_size,
            batch_threshold = self.batch_processing.batch_threshold,
            min_gas_savings_percent = self.batch_processing.min_gas_savings_percent,
            "batch processing configuration"
        );
        tracing::info!(
            block_gas_limit = self.gas.block_gas_limit,
            safety_margin = self.gas.safety_margin,
            max_batch_size = self.gas.max_batch_size,
            "gas configuration"
        );
        tracing::info!(
            max_retries = self.retry.max_retries,
            dlq_policy = ?self.retry.dlq_policy,
            "retry configuration"
        );
    }
}

static GLOBAL_CONFIG: OnceLock<SignerConfig> = OnceLock::new();

pub fn init_config(config: SignerConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

pub fn config() -> &'static SignerConfig {
    GLOBAL_CONFIG.get_or_init(SignerConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sensible_batch_thresholds() {
        let config = SignerConfig::default();
        assert_eq!(config.profile, "default");
        assert!(config.batch_processing.enabled);
        assert_eq!(config.gas.max_batch_size, 100);
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = SignerConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: SignerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.profile, config.profile);
        assert_eq!(parsed.gas.max_batch_size, config.gas.max_batch_size);
    }

    #[test]
    fn chain_lookup_matches_on_chain_and_network() {
        let mut config = SignerConfig::default();
        config.chains.push(ChainDetails {
            chain_id: 1,
            chain: "ethereum".to_string(),
            network: "mainnet".to_string(),
            rpc_url: "https://rpc.example".to_string(),
            multicall3_address: "0xcA11bde05977b3631167028862bE2a173976CA11".to_string(),
            native_decimals: 18,
            block_gas_limit_override: None,
        });
        assert!(config.chain("ethereum", "mainnet").is_some());
        assert!(config.chain("ethereum", "testnet").is_none());
    }
}
