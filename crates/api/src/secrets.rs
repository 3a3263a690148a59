//! Signer key material. The signing key never travels through the
//! queue, the persistent store or a log line — only through a
//! `SecretsSource`, so the provider (env vars today, a KMS/vault
//! tomorrow) stays swappable without touching the signing path.

use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait SecretsSource: Send + Sync {
    /// Fetch the hex-encoded (with or without `0x`) private key for the
    /// given `(chain_id, network)` signer.
    async fn signing_key(&self, chain_id: u64, network: &str) -> anyhow::Result<String>;
}

fn secret_env_var(chain_id: u64, network: &str) -> String {
    format!("SIGNING_KEY_{chain_id}_{}", network.to_uppercase())
}

/// Reads `SIGNING_KEY_<chain_id>_<NETWORK>` from the process environment.
pub struct EnvSecretsSource;

#[async_trait]
impl SecretsSource for EnvSecretsSource {
    async fn signing_key(&self, chain_id: u64, network: &str) -> anyhow::Result<String> {
        let var = secret_env_var(chain_id, network);
        std::env::var(&var).map_err(|_| anyhow::anyhow!("missing signing key env var `{var}`"))
    }
}

/// Fixed in-memory map of signing keys, for tests.
#[derive(Default)]
pub struct StaticSecretsSource {
    keys: HashMap<(u64, String), String>,
}

impl StaticSecretsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, chain_id: u64, network: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert((chain_id, network.into()), key.into());
        self
    }
}

#[async_trait]
impl SecretsSource for StaticSecretsSource {
    async fn signing_key(&self, chain_id: u64, network: &str) -> anyhow::Result<String> {
        self.keys
            .get(&(chain_id, network.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no signing key configured for chain {chain_id}/{network}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_returns_configured_key() {
        let source = StaticSecretsSource::new().with_key(1, "mainnet", "0xdead");
        assert_eq!(source.signing_key(1, "mainnet").await.unwrap(), "0xdead");
    }

    #[tokio::test]
    async fn static_source_errors_on_unknown_signer() {
        let source = StaticSecretsSource::new();
        assert!(source.signing_key(1, "mainnet").await.is_err());
    }

    #[test]
    fn env_var_name_uppercases_network() {
        assert_eq!(secret_env_var(8453, "base"), "SIGNING_KEY_8453_BASE");
    }
}
