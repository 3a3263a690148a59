//! Nonce slot TTL (§3 `NonceSlot`, §6 `nonceTtlSeconds`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceConfig {
    #[serde(default = "default_nonce_ttl_seconds")]
    pub nonce_ttl_seconds: u64,
}

fn default_nonce_ttl_seconds() -> u64 {
    86_400
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            nonce_ttl_seconds: default_nonce_ttl_seconds(),
        }
    }
}
