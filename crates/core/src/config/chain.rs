//! Per-`(chain, network)` configuration: RPC endpoint, Multicall3
//! address, native decimals, and the chain-specific gas limit override
//! (§4.3 step 5, e.g. BSC's 140M block gas limit).

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDetails {
    pub chain_id: u64,
    pub chain: String,
    pub network: String,
    /// May contain `${VAR}` placeholders, expanded by [`resolved_rpc_url`].
    pub rpc_url: String,
    #[serde(default = "default_multicall3_address")]
    pub multicall3_address: String,
    #[serde(default = "default_native_decimals")]
    pub native_decimals: u8,
    /// Per-chain block gas limit override (e.g. 140_000_000 for BSC).
    #[serde(default)]
    pub block_gas_limit_override: Option<u64>,
}

fn default_multicall3_address() -> String {
    "0xcA11bde05977b3631167028862bE2a173976CA11".to_string()
}

fn default_native_decimals() -> u8 {
    18
}

impl ChainDetails {
    /// Resolve `${VAR}` placeholders in `rpc_url` against the process
    /// environment, leaving the literal text in place if the variable
    /// is unset (matching the teacher's `expand_env` fallback).
    pub fn resolved_rpc_url(&self) -> String {
        expand_env_vars(&self.rpc_url)
    }
}

fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([^}]+)\}").expect("static regex is valid");
    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_env_var() {
        std::env::set_var("CHAIN_RPC_TEST", "https://rpc.example");
        assert_eq!(expand_env_vars("${CHAIN_RPC_TEST}"), "https://rpc.example");
        std::env::remove_var("CHAIN_RPC_TEST");
    }

    #[test]
    fn leaves_unset_placeholder_untouched() {
        assert_eq!(expand_env_vars("${DEFINITELY_NOT_SET_XYZ}"), "${DEFINITELY_NOT_SET_XYZ}");
    }

    #[test]
    fn passes_through_literal_urls() {
        assert_eq!(expand_env_vars("https://rpc.example"), "https://rpc.example");
    }

    #[test]
    fn defaults_cover_multicall3_and_decimals() {
        let details = ChainDetails {
            chain_id: 1,
            chain: "ethereum".to_string(),
            network: "mainnet".to_string(),
            rpc_url: "https://rpc.example".to_string(),
            multicall3_address: default_multicall3_address(),
            native_decimals: default_native_decimals(),
            block_gas_limit_override: None,
        };
        assert_eq!(details.multicall3_address, "0xcA11bde05977b3631167028862bE2a173976CA11");
        assert_eq!(details.native_decimals, 18);
    }
}
