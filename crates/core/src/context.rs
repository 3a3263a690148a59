//! Plain-value chain context shared by the planner, signer and worker so
//! none of the three holds a reference back to either of the others.

use alloy::primitives::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainContext {
    pub chain_id: u64,
    pub chain: &'static str,
    pub network: &'static str,
    pub multicall3_address: Address,
    pub native_decimals: u8,
    /// Per-chain override of `GasConfig::block_gas_limit` (§6
    /// `blockGasLimitOverride`), for chains whose block gas limit differs
    /// from the deployment-wide default (e.g. an L2).
    pub block_gas_limit_override: Option<u64>,
}

impl ChainContext {
    pub fn new(
        chain_id: u64,
        chain: &'static str,
        network: &'static str,
        multicall3_address: Address,
        native_decimals: u8,
        block_gas_limit_override: Option<u64>,
    ) -> Self {
        Self {
            chain_id,
            chain,
            network,
            multicall3_address,
            native_decimals,
            block_gas_limit_override,
        }
    }
}
