//! Batch Planner (§4.3): validates a set of same-`(chain, network)`
//! ERC-20 transfers, encodes them as Multicall3 `Call3`s, estimates
//! gas with network-scale discounting, and splits into gas-bounded
//! groups when necessary.

use crate::config::GasConfig;
use crate::context::ChainContext;
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use anyhow::Result;
use dashmap::DashMap;
use std::collections::HashMap;
use withdrawal_chain::contracts::{encode_aggregate3, encode_transfer, Call3};
use withdrawal_chain::{parse_positive_u256, validate_hex_address, ChainClient};

/// One validated ERC-20 transfer to be placed in a batch.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub transaction_id: String,
    pub token_address: Address,
    pub to: Address,
    pub amount: U256,
}

#[derive(Debug, Clone)]
pub struct BatchGroup {
    pub calls: Vec<Call3>,
    pub transfers: Vec<Transfer>,
    pub estimated_gas: u64,
    pub token_counts: HashMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub calls: Vec<Call3>,
    pub estimated_gas_per_call: u64,
    pub total_estimated_gas: u64,
    /// `Some` only when the batch had to be split across multiple
    /// transactions; `None` means the single-group, no-split path.
    pub batch_groups: Option<Vec<BatchGroup>>,
}

/// Structural validation failures, collected rather than short-circuited
/// so a caller can report every problem at once (§8 "Validation
/// totality").
#[derive(Debug, thiserror::Error)]
#[error("batch validation failed: {0:?}")]
pub struct InvalidBatch(pub Vec<String>);

#[derive(Debug, thiserror::Error)]
#[error("gas estimation failed: {0}")]
pub struct GasEstimationFailed(pub String);

pub struct BatchPlanner {
    chain_client: std::sync::Arc<dyn ChainClient>,
    gas_config: GasConfig,
    // Per-token learned average gas (EWA), keyed by lowercase token
    // address (§4.3 step 3).
    learned_gas_per_token: DashMap<String, u64>,
}

impl BatchPlanner {
    pub fn new(chain_client: std::sync::Arc<dyn ChainClient>, gas_config: GasConfig) -> Self {
        Self {
            chain_client,
            gas_config,
            learned_gas_per_token: DashMap::new(),
        }
    }

    /// Step 1: structural validation only. Gas limits are enforced
    /// later.
    pub fn validate(&self, transfers: &[Transfer]) -> Result<(), InvalidBatch> {
        let mut reasons = Vec::new();
        let mut seen_ids = std::collections::HashSet::new();

        for transfer in transfers {
            if !seen_ids.insert(transfer.transaction_id.clone()) {
                reasons.push(format!("duplicate transaction id: {}", transfer.transaction_id));
            }
            if !validate_hex_address(&transfer.token_address.to_string()) {
                reasons.push(format!("invalid token address for {}", transfer.transaction_id));
            }
            if !validate_hex_address(&transfer.to.to_string()) {
                reasons.push(format!("invalid recipient address for {}", transfer.transaction_id));
            }
            if transfer.amount.is_zero() {
                reasons.push(format!("non-positive amount for {}", transfer.transaction_id));
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(InvalidBatch(reasons))
        }
    }

    /// Step 2: encode each transfer as `ERC20.transfer(to, amount)`
    /// wrapped in a `Call3`. Native transfers never reach this path.
    pub fn encode(&self, transfers: &[Transfer]) -> Vec<Call3> {
        transfers
            .iter()
            .map(|t| Call3::new(t.token_address, encode_transfer(t.to, t.amount)))
            .collect()
    }

    /// Step 3/4: estimate `aggregate3` gas on-chain, falling back to
    /// learned per-token averages when estimation fails.
    pub async fn estimate_gas(&self, context: &ChainContext, transfers: &[Transfer], calls: &[Call3]) -> Result<(u64, u64)> {
        let calldata = encode_aggregate3(calls.to_vec());
        let tx = TransactionRequest::default()
            .with_to(context.multicall3_address)
            .with_input(calldata);

        match self.chain_client.estimate_gas(&tx).await {
            Ok(raw) => {
                let n = calls.len() as u64;
                let per_call = raw / n.max(1);
                let discount = discount_for_batch_size(calls.len());
                let adjusted_per_call = (per_call as f64 * (1.0 - discount)) as u64;
                let total = (raw as f64 * 1.15) as u64;

                for transfer in transfers {
                    self.learn(transfer.token_address, adjusted_per_call);
                }

                Ok((adjusted_per_call, total))
            }
            Err(e) => {
                tracing::warn!(error = %e, "aggregate3 gas estimation failed, falling back to learned/base cost");
                let per_call = transfers
                    .iter()
                    .filter_map(|t| self.learned_gas_per_token.get(&lowercase_key(t.token_address)).map(|v| *v))
                    .max()
                    .unwrap_or(self.gas_config.base_transfer_gas);

                let n = calls.len() as u64;
                let total = self.gas_config.multicall_overhead
                    + per_call * n
                    + self.gas_config.additional_gas_per_call * n.saturating_sub(1);
                Ok((per_call, total))
            }
        }
    }

    fn learn(&self, token: Address, sample: u64) {
        let key = lowercase_key(token);
        self.learned_gas_per_token
            .entry(key)
            .and_modify(|old| *old = (4 * *old + sample) / 5)
            .or_insert(sample);
    }

    /// Steps 5/6: decide whether the batch fits in one group, and split
    /// it in input order if not.
    pub fn split(&self, transfers: &[Transfer], calls: &[Call3], per_call: u64, total: u64, block_gas_limit_override: Option<u64>) -> Option<Vec<BatchGroup>> {
        let max_batch_gas = self.gas_config.max_batch_gas(block_gas_limit_override);
        if total <= max_batch_gas {
            return None;
        }

        let mut groups = Vec::new();
        let mut current_calls = Vec::new();
        let mut current_transfers = Vec::new();
        let mut current_gas = self.gas_config.multicall_overhead;
        let mut current_counts: HashMap<String, u64> = HashMap::new();

        for (transfer, call) in transfers.iter().zip(calls.iter()) {
            let k = current_calls.len();
            let call_gas = (per_call as f64 * (1.0 - discount_for_batch_size(k))) as u64;

            if current_gas + call_gas > max_batch_gas && !current_calls.is_empty() {
                groups.push(BatchGroup {
                    calls: std::mem::take(&mut current_calls),
                    transfers: std::mem::take(&mut current_transfers),
                    estimated_gas: current_gas,
                    token_counts: std::mem::take(&mut current_counts),
                });
                current_gas = self.gas_config.multicall_overhead;
            }

            current_gas += call_gas;
            current_calls.push(call.clone());
            current_transfers.push(transfer.clone());
            *current_counts.entry(lowercase_key(transfer.token_address)).or_insert(0) += 1;
        }

        if !current_calls.is_empty() {
            groups.push(BatchGroup {
                calls: current_calls,
                transfers: current_transfers,
                estimated_gas: current_gas,
                token_counts: current_counts,
            });
        }

        Some(groups)
    }

    /// The largest `m <= max_batch_size` whose diminishing-cost
    /// summation stays under `max_batch_gas`.
    pub fn optimal_batch_size(&self, per_call: u64, block_gas_limit_override: Option<u64>) -> usize {
        let max_batch_gas = self.gas_config.max_batch_gas(block_gas_limit_override);
        let hard_cap = self.gas_config.max_batch_size;

        let mut total = self.gas_config.multicall_overhead;
        let mut m = 0;
        for k in 0..hard_cap {
            let call_gas = (per_call as f64 * (1.0 - discount_for_batch_size(k))) as u64;
            if total + call_gas > max_batch_gas {
                break;
            }
            total += call_gas;
            m += 1;
        }
        m.min(hard_cap)
    }

    pub async fn prepare(&self, context: &ChainContext, transfers: &[Transfer]) -> Result<PreparedBatch> {
        let calls = self.encode(transfers);
        let (per_call, total) = self.estimate_gas(context, transfers, &calls).await?;
        let batch_groups = self.split(transfers, &calls, per_call, total, context.block_gas_limit_override);
        Ok(PreparedBatch {
            calls,
            estimated_gas_per_call: per_call,
            total_estimated_gas: total,
            batch_groups,
        })
    }
}

fn lowercase_key(address: Address) -> String {
    address.to_string().to_lowercase()
}

/// `d = min(0.15, 0.005 * n)` — larger batches warm storage and cost
/// less per call.
fn discount_for_batch_size(n: usize) -> f64 {
    (0.005 * n as f64).min(0.15)
}

pub fn encode_batch_transaction(calls: Vec<Call3>) -> Bytes {
    encode_aggregate3(calls)
}

pub fn decode_batch_result(return_data: &[u8]) -> Result<Vec<(bool, Bytes)>> {
    let decoded = withdrawal_chain::contracts::decode_aggregate3_result(return_data)?;
    Ok(decoded.into_iter().map(|r| (r.success, r.returnData)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Bytes as AlloyBytes};
    use async_trait::async_trait;
    use withdrawal_chain::{BlockTag, FeeData};

    struct FakeChainClient {
        gas_estimate: Result<u64, String>,
    }

    #[async_trait]
    impl ChainClient for FakeChainClient {
        async fn chain_id(&self) -> Result<u64> {
            Ok(1)
        }
        async fn get_transaction_count(&self, _address: Address, _block: BlockTag) -> Result<u64> {
            Ok(0)
        }
        async fn fee_data(&self) -> Result<FeeData> {
            Ok(FeeData {
                max_fee_per_gas: Some(1),
                max_priority_fee_per_gas: Some(1),
            })
        }
        async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64> {
            self.gas_estimate.clone().map_err(|e| anyhow::anyhow!(e))
        }
        async fn call(&self, _tx: &TransactionRequest) -> Result<AlloyBytes> {
            Ok(AlloyBytes::new())
        }
    }

    fn sample_transfer(id: &str, token: Address) -> Transfer {
        Transfer {
            transaction_id: id.to_string(),
            token_address: token,
            to: address!("742d35Cc6634C0532925a3b844Bc454e4438fAed"),
            amount: U256::from(1_000_000u64),
        }
    }

    fn planner(gas_estimate: Result<u64, String>) -> BatchPlanner {
        BatchPlanner::new(std::sync::Arc::new(FakeChainClient { gas_estimate }), GasConfig::default())
    }

    fn context() -> ChainContext {
        ChainContext::new(1, "ethereum", "mainnet", Address::ZERO, 18, None)
    }

    #[test]
    fn validate_rejects_duplicate_transaction_ids() {
        let planner = planner(Ok(200_000));
        let token = address!("dAC17F958D2ee523a2206206994597C13D831ec7");
        let transfers = vec![sample_transfer("t1", token), sample_transfer("t1", token)];
        let result = planner.validate(&transfers);
        assert!(result.is_err());
    }

    #[test]
    fn validate_accepts_well_formed_transfers() {
        let planner = planner(Ok(200_000));
        let token = address!("dAC17F958D2ee523a2206206994597C13D831ec7");
        let transfers = vec![sample_transfer("t1", token), sample_transfer("t2", token)];
        assert!(planner.validate(&transfers).is_ok());
    }

    #[tokio::test]
    async fn prepare_does_not_split_small_batches() {
        let planner = planner(Ok(200_000));
        let token = address!("dAC17F958D2ee523a2206206994597C13D831ec7");
        let transfers = vec![sample_transfer("t1", token), sample_transfer("t2", token)];
        let prepared = planner.prepare(&context(), &transfers).await.unwrap();
        assert!(prepared.batch_groups.is_none());
    }

    #[tokio::test]
    async fn falls_back_to_base_transfer_gas_when_estimation_fails() {
        let planner = planner(Err("rpc down".to_string()));
        let token = address!("dAC17F958D2ee523a2206206994597C13D831ec7");
        let transfers = vec![sample_transfer("t1", token), sample_transfer("t2", token)];
        let calls = planner.encode(&transfers);
        let (per_call, total) = planner.estimate_gas(&context(), &transfers, &calls).await.unwrap();
        assert_eq!(per_call, 65_000);
        assert_eq!(total, 35_000 + 65_000 * 2 + 5_000 * 1);
    }

    #[test]
    fn split_groups_preserve_input_order_and_stay_under_gas_bound() {
        let planner = planner(Ok(200_000));
        let token = address!("dAC17F958D2ee523a2206206994597C13D831ec7");
        let transfers: Vec<Transfer> = (0..100).map(|i| sample_transfer(&format!("t{i}"), token)).collect();
        let calls = planner.encode(&transfers);
        // Force a split with an artificially high per-call cost.
        let per_call = 500_000u64;
        let total = per_call * transfers.len() as u64;
        let groups = planner.split(&transfers, &calls, per_call, total, None).unwrap();

        let max_batch_gas = GasConfig::default().max_batch_gas(None);
        for group in &groups {
            assert!(group.estimated_gas <= max_batch_gas);
        }

        let reconstructed: Vec<String> = groups.iter().flat_map(|g| g.transfers.iter().map(|t| t.transaction_id.clone())).collect();
        let original: Vec<String> = transfers.iter().map(|t| t.transaction_id.clone()).collect();
        assert_eq!(reconstructed, original);
    }

    #[test]
    fn optimal_batch_size_is_capped_at_hard_limit() {
        let planner = planner(Ok(200_000));
        let m = planner.optimal_batch_size(1, None);
        assert!(m <= 100);
    }
}
