//! The chain RPC surface the signer depends on: `chainId`,
//! `getTransactionCount`, `feeData`, `estimateGas`, `call`. Consumed, not
//! a focus of this service — kept deliberately thin.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, Bytes};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff for transient transport errors (§5): initial 1s,
/// factor 2, capped at 4s, up to 3 attempts total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub factor: f64,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            factor: 2.0,
            max_backoff: Duration::from_secs(4),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self.initial_backoff.as_millis() as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(ms.min(self.max_backoff.as_millis() as f64) as u64)
    }
}

/// Transport-level transient-error heuristic, mirroring the
/// `Network`/`Timeout` substrings of the signer's error classifier. This
/// crate doesn't depend on that classifier (the dependency runs the
/// other way), so the check is duplicated narrowly at the boundary
/// where it's needed: only connection/timeout failures are retried here,
/// never JSON-RPC/execution errors, which are deterministic and belong
/// to the caller's classify-then-branch logic instead.
fn is_transient(error: &anyhow::Error) -> bool {
    let message = error.to_string().to_lowercase();
    message.contains("timeout") || message.contains("timed out") || message.contains("connection") || message.contains("transport error")
}

async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < policy.max_attempts && is_transient(&e) => {
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Which block to read `getTransactionCount` against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
}

/// Suggested EIP-1559 fee parameters. Either field may be absent on a
/// chain/RPC that cannot supply it; the caller (the signer) must treat
/// that as a retry-eligible `NETWORK` failure rather than guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeData {
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;
    async fn get_transaction_count(&self, address: Address, block: BlockTag) -> Result<u64>;
    async fn fee_data(&self) -> Result<FeeData>;
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64>;
    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes>;
}

/// `alloy`-backed `ChainClient` over a plain HTTP JSON-RPC endpoint.
pub struct AlloyChainClient {
    rpc_url: String,
    retry_policy: RetryPolicy,
}

impl AlloyChainClient {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self::with_retry_policy(rpc_url, RetryPolicy::default())
    }

    pub fn with_retry_policy(rpc_url: impl Into<String>, retry_policy: RetryPolicy) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            retry_policy,
        }
    }

    fn provider(&self) -> Result<impl Provider> {
        Ok(ProviderBuilder::new().on_http(self.rpc_url.parse()?))
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn chain_id(&self) -> Result<u64> {
        with_retry(&self.retry_policy, || async {
            let provider = self.provider()?;
            Ok(provider.get_chain_id().await?)
        })
        .await
    }

    async fn get_transaction_count(&self, address: Address, block: BlockTag) -> Result<u64> {
        with_retry(&self.retry_policy, || async {
            let provider = self.provider()?;
            let count = match block {
                BlockTag::Latest => provider.get_transaction_count(address).await?,
                BlockTag::Pending => provider.get_transaction_count(address).pending().await?,
            };
            Ok(count)
        })
        .await
    }

    async fn fee_data(&self) -> Result<FeeData> {
        with_retry(&self.retry_policy, || async {
            let provider = self.provider()?;

            let block = provider
                .get_block_by_number(BlockNumberOrTag::Latest)
                .await?
                .context("no latest block returned")?;

            let base_fee = block.header.base_fee_per_gas.map(|b| b as u128);
            let priority_fee = provider.get_max_priority_fee_per_gas().await.ok();

            let max_fee_per_gas = match (base_fee, priority_fee) {
                (Some(base), Some(priority)) => Some(base.saturating_mul(2).saturating_add(priority)),
                _ => None,
            };

            Ok(FeeData {
                max_fee_per_gas,
                max_priority_fee_per_gas: priority_fee,
            })
        })
        .await
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        with_retry(&self.retry_policy, || async {
            let provider = self.provider()?;
            Ok(provider.estimate_gas(tx.clone()).await?)
        })
        .await
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        with_retry(&self.retry_policy, || async {
            let provider = self.provider()?;
            Ok(provider.call(tx.clone()).await?)
        })
        .await
    }
}
