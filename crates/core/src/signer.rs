//! Transaction Signer (§4.4): turns a validated withdrawal request (or a
//! planned batch of them) into a fully signed EIP-1559 transaction,
//! never broadcasting it itself — that is the egress queue's job.

use crate::config::GasConfig;
use crate::context::ChainContext;
use crate::error::SigningError;
use crate::nonce::NonceCoordinator;
use crate::planner::{BatchPlanner, Transfer};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use anyhow::anyhow;
use chrono::Utc;
use std::sync::Arc;
use withdrawal_api::{RequestStatus, SecretsSource, SignedTransaction, SignedTransactionKind, TokenLookup, WithdrawalRequest};
use withdrawal_chain::contracts::{encode_aggregate3, encode_allowance, encode_transfer, Call3};
use withdrawal_chain::{checksum, normalize_address, parse_positive_u256, BlockTag, ChainClient, GasPriceCache};

/// Fee buffer applied on top of whatever `feeData`/the cache reports
/// (§4.4 step 4).
const FEE_BUFFER: f64 = 1.10;
/// Gas limit headroom over the raw estimate (§4.4 step 5).
const GAS_LIMIT_BUFFER: f64 = 1.20;

/// Holds the signer wallet, the chain provider, the nonce coordinator,
/// the gas cache and the batch planner for one `(chain, network)`.
pub struct TransactionSigner {
    context: ChainContext,
    wallet: EthereumWallet,
    address: Address,
    chain_client: Arc<dyn ChainClient>,
    nonce_coordinator: Arc<NonceCoordinator>,
    gas_cache: Arc<GasPriceCache>,
    planner: Arc<BatchPlanner>,
    token_lookup: Arc<dyn TokenLookup>,
}

/// Result of signing a (possibly split) batch: the groups that were
/// signed before a mid-sequence failure, paired with that failure.
/// Whether a partial result is usable is a Signing Worker decision
/// (§4.5 step 7(e)), not this layer's.
#[derive(Debug)]
pub struct PartialBatchFailure {
    pub signed: Vec<SignedTransaction>,
    pub error: SigningError,
}

impl TransactionSigner {
    /// Initialization sequence (§4.4): fetch the key, verify chain id
    /// agreement, then seed the nonce coordinator. All three steps must
    /// succeed, in order.
    pub async fn initialize(
        context: ChainContext,
        chain_client: Arc<dyn ChainClient>,
        nonce_coordinator: Arc<NonceCoordinator>,
        planner: Arc<BatchPlanner>,
        token_lookup: Arc<dyn TokenLookup>,
        secrets: &dyn SecretsSource,
        gas_cache: Arc<GasPriceCache>,
    ) -> Result<Self, SigningError> {
        let key = secrets
            .signing_key(context.chain_id, context.network)
            .await
            .map_err(SigningError::Other)?;
        let signer: PrivateKeySigner = key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| SigningError::Other(anyhow!("invalid signing key: {e}")))?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let rpc_chain_id = chain_client.chain_id().await.map_err(|e| SigningError::Rpc(e.to_string()))?;
        if rpc_chain_id != context.chain_id {
            return Err(SigningError::ChainIdMismatch {
                configured: context.chain_id,
                rpc: rpc_chain_id,
            });
        }

        let network_nonce = chain_client
            .get_transaction_count(address, BlockTag::Latest)
            .await
            .map_err(|e| SigningError::Rpc(e.to_string()))?;
        nonce_coordinator
            .initialize(&checksum(address), network_nonce, context.chain, context.network)
            .await
            .map_err(|e| SigningError::NonceStoreUnavailable(e.to_string()))?;

        Ok(Self {
            context,
            wallet,
            address,
            chain_client,
            nonce_coordinator,
            gas_cache,
            planner,
            token_lookup,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// §4.4 `SignSingle`.
    pub async fn sign_single(&self, request: &WithdrawalRequest) -> Result<SignedTransaction, SigningError> {
        let (to, value, data) = self.build_transfer_payload(request).await?;

        let tx = TransactionRequest::default().to(to).value(value).input(data.clone());
        let gas = self
            .chain_client
            .estimate_gas(&tx)
            .await
            .map_err(|e| SigningError::GasEstimationFailed(e.to_string()))?;

        let signer_key = checksum(self.address);
        let nonce = match self
            .nonce_coordinator
            .get_and_increment(&signer_key, self.context.chain, self.context.network)
            .await
        {
            Ok(n) => n,
            Err(e) => return Err(SigningError::NonceStoreUnavailable(e.to_string())),
        };

        match self.sign_at_nonce(to, value, data, gas, nonce).await {
            Ok((raw, hash, max_fee, max_priority, gas_limit)) => Ok(SignedTransaction {
                request_ids: vec![request.request_id.clone()],
                batch_id: None,
                transaction_type: SignedTransactionKind::Single,
                chain_id: self.context.chain_id,
                chain: self.context.chain.to_string(),
                network: self.context.network.to_string(),
                from: checksum(self.address),
                to: checksum(to),
                nonce,
                value: value.to_string(),
                data: data_hex(&data),
                gas_limit,
                max_fee_per_gas: max_fee.to_string(),
                max_priority_fee_per_gas: max_priority.to_string(),
                raw_signed_tx: raw.to_string(),
                tx_hash: hash.to_string(),
                try_count: request.attempt_count,
                status: RequestStatus::Signed,
                signed_at: Utc::now(),
            }),
            Err(e) => {
                self.nonce_coordinator
                    .return_nonce(&signer_key, self.context.chain, self.context.network, nonce);
                Err(e)
            }
        }
    }

    /// Step 1 of `SignSingle`: native transfers send value with no
    /// calldata; ERC-20 transfers encode `transfer(to, amount)` against
    /// the token contract. `amount` is already a base-unit integer, per
    /// the request's own invariant — it is never re-scaled here.
    async fn build_transfer_payload(&self, request: &WithdrawalRequest) -> Result<(Address, U256, Bytes), SigningError> {
        let amount = parse_positive_u256(&request.amount).map_err(SigningError::Other)?;

        match &request.token_address {
            None => {
                let to = normalize_address(&request.recipient).map_err(SigningError::Other)?;
                Ok((to, amount, Bytes::new()))
            }
            Some(token_address) => {
                let token = normalize_address(token_address).map_err(SigningError::Other)?;
                let to = normalize_address(&request.recipient).map_err(SigningError::Other)?;

                if let Ok(None) = self.token_lookup.lookup(self.context.chain_id, token_address).await {
                    tracing::warn!(token = token_address, "signing transfer for a token absent from the catalog");
                }

                let data = encode_transfer(to, amount);
                Ok((token, U256::ZERO, data))
            }
        }
    }

    /// §4.4 `SignBatch`. `try_count` is the post-increment attempt count
    /// shared by every member of this batch — batch-eligible members are
    /// drawn only from fresh (never-attempted) requests, so all of them
    /// enter a batch at the same attempt count.
    pub async fn sign_batch(
        &self,
        batch_id: &str,
        transfers: &[Transfer],
        try_count: u32,
    ) -> Result<Vec<SignedTransaction>, PartialBatchFailure> {
        self.reconcile_nonce().await;

        self.planner
            .validate(transfers)
            .map_err(|e| self.failure(SigningError::InvalidBatch(e.0)))?;

        self.warn_on_insufficient_allowances(transfers).await;

        let prepared = self
            .planner
            .prepare(&self.context, transfers)
            .await
            .map_err(|e| self.failure(SigningError::GasEstimationFailed(e.to_string())))?;

        let signer_key = checksum(self.address);

        match prepared.batch_groups {
            None => {
                let data = Bytes::from(encode_aggregate3(prepared.calls));
                let nonce = self
                    .nonce_coordinator
                    .get_and_increment(&signer_key, self.context.chain, self.context.network)
                    .await
                    .map_err(|e| self.failure(SigningError::NonceStoreUnavailable(e.to_string())))?;

                match self
                    .sign_at_nonce(self.context.multicall3_address, U256::ZERO, data.clone(), prepared.total_estimated_gas, nonce)
                    .await
                {
                    Ok((raw, hash, max_fee, max_priority, gas_limit)) => Ok(vec![self.batch_signed_tx(
                        transfers.iter().map(|t| t.transaction_id.clone()).collect(),
                        Some(batch_id.to_string()),
                        nonce,
                        data,
                        gas_limit,
                        max_fee,
                        max_priority,
                        raw.to_string(),
                        hash.to_string(),
                        try_count,
                    )]),
                    Err(e) => {
                        self.nonce_coordinator
                            .return_nonce(&signer_key, self.context.chain, self.context.network, nonce);
                        Err(PartialBatchFailure { signed: Vec::new(), error: e })
                    }
                }
            }
            Some(groups) => {
                let mut signed = Vec::with_capacity(groups.len());
                for (k, group) in groups.into_iter().enumerate() {
                    let data = Bytes::from(encode_aggregate3(group.calls));
                    let nonce = match self
                        .nonce_coordinator
                        .get_and_increment(&signer_key, self.context.chain, self.context.network)
                        .await
                    {
                        Ok(n) => n,
                        Err(e) => {
                            return Err(PartialBatchFailure {
                                signed,
                                error: SigningError::NonceStoreUnavailable(e.to_string()),
                            })
                        }
                    };

                    match self
                        .sign_at_nonce(self.context.multicall3_address, U256::ZERO, data.clone(), group.estimated_gas, nonce)
                        .await
                    {
                        Ok((raw, hash, max_fee, max_priority, gas_limit)) => {
                            signed.push(self.batch_signed_tx(
                                group.transfers.iter().map(|t| t.transaction_id.clone()).collect(),
                                Some(format!("{batch_id}-{k}")),
                                nonce,
                                data,
                                gas_limit,
                                max_fee,
                                max_priority,
                                raw.to_string(),
                                hash.to_string(),
                                try_count,
                            ));
                        }
                        Err(e) => {
                            self.nonce_coordinator
                                .return_nonce(&signer_key, self.context.chain, self.context.network, nonce);
                            return Err(PartialBatchFailure { signed, error: e });
                        }
                    }
                }
                Ok(signed)
            }
        }
    }

    fn failure(&self, error: SigningError) -> PartialBatchFailure {
        PartialBatchFailure { signed: Vec::new(), error }
    }

    #[allow(clippy::too_many_arguments)]
    fn batch_signed_tx(
        &self,
        request_ids: Vec<String>,
        batch_id: Option<String>,
        nonce: u64,
        data: Bytes,
        gas_limit: u64,
        max_fee: u128,
        max_priority: u128,
        raw: String,
        hash: String,
        try_count: u32,
    ) -> SignedTransaction {
        SignedTransaction {
            request_ids,
            batch_id,
            transaction_type: SignedTransactionKind::Batch,
            chain_id: self.context.chain_id,
            chain: self.context.chain.to_string(),
            network: self.context.network.to_string(),
            from: checksum(self.address),
            to: checksum(self.context.multicall3_address),
            nonce,
            value: "0".to_string(),
            data: data_hex(&data),
            gas_limit,
            max_fee_per_gas: max_fee.to_string(),
            max_priority_fee_per_gas: max_priority.to_string(),
            raw_signed_tx: raw,
            tx_hash: hash,
            try_count,
            status: RequestStatus::Signed,
            signed_at: Utc::now(),
        }
    }

    /// Re-reads the network nonce and advances the cached slot if the
    /// chain has moved ahead of it. Non-fatal: a failure here just means
    /// the batch proceeds with whatever nonce the coordinator already
    /// holds.
    async fn reconcile_nonce(&self) {
        let network_nonce = match self.chain_client.get_transaction_count(self.address, BlockTag::Pending).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "failed to reconcile nonce before batch signing");
                return;
            }
        };

        let signer_key = checksum(self.address);
        let cached = self
            .nonce_coordinator
            .get(&signer_key, self.context.chain, self.context.network)
            .await
            .unwrap_or(None)
            .unwrap_or(0);

        if cached < network_nonce {
            if let Err(e) = self
                .nonce_coordinator
                .set(&signer_key, network_nonce, self.context.chain, self.context.network)
                .await
            {
                tracing::warn!(error = %e, "failed to advance nonce slot during reconciliation");
            }
        }
    }

    /// Best-effort: check aggregated allowances via Multicall3 and warn
    /// when any token's allowance for this signer is short of what the
    /// batch needs. Approving is out of scope.
    async fn warn_on_insufficient_allowances(&self, transfers: &[Transfer]) {
        use std::collections::HashMap;

        let mut required: HashMap<Address, U256> = HashMap::new();
        for t in transfers {
            *required.entry(t.token_address).or_insert(U256::ZERO) += t.amount;
        }
        if required.is_empty() {
            return;
        }

        let tokens: Vec<Address> = required.keys().copied().collect();
        let calls: Vec<Call3> = tokens
            .iter()
            .map(|token| Call3 {
                target: *token,
                allowFailure: true,
                callData: encode_allowance(self.address, self.context.multicall3_address),
            })
            .collect();

        let tx = TransactionRequest::default()
            .to(self.context.multicall3_address)
            .input(Bytes::from(encode_aggregate3(calls)));

        let return_data = match self.chain_client.call(&tx).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "allowance check via multicall3 failed, proceeding without it");
                return;
            }
        };

        let results = match withdrawal_chain::contracts::decode_aggregate3_result(&return_data) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode allowance check results");
                return;
            }
        };

        for (token, result) in tokens.iter().zip(results.iter()) {
            if !result.success || result.returnData.len() < 32 {
                continue;
            }
            let allowance = U256::from_be_slice(&result.returnData[result.returnData.len() - 32..]);
            if let Some(need) = required.get(token) {
                if allowance < *need {
                    tracing::warn!(
                        token = %checksum(*token),
                        allowance = %allowance,
                        required = %need,
                        "signer allowance is short for this batch"
                    );
                }
            }
        }
    }

    /// Shared tail of `SignSingle`/`SignBatch`: allocate fees (from
    /// cache or fresh, buffered), build the EIP-1559 request and sign
    /// it. Returns the raw encoded bytes, tx hash, the buffered fees
    /// actually used, and the buffered gas limit.
    async fn sign_at_nonce(
        &self,
        to: Address,
        value: U256,
        data: Bytes,
        estimated_gas: u64,
        nonce: u64,
    ) -> Result<(Bytes, alloy::primitives::B256, u128, u128, u64), SigningError> {
        let (max_fee, max_priority) = self.acquire_fees().await?;
        let buffered_max_fee = (max_fee as f64 * FEE_BUFFER) as u128;
        let buffered_priority = (max_priority as f64 * FEE_BUFFER) as u128;
        let gas_limit = (estimated_gas as f64 * GAS_LIMIT_BUFFER) as u64;

        let tx = TransactionRequest::default()
            .with_chain_id(self.context.chain_id)
            .nonce(nonce)
            .to(to)
            .value(value)
            .input(data)
            .gas_limit(gas_limit)
            .max_fee_per_gas(buffered_max_fee)
            .max_priority_fee_per_gas(buffered_priority);

        let envelope = tx
            .build(&self.wallet)
            .await
            .map_err(|e| SigningError::Other(anyhow!("failed to sign transaction: {e}")))?;

        let hash = *envelope.tx_hash();
        let raw = Bytes::from(envelope.encoded_2718());
        Ok((raw, hash, buffered_max_fee, buffered_priority, gas_limit))
    }

    /// §4.4 step 4: prefer the process-local cache; on a miss, fetch
    /// fresh fee data and require both fields to be present.
    async fn acquire_fees(&self) -> Result<(u128, u128), SigningError> {
        if let Some(cached) = self.gas_cache.get() {
            return Ok(cached);
        }

        let fee_data = self.chain_client.fee_data().await.map_err(|e| SigningError::Rpc(e.to_string()))?;
        let (max_fee, max_priority) = match (fee_data.max_fee_per_gas, fee_data.max_priority_fee_per_gas) {
            (Some(f), Some(p)) => (f, p),
            _ => return Err(SigningError::Rpc("RPC did not return both fee fields".to_string())),
        };
        self.gas_cache.set(max_fee, max_priority);
        Ok((max_fee, max_priority))
    }
}

fn data_hex(data: &Bytes) -> String {
    if data.is_empty() {
        "0x".to_string()
    } else {
        data.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GasConfig;
    use alloy::primitives::{address, Bytes as AlloyBytes};
    use async_trait::async_trait;
    use withdrawal_api::{InMemoryKvStore, StaticSecretsSource, StaticTokenCatalog};
    use withdrawal_chain::FeeData;

    struct FakeChainClient {
        chain_id: u64,
    }

    #[async_trait]
    impl ChainClient for FakeChainClient {
        async fn chain_id(&self) -> anyhow::Result<u64> {
            Ok(self.chain_id)
        }
        async fn get_transaction_count(&self, _address: Address, _block: BlockTag) -> anyhow::Result<u64> {
            Ok(5)
        }
        async fn fee_data(&self) -> anyhow::Result<FeeData> {
            Ok(FeeData {
                max_fee_per_gas: Some(100),
                max_priority_fee_per_gas: Some(2),
            })
        }
        async fn estimate_gas(&self, _tx: &TransactionRequest) -> anyhow::Result<u64> {
            Ok(21_000)
        }
        async fn call(&self, _tx: &TransactionRequest) -> anyhow::Result<AlloyBytes> {
            Ok(AlloyBytes::new())
        }
    }

    async fn signer(chain_id: u64) -> TransactionSigner {
        let context = ChainContext::new(chain_id, "ethereum", "mainnet", Address::ZERO, 18, None);
        let chain_client: Arc<dyn ChainClient> = Arc::new(FakeChainClient { chain_id });
        let nonce_coordinator = Arc::new(NonceCoordinator::new(Arc::new(InMemoryKvStore::new())));
        let planner = Arc::new(BatchPlanner::new(chain_client.clone(), GasConfig::default()));
        let token_lookup: Arc<dyn TokenLookup> = Arc::new(StaticTokenCatalog::new());
        let secrets = StaticSecretsSource::new().with_key(
            chain_id,
            "mainnet",
            "0000000000000000000000000000000000000000000000000000000000000001",
        );

        TransactionSigner::initialize(context, chain_client, nonce_coordinator, planner, token_lookup, &secrets, Arc::new(GasPriceCache::default()))
            .await
            .unwrap()
    }

    fn native_request() -> WithdrawalRequest {
        WithdrawalRequest {
            request_id: "r1".to_string(),
            chain_id: 1,
            network: "mainnet".to_string(),
            token_address: None,
            recipient: "0x742d35Cc6634C0532925a3b844Bc454e4438fAed".to_string(),
            amount: "1000000000000000000".to_string(),
            processing_mode: withdrawal_api::ProcessingMode::SingleOnly,
            status: withdrawal_api::RequestStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            attempt_count: 0,
            batch_id: None,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn initialize_fails_on_chain_id_mismatch() {
        let context = ChainContext::new(999, "ethereum", "mainnet", Address::ZERO, 18, None);
        let chain_client: Arc<dyn ChainClient> = Arc::new(FakeChainClient { chain_id: 1 });
        let nonce_coordinator = Arc::new(NonceCoordinator::new(Arc::new(InMemoryKvStore::new())));
        let planner = Arc::new(BatchPlanner::new(chain_client.clone(), GasConfig::default()));
        let token_lookup: Arc<dyn TokenLookup> = Arc::new(StaticTokenCatalog::new());
        let secrets = StaticSecretsSource::new().with_key(
            999,
            "mainnet",
            "0000000000000000000000000000000000000000000000000000000000000001",
        );

        let result =
            TransactionSigner::initialize(context, chain_client, nonce_coordinator, planner, token_lookup, &secrets, Arc::new(GasPriceCache::default()))
                .await;
        assert!(matches!(result, Err(SigningError::ChainIdMismatch { .. })));
    }

    #[tokio::test]
    async fn sign_single_issues_strictly_increasing_nonces() {
        let signer = signer(1).await;
        let first = signer.sign_single(&native_request()).await.unwrap();
        let second = signer.sign_single(&native_request()).await.unwrap();
        assert_eq!(first.nonce, 5);
        assert_eq!(second.nonce, 6);
        assert!(first.raw_signed_tx.starts_with("0x"));
        assert!(first.tx_hash.starts_with("0x"));
    }

    #[tokio::test]
    async fn sign_single_buffers_fees_and_gas() {
        let signer = signer(1).await;
        let signed = signer.sign_single(&native_request()).await.unwrap();
        assert_eq!(signed.max_fee_per_gas, "110");
        assert_eq!(signed.max_priority_fee_per_gas, "2");
        assert_eq!(signed.gas_limit, (21_000f64 * GAS_LIMIT_BUFFER) as u64);
    }

    #[tokio::test]
    async fn sign_batch_allocates_one_nonce_for_unsplit_batch() {
        let signer = signer(1).await;
        let token = address!("dAC17F958D2ee523a2206206994597C13D831ec7");
        let transfers = vec![Transfer {
            transaction_id: "t1".to_string(),
            token_address: token,
            to: address!("742d35Cc6634C0532925a3b844Bc454e4438fAed"),
            amount: U256::from(1_000_000u64),
        }];

        let signed = signer.sign_batch("batch-1", &transfers, 1).await.unwrap();
        assert_eq!(signed.len(), 1);
        assert_eq!(signed[0].batch_id.as_deref(), Some("batch-1"));
        assert_eq!(signed[0].request_ids, vec!["t1".to_string()]);
    }
}
