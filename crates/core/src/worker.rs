//! Signing Worker (§4.5): the long-running, batch-aware consume/
//! validate/plan/sign/emit loop for one `(chain, network)`.

use crate::classifier::classify;
use crate::config::BatchProcessingConfig;
use crate::context::ChainContext;
use crate::dlq::DlqPipeline;
use crate::error::SigningError;
use crate::planner::Transfer;
use crate::signer::{PartialBatchFailure, TransactionSigner};
use alloy::primitives::U256;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use withdrawal_api::{
    BatchStatus, BatchTransaction, ErrorInfo, PersistentStore, ProcessingMode, Queue, QueueMessage, RequestStatus, SignedTransaction,
    TokenLookup, WithdrawalRequest,
};
use withdrawal_chain::{checksum, normalize_address, parse_positive_u256, validate_hex_address, ChainClient, GasPriceCache};

/// Visibility timeout for both ingress receive and (implicitly) the
/// window recovery assumes for a not-yet-broadcast egress message.
const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);
/// Worker iteration time budget (§5 "cap 30 s").
const ITERATION_CAP: Duration = Duration::from_secs(30);

pub struct SigningWorker {
    context: ChainContext,
    ingress: Arc<dyn Queue<WithdrawalRequest>>,
    egress: Arc<dyn Queue<SignedTransaction>>,
    store: Arc<dyn PersistentStore>,
    dlq: Arc<DlqPipeline>,
    signer: Arc<TransactionSigner>,
    chain_client: Arc<dyn ChainClient>,
    gas_cache: Arc<GasPriceCache>,
    token_lookup: Arc<dyn TokenLookup>,
    batch_config: BatchProcessingConfig,
    receive_batch_size: usize,
    shutdown: CancellationToken,
}

#[allow(clippy::too_many_arguments)]
impl SigningWorker {
    pub fn new(
        context: ChainContext,
        ingress: Arc<dyn Queue<WithdrawalRequest>>,
        egress: Arc<dyn Queue<SignedTransaction>>,
        store: Arc<dyn PersistentStore>,
        dlq: Arc<DlqPipeline>,
        signer: Arc<TransactionSigner>,
        chain_client: Arc<dyn ChainClient>,
        gas_cache: Arc<GasPriceCache>,
        token_lookup: Arc<dyn TokenLookup>,
        batch_config: BatchProcessingConfig,
        receive_batch_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            context,
            ingress,
            egress,
            store,
            dlq,
            signer,
            chain_client,
            gas_cache,
            token_lookup,
            batch_config,
            receive_batch_size,
            shutdown,
        }
    }

    /// Runs iterations until `shutdown` is cancelled. Each iteration gets
    /// a 30s budget; a timed-out iteration is logged and the loop
    /// continues to its shutdown check rather than hanging forever.
    pub async fn run(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                tracing::info!(chain = self.context.chain, network = self.context.network, "signing worker shutting down");
                return;
            }

            match tokio::time::timeout(ITERATION_CAP, self.run_iteration()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, chain = self.context.chain, network = self.context.network, "worker iteration failed"),
                Err(_) => tracing::warn!(chain = self.context.chain, network = self.context.network, "worker iteration exceeded its 30s cap"),
            }
        }
    }

    /// One pass of the loop (§4.5 steps 1-7).
    async fn run_iteration(&self) -> anyhow::Result<()> {
        if !self.ensure_priced().await {
            return Ok(());
        }

        let messages = self.ingress.receive(self.receive_batch_size, VISIBILITY_TIMEOUT).await?;
        if messages.is_empty() {
            return Ok(());
        }

        let mut valid = Vec::with_capacity(messages.len());
        for message in messages {
            match self.structural_errors(&message.body) {
                Ok(()) => valid.push(message),
                Err(reasons) => self.reject_invalid(message, reasons).await?,
            }
        }
        if valid.is_empty() {
            return Ok(());
        }

        let (retrying, fresh): (Vec<_>, Vec<_>) = valid.into_iter().partition(|m| m.body.attempt_count > 0);
        let (batchable, native): (Vec<_>, Vec<_>) = fresh.into_iter().partition(|m| m.body.token_address.is_some());

        let groups = group_by_token(batchable);
        let eligible_count: usize = groups.iter().map(|(_, members)| members.len()).sum();
        let batching = self.should_batch(eligible_count, &groups);

        let mut individual = retrying;
        individual.extend(native);

        let mut batch_jobs = Vec::new();
        for (_, members) in groups {
            if batching && members.len() >= self.batch_config.batch_threshold {
                batch_jobs.push(members);
            } else {
                individual.extend(members);
            }
        }

        let individual_work = futures::future::join_all(individual.into_iter().map(|m| self.sign_one(m)));
        let batch_work = futures::future::join_all(batch_jobs.into_iter().map(|members| self.sign_batch_group(members)));
        let (individual_results, batch_results) = tokio::join!(individual_work, batch_work);

        for result in individual_results.into_iter().chain(batch_results) {
            if let Err(e) = result {
                tracing::error!(error = %e, "message processing failed unexpectedly");
            }
        }

        Ok(())
    }

    /// §4.5 step 1: refresh the process-wide gas sample if expired.
    /// Returns `false` when the iteration should be skipped outright.
    async fn ensure_priced(&self) -> bool {
        if self.gas_cache.get().is_some() {
            return true;
        }

        match self.chain_client.fee_data().await {
            Ok(fee_data) => match (fee_data.max_fee_per_gas, fee_data.max_priority_fee_per_gas) {
                (Some(max_fee), Some(max_priority)) => {
                    self.gas_cache.set(max_fee, max_priority);
                    true
                }
                _ => {
                    tracing::warn!(chain = self.context.chain, network = self.context.network, "fee data missing a field, skipping iteration");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, chain = self.context.chain, network = self.context.network, "failed to refresh gas price cache, skipping iteration");
                false
            }
        }
    }

    /// §4.5 step 3: structural validation.
    fn structural_errors(&self, request: &WithdrawalRequest) -> Result<(), Vec<String>> {
        let mut reasons = Vec::new();

        if request.chain_id != self.context.chain_id || request.network != self.context.network {
            reasons.push(format!("unsupported chain/network: {}:{}", request.chain_id, request.network));
        }
        if !validate_hex_address(&request.recipient) {
            reasons.push(format!("invalid recipient address: {}", request.recipient));
        }
        if let Some(token) = &request.token_address {
            if !validate_hex_address(token) {
                reasons.push(format!("invalid token address: {token}"));
            }
        }
        if let Err(e) = parse_positive_u256(&request.amount) {
            reasons.push(format!("invalid amount: {e}"));
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(reasons)
        }
    }

    async fn reject_invalid(&self, message: QueueMessage<WithdrawalRequest>, reasons: Vec<String>) -> anyhow::Result<()> {
        let request_id = message.body.request_id.clone();
        tracing::warn!(request_id = %request_id, reasons = ?reasons, "rejecting structurally invalid withdrawal request");

        if self.store.get_request(&request_id).await?.is_none() {
            self.store.put_request(message.body.clone()).await?;
        }
        let _ = self
            .store
            .transition_request(&request_id, message.body.status, RequestStatus::Failed)
            .await?;
        if let Some(mut stored) = self.store.get_request(&request_id).await? {
            stored.status = RequestStatus::Failed;
            stored.last_error = Some(ErrorInfo {
                category: "InvalidTransaction".to_string(),
                message: reasons.join("; "),
                occurred_at: Utc::now(),
            });
            self.store.put_request(stored).await?;
        }
        self.ingress.ack(&message.receipt_handle).await?;
        Ok(())
    }

    /// §4.5 step 5: the single batch/no-batch decision for the whole
    /// eligible set.
    fn should_batch(&self, eligible_count: usize, groups: &[(String, Vec<QueueMessage<WithdrawalRequest>>)]) -> bool {
        if !self.batch_config.enabled {
            return false;
        }
        if eligible_count < self.batch_config.min_batch_size {
            return false;
        }
        if !groups.iter().any(|(_, members)| members.len() >= self.batch_config.batch_threshold) {
            return false;
        }
        self.batch_config.savings_percent(eligible_count) >= self.batch_config.min_gas_savings_percent
    }

    /// §4.5 step 6: sign one message on the individual path.
    async fn sign_one(&self, message: QueueMessage<WithdrawalRequest>) -> anyhow::Result<()> {
        let request_id = message.body.request_id.clone();

        if self.store.get_request(&request_id).await?.is_none() {
            self.store.put_request(message.body.clone()).await?;
        }

        let expected = self.store.get_request(&request_id).await?.map(|r| r.status).unwrap_or(RequestStatus::Pending);
        let claimed = self.store.transition_request(&request_id, expected, RequestStatus::Signing).await?;
        if !claimed {
            tracing::warn!(request_id = %request_id, "could not claim request for signing, leaving for redelivery");
            self.ingress.nack(&message.receipt_handle).await?;
            return Ok(());
        }

        let mut request = message.body.clone();
        request.attempt_count += 1;
        request.status = RequestStatus::Signing;
        self.store.put_request(request.clone()).await?;

        match self.signer.sign_single(&request).await {
            Ok(signed) => {
                self.egress.send(signed).await?;
                self.store.transition_request(&request_id, RequestStatus::Signing, RequestStatus::Signed).await?;
                self.ingress.ack(&message.receipt_handle).await?;
                tracing::info!(request_id = %request_id, chain = self.context.chain, network = self.context.network, "signed withdrawal request");
                Ok(())
            }
            Err(e) => self.handle_single_failure(&message, &request, e).await,
        }
    }

    /// §7 "Nonce-store unavailable ⇒ re-queue (do not classify)": a
    /// transient nonce-store outage never reaches the classifier or the
    /// DLQ pipeline, and never writes a terminal status — it just nacks
    /// so the queue redelivers the message. Everything else is
    /// classified and run through the DLQ pipeline as before.
    async fn handle_single_failure(&self, message: &QueueMessage<WithdrawalRequest>, request: &WithdrawalRequest, error: SigningError) -> anyhow::Result<()> {
        if matches!(error, SigningError::NonceStoreUnavailable(_)) {
            tracing::warn!(request_id = %request.request_id, error = %error, "nonce store unavailable, leaving message for redelivery");
            let _ = self
                .store
                .transition_request(&request.request_id, RequestStatus::Signing, RequestStatus::Pending)
                .await;
            self.ingress.nack(&message.receipt_handle).await?;
            return Ok(());
        }

        let error = anyhow::Error::from(error);
        let category = classify(&error);
        let error_info = ErrorInfo {
            category: format!("{category:?}"),
            message: error.to_string(),
            occurred_at: Utc::now(),
        };

        tracing::warn!(request_id = %request.request_id, category = ?category, error = %error, "signing attempt failed");

        let mut payload = HashMap::new();
        payload.insert("recipient".to_string(), request.recipient.clone());
        payload.insert("amount".to_string(), request.amount.clone());
        if let Some(token) = &request.token_address {
            payload.insert("token_address".to_string(), token.clone());
        }

        let outcome = self
            .dlq
            .handle_failure(&request.request_id, request.batch_id.clone(), category, error.to_string(), payload)
            .await?;

        if outcome.dead_lettered {
            let _ = self
                .store
                .transition_request(&request.request_id, RequestStatus::Signing, RequestStatus::DeadLettered)
                .await;
            if let Some(mut stored) = self.store.get_request(&request.request_id).await? {
                stored.status = RequestStatus::DeadLettered;
                stored.last_error = Some(error_info);
                self.store.put_request(stored).await?;
            }
            self.ingress.ack(&message.receipt_handle).await?;
        } else {
            let _ = self
                .store
                .transition_request(&request.request_id, RequestStatus::Signing, RequestStatus::Pending)
                .await;
            if let Some(mut stored) = self.store.get_request(&request.request_id).await? {
                stored.status = RequestStatus::Pending;
                stored.last_error = Some(error_info);
                self.store.put_request(stored).await?;
            }
            self.ingress.nack(&message.receipt_handle).await?;
        }
        Ok(())
    }

    /// §4.5 step 7: sign one token group as a batch.
    async fn sign_batch_group(&self, members: Vec<QueueMessage<WithdrawalRequest>>) -> anyhow::Result<()> {
        let batch_id = format!("batch-{}", Uuid::new_v4());

        let total_amount = members
            .iter()
            .try_fold(U256::ZERO, |acc, m| parse_positive_u256(&m.body.amount).map(|v| acc + v))
            .map(|v| v.to_string())
            .unwrap_or_default();
        let symbol = match &members[0].body.token_address {
            Some(token) => self
                .token_lookup
                .lookup(self.context.chain_id, token)
                .await?
                .map(|info| info.symbol)
                .unwrap_or_default(),
            None => String::new(),
        };

        let batch_row = BatchTransaction {
            batch_id: batch_id.clone(),
            chain_id: self.context.chain_id,
            network: self.context.network.to_string(),
            request_ids: members.iter().map(|m| m.body.request_id.clone()).collect(),
            multicall_address: checksum(self.context.multicall3_address),
            encoded_calldata: String::new(),
            total_amount,
            symbol,
            estimated_gas: 0,
            nonce: None,
            gas_limit: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            tx_hash: None,
            status: BatchStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.put_batch(batch_row).await?;

        let mut transfers = Vec::with_capacity(members.len());
        for member in &members {
            let request_id = member.body.request_id.clone();
            if self.store.get_request(&request_id).await?.is_none() {
                self.store.put_request(member.body.clone()).await?;
            }
            let expected = self.store.get_request(&request_id).await?.map(|r| r.status).unwrap_or(RequestStatus::Pending);
            self.store.transition_request(&request_id, expected, RequestStatus::Signing).await?;

            if let Some(mut stored) = self.store.get_request(&request_id).await? {
                stored.status = RequestStatus::Signing;
                stored.batch_id = Some(batch_id.clone());
                stored.processing_mode = ProcessingMode::Batchable;
                stored.attempt_count += 1;
                self.store.put_request(stored).await?;
            }

            let Some(token_address) = member.body.token_address.clone() else {
                anyhow::bail!("batch group member {request_id} has no token_address, cannot be an ERC-20 transfer");
            };
            transfers.push(Transfer {
                transaction_id: request_id,
                token_address: normalize_address(&token_address)?,
                to: normalize_address(&member.body.recipient)?,
                amount: parse_positive_u256(&member.body.amount)?,
            });
        }

        // Batch-eligible members are always drawn from `fresh` (§4.5 step
        // 5), so every member enters this batch at the same attempt
        // count; the increment above already applied it to the stored
        // copies.
        let try_count = members[0].body.attempt_count + 1;

        match self.signer.sign_batch(&batch_id, &transfers, try_count).await {
            Ok(signed_transactions) => {
                self.store.transition_batch(&batch_id, BatchStatus::Pending, BatchStatus::Signed).await?;
                // §4.5 step 7(d): carry the signed tx fields onto the batch
                // row, not just the status. A split batch produces more
                // than one sub-transaction under this batch_id; the row
                // summarizes the first one and totals gas across all.
                if let Some(mut batch) = self.store.get_batch(&batch_id).await? {
                    if let Some(first) = signed_transactions.first() {
                        batch.encoded_calldata = first.data.clone();
                        batch.nonce = Some(first.nonce);
                        batch.max_fee_per_gas = Some(first.max_fee_per_gas.clone());
                        batch.max_priority_fee_per_gas = Some(first.max_priority_fee_per_gas.clone());
                        batch.tx_hash = Some(first.tx_hash.clone());
                    }
                    let total_gas: u64 = signed_transactions.iter().map(|s| s.gas_limit).sum();
                    batch.gas_limit = Some(total_gas);
                    batch.estimated_gas = total_gas;
                    batch.status = BatchStatus::Signed;
                    self.store.put_batch(batch).await?;
                }
                for signed in &signed_transactions {
                    for request_id in &signed.request_ids {
                        self.store.transition_request(request_id, RequestStatus::Signing, RequestStatus::Signed).await?;
                    }
                    self.egress.send(signed.clone()).await?;
                }
                for member in &members {
                    self.ingress.ack(&member.receipt_handle).await?;
                }
                tracing::info!(batch_id = %batch_id, members = members.len(), "signed batch");
                Ok(())
            }
            Err(partial) => self.revert_batch(&batch_id, &members, partial).await,
        }
    }

    /// §4.5 step 7(e) and the Open Question it leaves unresolved: groups
    /// already signed before a mid-sequence failure are still emitted;
    /// unsigned members are classified and either rewound to `PENDING`
    /// (recoverable) or marked `FAILED` (permanent).
    async fn revert_batch(&self, batch_id: &str, members: &[QueueMessage<WithdrawalRequest>], partial: PartialBatchFailure) -> anyhow::Result<()> {
        let signed_ids: std::collections::HashSet<String> = partial.signed.iter().flat_map(|s| s.request_ids.iter().cloned()).collect();

        for signed in &partial.signed {
            for request_id in &signed.request_ids {
                self.store.transition_request(request_id, RequestStatus::Signing, RequestStatus::Signed).await?;
            }
            self.egress.send(signed.clone()).await?;
        }
        for member in members {
            if signed_ids.contains(&member.body.request_id) {
                self.ingress.ack(&member.receipt_handle).await?;
            }
        }

        // §7 "Nonce-store unavailable ⇒ re-queue (do not classify)": the
        // unsigned members never reached a decision on-chain, so they go
        // back for redelivery with no classification and no terminal
        // status write, same as the single-message path.
        if matches!(partial.error, SigningError::NonceStoreUnavailable(_)) {
            tracing::warn!(batch_id = %batch_id, error = %partial.error, "nonce store unavailable during batch signing, leaving unsigned members for redelivery");
            for member in members {
                if !signed_ids.contains(&member.body.request_id) {
                    self.ingress.nack(&member.receipt_handle).await?;
                }
            }
            return Ok(());
        }

        let error = anyhow::Error::from(partial.error);
        let category = classify(&error);
        let error_info = ErrorInfo {
            category: format!("{category:?}"),
            message: error.to_string(),
            occurred_at: Utc::now(),
        };

        tracing::warn!(batch_id = %batch_id, category = ?category, error = %error, "batch signing failed, reverting unsigned members");
        self.store.transition_batch(batch_id, BatchStatus::Pending, BatchStatus::Failed).await?;

        for member in members {
            let request_id = &member.body.request_id;
            if signed_ids.contains(request_id) {
                continue;
            }

            if category.is_permanent() {
                let _ = self.store.transition_request(request_id, RequestStatus::Signing, RequestStatus::Failed).await;
                if let Some(mut stored) = self.store.get_request(request_id).await? {
                    stored.status = RequestStatus::Failed;
                    stored.last_error = Some(error_info.clone());
                    self.store.put_request(stored).await?;
                }
                // Terminal: no value in redelivering, unlike the
                // recoverable branch below.
                self.ingress.ack(&member.receipt_handle).await?;
            } else {
                let _ = self.store.transition_request(request_id, RequestStatus::Signing, RequestStatus::Pending).await;
                if let Some(mut stored) = self.store.get_request(request_id).await? {
                    stored.status = RequestStatus::Pending;
                    stored.batch_id = None;
                    stored.processing_mode = ProcessingMode::SingleOnly;
                    stored.last_error = Some(error_info.clone());
                    self.store.put_request(stored).await?;
                }
                // Left un-acked deliberately: the message reappears after
                // the visibility timeout and is retried on the individual
                // path, since attempt_count is now > 0 (§4.5 step 7e).
            }
        }
        Ok(())
    }
}

fn group_by_token(messages: Vec<QueueMessage<WithdrawalRequest>>) -> Vec<(String, Vec<QueueMessage<WithdrawalRequest>>)> {
    let mut groups: Vec<(String, Vec<QueueMessage<WithdrawalRequest>>)> = Vec::new();
    for message in messages {
        let key = message.body.token_address.clone().unwrap_or_default().to_lowercase();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some(group) => group.1.push(message),
            None => groups.push((key, vec![message])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GasConfig;
    use crate::nonce::NonceCoordinator;
    use crate::planner::BatchPlanner;
    use alloy::primitives::{Address, Bytes as AlloyBytes};
    use alloy::rpc::types::TransactionRequest;
    use async_trait::async_trait;
    use withdrawal_api::{InMemoryKvStore, InMemoryQueue, InMemoryStore, StaticSecretsSource, StaticTokenCatalog, TokenLookup};
    use withdrawal_chain::FeeData;

    struct FakeChainClient;

    #[async_trait]
    impl ChainClient for FakeChainClient {
        async fn chain_id(&self) -> anyhow::Result<u64> {
            Ok(1)
        }
        async fn get_transaction_count(&self, _address: Address, _block: withdrawal_chain::BlockTag) -> anyhow::Result<u64> {
            Ok(0)
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

    fn native_request(id: &str) -> WithdrawalRequest {
        WithdrawalRequest {
            request_id: id.to_string(),
            chain_id: 1,
            network: "mainnet".to_string(),
            token_address: None,
            recipient: "0x742d35Cc6634C0532925a3b844Bc454e4438fAed".to_string(),
            amount: "1000000000000000000".to_string(),
            processing_mode: ProcessingMode::SingleOnly,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            attempt_count: 0,
            batch_id: None,
            last_error: None,
        }
    }

    async fn worker() -> (SigningWorker, Arc<dyn Queue<WithdrawalRequest>>, Arc<dyn Queue<SignedTransaction>>, Arc<dyn PersistentStore>) {
        let context = ChainContext::new(1, "ethereum", "mainnet", Address::ZERO, 18, None);
        let chain_client: Arc<dyn ChainClient> = Arc::new(FakeChainClient);
        let nonce_coordinator = Arc::new(NonceCoordinator::new(Arc::new(InMemoryKvStore::new())));
        let planner = Arc::new(BatchPlanner::new(chain_client.clone(), GasConfig::default()));
        let token_lookup: Arc<dyn TokenLookup> = Arc::new(StaticTokenCatalog::new());
        let secrets = StaticSecretsSource::new().with_key(1, "mainnet", "0000000000000000000000000000000000000000000000000000000000000001");
        let gas_cache = Arc::new(GasPriceCache::default());

        let signer = Arc::new(
            TransactionSigner::initialize(context, chain_client.clone(), nonce_coordinator, planner, token_lookup, &secrets, gas_cache.clone())
                .await
                .unwrap(),
        );

        let ingress: Arc<dyn Queue<WithdrawalRequest>> = Arc::new(InMemoryQueue::new());
        let egress: Arc<dyn Queue<SignedTransaction>> = Arc::new(InMemoryQueue::new());
        let store: Arc<dyn PersistentStore> = Arc::new(InMemoryStore::new());
        let dlq = Arc::new(DlqPipeline::new(
            Arc::new(InMemoryKvStore::new()),
            Arc::new(InMemoryQueue::new()),
            crate::config::DlqPolicy::default(),
            5,
        ));

        let worker = SigningWorker::new(
            context,
            ingress.clone(),
            egress.clone(),
            store.clone(),
            dlq,
            signer,
            chain_client,
            gas_cache,
            token_lookup,
            BatchProcessingConfig::default(),
            50,
            CancellationToken::new(),
        );
        (worker, ingress, egress, store)
    }

    #[tokio::test]
    async fn signs_a_valid_native_request_individually() {
        let (worker, ingress, egress, store) = worker().await;
        ingress.send(native_request("r1")).await.unwrap();

        worker.run_iteration().await.unwrap();

        let stored = store.get_request("r1").await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Signed);
        assert_eq!(egress.visible_count().await.unwrap(), 1);
        assert_eq!(ingress.visible_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejects_request_with_invalid_amount() {
        let (worker, ingress, _egress, store) = worker().await;
        let mut request = native_request("bad1");
        request.amount = "not-a-number".to_string();
        ingress.send(request).await.unwrap();

        worker.run_iteration().await.unwrap();

        let stored = store.get_request("bad1").await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Failed);
        assert_eq!(ingress.visible_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn skips_iteration_entirely_on_empty_queue() {
        let (worker, _ingress, egress, _store) = worker().await;
        worker.run_iteration().await.unwrap();
        assert_eq!(egress.visible_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batches_erc20_transfers_sharing_a_token_above_threshold() {
        let (worker, ingress, egress, store) = worker().await;
        let token = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

        for i in 0..3 {
            let mut request = native_request(&format!("erc{i}"));
            request.token_address = Some(token.to_string());
            request.processing_mode = ProcessingMode::Batchable;
            request.amount = "1000000".to_string();
            ingress.send(request).await.unwrap();
        }

        worker.run_iteration().await.unwrap();

        assert_eq!(egress.visible_count().await.unwrap(), 1);
        for i in 0..3 {
            let stored = store.get_request(&format!("erc{i}")).await.unwrap().unwrap();
            assert_eq!(stored.status, RequestStatus::Signed);
            assert!(stored.batch_id.is_some());
        }
    }
}
