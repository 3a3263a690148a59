//! Withdrawal Signing Service
//!
//! Signs EVM withdrawal transactions for one or more `(chain, network)`
//! pairs: a Nonce Coordinator, Batch Planner and Transaction Signer feed
//! a Signing Worker per chain, with a startup Queue Recovery sweep and
//! DLQ-backed failure handling.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use withdrawal_api::{
    DlqMessage, EnvSecretsSource, InMemoryKvStore, InMemoryQueue, InMemoryStore, PersistentStore, Queue, RedisKvStore, SecretsSource,
    SignedTransaction, StaticTokenCatalog, TokenLookup, WithdrawalRequest,
};
use withdrawal_chain::{AlloyChainClient, ChainClient, GasPriceCache, RetryPolicy};
use withdrawal_core::{
    config, init_config, BatchPlanner, ChainContext, DlqPipeline, NonceCoordinator, QueueRecovery, SignerConfig, SigningWorker, TransactionSigner,
};

/// Environment variable names.
mod env {
    pub const CONFIG_PATH: &str = "SIGNER_CONFIG_PATH";
    pub const REDIS_URL: &str = "REDIS_URL";
    pub const RECEIVE_BATCH_SIZE: &str = "SIGNER_RECEIVE_BATCH_SIZE";
}

/// One fully wired `(chain, network)` worker plus the pieces recovery
/// and nonce reconciliation need at startup.
struct ChainHandle {
    context: ChainContext,
    address: alloy::primitives::Address,
    chain_client: Arc<dyn ChainClient>,
    worker: SigningWorker,
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,withdrawal_core=debug,withdrawal_chain=debug")))
        .init();

    let signer_config = match std::env::var(env::CONFIG_PATH) {
        Ok(path) => SignerConfig::from_file(&path)?,
        Err(_) => SignerConfig::from_env(),
    };
    signer_config.log_config();
    init_config(signer_config);

    info!("Starting withdrawal signing service");

    let retry_store = retry_store()?;
    let receive_batch_size: usize = std::env::var(env::RECEIVE_BATCH_SIZE).ok().and_then(|v| v.parse().ok()).unwrap_or(25);

    let store: Arc<dyn PersistentStore> = Arc::new(InMemoryStore::new());
    let ingress: Arc<dyn Queue<WithdrawalRequest>> = Arc::new(InMemoryQueue::new());
    let egress: Arc<dyn Queue<SignedTransaction>> = Arc::new(InMemoryQueue::new());
    let dlq_queue: Arc<dyn Queue<DlqMessage>> = Arc::new(InMemoryQueue::new());
    let token_lookup: Arc<dyn TokenLookup> = Arc::new(StaticTokenCatalog::new());
    let secrets: Arc<dyn SecretsSource> = Arc::new(EnvSecretsSource);

    let shutdown = CancellationToken::new();
    let mut handles = Vec::with_capacity(config().chains.len());

    for chain_details in &config().chains {
        let context = ChainContext::new(
            chain_details.chain_id,
            Box::leak(chain_details.chain.clone().into_boxed_str()),
            Box::leak(chain_details.network.clone().into_boxed_str()),
            chain_details
                .multicall3_address
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid multicall3 address for {}/{}: {e}", chain_details.chain, chain_details.network))?,
            chain_details.native_decimals,
            chain_details.block_gas_limit_override,
        );

        let retry_policy = RetryPolicy {
            initial_backoff: std::time::Duration::from_millis(config().retry.initial_backoff_ms),
            factor: config().retry.backoff_factor,
            max_backoff: std::time::Duration::from_millis(config().retry.max_backoff_ms),
            max_attempts: config().retry.max_attempts,
        };
        let chain_client: Arc<dyn ChainClient> = Arc::new(AlloyChainClient::with_retry_policy(chain_details.resolved_rpc_url(), retry_policy));
        let nonce_coordinator = Arc::new(NonceCoordinator::with_ttl(
            retry_store.clone(),
            std::time::Duration::from_secs(config().nonce.nonce_ttl_seconds),
        ));
        let planner = Arc::new(BatchPlanner::new(chain_client.clone(), config().gas.clone()));
        let gas_cache = Arc::new(GasPriceCache::new(config().gas.gas_price_cache_ttl()));

        let signer = Arc::new(
            TransactionSigner::initialize(
                context,
                chain_client.clone(),
                nonce_coordinator,
                planner,
                token_lookup.clone(),
                secrets.as_ref(),
                gas_cache.clone(),
            )
            .await?,
        );
        let address = signer.address();

        let dlq = Arc::new(DlqPipeline::new(
            retry_store.clone(),
            dlq_queue.clone(),
            config().retry.dlq_policy,
            config().retry.max_retries,
        ));

        let worker = SigningWorker::new(
            context,
            ingress.clone(),
            egress.clone(),
            store.clone(),
            dlq,
            signer,
            chain_client.clone(),
            gas_cache,
            token_lookup.clone(),
            config().batch_processing.clone(),
            receive_batch_size,
            shutdown.clone(),
        );

        info!(chain = context.chain, network = context.network, address = %withdrawal_chain::checksum(address), "signer initialized");
        handles.push(ChainHandle {
            context,
            address,
            chain_client,
            worker,
        });
    }

    let recovery = QueueRecovery::new(store.clone(), ingress.clone(), egress.clone());
    let report = recovery.recover(receive_batch_size).await?;
    info!(requeued = report.requeued, deleted = report.deleted, "startup queue recovery complete");

    let reconcile_entries: Vec<_> = handles.iter().map(|h| (h.context, h.address, h.chain_client.clone())).collect();
    let nonce_coordinator_for_reconcile = Arc::new(NonceCoordinator::with_ttl(
        retry_store.clone(),
        std::time::Duration::from_secs(config().nonce.nonce_ttl_seconds),
    ));
    recovery.reconcile_nonces(&nonce_coordinator_for_reconcile, &reconcile_entries).await;

    let mut tasks = Vec::with_capacity(handles.len());
    for handle in handles {
        tasks.push(tokio::spawn(async move { handle.worker.run().await }));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    shutdown.cancel();

    for task in tasks {
        let _ = task.await;
    }

    info!("withdrawal signing service stopped");
    Ok(())
}

fn retry_store() -> Result<Arc<dyn withdrawal_api::KVStore>> {
    match std::env::var(env::REDIS_URL) {
        Ok(url) => {
            info!("using redis-backed nonce/retry store");
            Ok(Arc::new(RedisKvStore::new(url)?))
        }
        Err(_) => {
            info!("REDIS_URL not set, using in-memory nonce/retry store");
            Ok(Arc::new(InMemoryKvStore::new()))
        }
    }
}

fn print_banner() {
    println!(
        r#"
    ╦ ╦┬┌┬┐┬ ┬┌┬┐┬─┐┌─┐┬ ┬┌─┐┬
    ║║║│ │ ├─┤ │││├┬┘├─┤│││├─┤│
    ╚╩╝┴ ┴ ┴ ┴─┴┘┴└─┴ ┴└┴┘┴ ┴┴─┘
    Withdrawal Signing Service v0.1.0
    "#
    );
}
