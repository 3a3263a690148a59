//! Queue Recovery (§4.8): a startup sweep of the egress (signed-tx)
//! queue that resurrects in-flight work after a restart, plus the
//! nonce-slot resynchronization that accompanies it.

use crate::context::ChainContext;
use crate::nonce::NonceCoordinator;
use alloy::primitives::Address;
use std::sync::Arc;
use withdrawal_api::{BatchStatus, PersistentStore, ProcessingMode, Queue, RequestStatus, SignedTransaction, WithdrawalRequest};
use withdrawal_chain::{checksum, BlockTag, ChainClient};

fn is_terminal(status: RequestStatus) -> bool {
    matches!(
        status,
        RequestStatus::Signed | RequestStatus::Submitted | RequestStatus::Confirmed | RequestStatus::Failed | RequestStatus::DeadLettered
    )
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Egress messages whose member(s) were re-enqueued to ingress.
    pub requeued: u32,
    /// Egress messages deleted outright: no matching request, already
    /// terminal, or never reached `SIGNING`.
    pub deleted: u32,
}

pub struct QueueRecovery {
    store: Arc<dyn PersistentStore>,
    ingress: Arc<dyn Queue<WithdrawalRequest>>,
    egress: Arc<dyn Queue<SignedTransaction>>,
}

impl QueueRecovery {
    pub fn new(store: Arc<dyn PersistentStore>, ingress: Arc<dyn Queue<WithdrawalRequest>>, egress: Arc<dyn Queue<SignedTransaction>>) -> Self {
        Self { store, ingress, egress }
    }

    /// Drains up to `max_messages` from the egress queue and restores
    /// each to ingress if broadcasting it is still appropriate.
    pub async fn recover(&self, max_messages: usize) -> anyhow::Result<RecoveryReport> {
        let messages = self
            .egress
            .receive(max_messages, std::time::Duration::from_secs(30))
            .await?;

        let mut report = RecoveryReport::default();
        for message in messages {
            if message.body.batch_id.is_none() {
                self.recover_single(&message.receipt_handle, &message.body, &mut report).await?;
            } else {
                self.recover_batch(&message.receipt_handle, &message.body, &mut report).await?;
            }
        }
        Ok(report)
    }

    async fn recover_single(&self, receipt_handle: &str, signed: &SignedTransaction, report: &mut RecoveryReport) -> anyhow::Result<()> {
        let Some(request_id) = signed.request_ids.first() else {
            self.egress.ack(receipt_handle).await?;
            report.deleted += 1;
            return Ok(());
        };

        let existing = self.store.get_request(request_id).await?;
        let resurrect = matches!(&existing, Some(r) if r.status == RequestStatus::Signing);

        if !resurrect {
            self.egress.ack(receipt_handle).await?;
            report.deleted += 1;
            return Ok(());
        }

        let request = existing.expect("checked above");
        self.store
            .transition_request(request_id, RequestStatus::Signing, RequestStatus::Pending)
            .await?;

        let mut requeued = request;
        requeued.status = RequestStatus::Pending;
        self.ingress.send(requeued).await?;
        self.egress.ack(receipt_handle).await?;
        report.requeued += 1;
        Ok(())
    }

    async fn recover_batch(&self, receipt_handle: &str, signed: &SignedTransaction, report: &mut RecoveryReport) -> anyhow::Result<()> {
        let batch_id = signed.batch_id.clone().expect("checked by caller");

        let mut members = Vec::with_capacity(signed.request_ids.len());
        for request_id in &signed.request_ids {
            if let Some(request) = self.store.get_request(request_id).await? {
                members.push(request);
            }
        }

        let any_non_terminal = members.iter().any(|r| !is_terminal(r.status));
        if members.is_empty() || !any_non_terminal {
            self.egress.ack(receipt_handle).await?;
            report.deleted += 1;
            return Ok(());
        }

        // Best-effort: the batch row may already be long gone if it was
        // never persisted this far, which is fine — member-level reset
        // is what actually matters for recovery.
        let _ = self.store.transition_batch(&batch_id, BatchStatus::Signed, BatchStatus::Cancelled).await;

        for member in members {
            if is_terminal(member.status) {
                continue;
            }
            let previous_status = member.status;
            self.store
                .transition_request(&member.request_id, previous_status, RequestStatus::Pending)
                .await?;

            let mut requeued = member;
            requeued.status = RequestStatus::Pending;
            requeued.batch_id = None;
            requeued.processing_mode = ProcessingMode::SingleOnly;
            self.ingress.send(requeued).await?;
            report.requeued += 1;
        }

        self.egress.ack(receipt_handle).await?;
        Ok(())
    }

    /// For each `(chain context, signer address, chain client)`, advance
    /// the cached nonce slot to the chain's `latest` transaction count
    /// if the chain has moved ahead of it.
    pub async fn reconcile_nonces(&self, nonce_coordinator: &NonceCoordinator, entries: &[(ChainContext, Address, Arc<dyn ChainClient>)]) {
        for (context, address, chain_client) in entries {
            let latest = match chain_client.get_transaction_count(*address, BlockTag::Latest).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, chain = context.chain, network = context.network, "failed to fetch latest nonce during recovery");
                    continue;
                }
            };

            let signer_key = checksum(*address);
            let cached = nonce_coordinator
                .get(&signer_key, context.chain, context.network)
                .await
                .ok()
                .flatten()
                .unwrap_or(0);

            if latest > cached {
                if let Err(e) = nonce_coordinator.set(&signer_key, latest, context.chain, context.network).await {
                    tracing::warn!(error = %e, chain = context.chain, network = context.network, "failed to advance nonce slot during recovery");
                }
            }
        }
    }
}
