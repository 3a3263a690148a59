//! Durable record of withdrawal requests and batches, separate from the
//! queue: the queue drives delivery, the store is the system of record
//! the Signing Worker (§4.5) and DLQ Pipeline (§4.7) read and CAS
//! status transitions against.

use crate::model::{BatchStatus, BatchTransaction, RequestStatus, WithdrawalRequest};
use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn put_request(&self, request: WithdrawalRequest) -> anyhow::Result<()>;
    async fn get_request(&self, request_id: &str) -> anyhow::Result<Option<WithdrawalRequest>>;

    /// Transition a request's status from `expected` to `next`, failing
    /// if the stored status has since moved on — the compare-and-swap
    /// the worker relies on so two racing workers can't both "win" the
    /// same request.
    async fn transition_request(
        &self,
        request_id: &str,
        expected: RequestStatus,
        next: RequestStatus,
    ) -> anyhow::Result<bool>;

    async fn put_batch(&self, batch: BatchTransaction) -> anyhow::Result<()>;
    async fn get_batch(&self, batch_id: &str) -> anyhow::Result<Option<BatchTransaction>>;

    async fn transition_batch(
        &self,
        batch_id: &str,
        expected: BatchStatus,
        next: BatchStatus,
    ) -> anyhow::Result<bool>;
}

/// Test and single-process fake backed by `DashMap`.
#[derive(Default)]
pub struct InMemoryStore {
    requests: DashMap<String, WithdrawalRequest>,
    batches: DashMap<String, BatchTransaction>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn put_request(&self, request: WithdrawalRequest) -> anyhow::Result<()> {
        self.requests.insert(request.request_id.clone(), request);
        Ok(())
    }

    async fn get_request(&self, request_id: &str) -> anyhow::Result<Option<WithdrawalRequest>> {
        Ok(self.requests.get(request_id).map(|r| r.clone()))
    }

    async fn transition_request(
        &self,
        request_id: &str,
        expected: RequestStatus,
        next: RequestStatus,
    ) -> anyhow::Result<bool> {
        let Some(mut entry) = self.requests.get_mut(request_id) else {
            return Ok(false);
        };
        if entry.status != expected {
            return Ok(false);
        }
        entry.status = next;
        entry.updated_at = chrono::Utc::now();
        Ok(true)
    }

    async fn put_batch(&self, batch: BatchTransaction) -> anyhow::Result<()> {
        self.batches.insert(batch.batch_id.clone(), batch);
        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> anyhow::Result<Option<BatchTransaction>> {
        Ok(self.batches.get(batch_id).map(|b| b.clone()))
    }

    async fn transition_batch(
        &self,
        batch_id: &str,
        expected: BatchStatus,
        next: BatchStatus,
    ) -> anyhow::Result<bool> {
        let Some(mut entry) = self.batches.get_mut(batch_id) else {
            return Ok(false);
        };
        if entry.status != expected {
            return Ok(false);
        }
        entry.status = next;
        entry.updated_at = chrono::Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProcessingMode;
    use chrono::Utc;

    fn sample_request(id: &str) -> WithdrawalRequest {
        WithdrawalRequest {
            request_id: id.to_string(),
            chain_id: 1,
            network: "mainnet".to_string(),
            token_address: None,
            recipient: "0x0000000000000000000000000000000000dEaD".to_string(),
            amount: "1000000000000000000".to_string(),
            processing_mode: ProcessingMode::Batchable,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            attempt_count: 0,
            batch_id: None,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn transition_succeeds_when_status_matches() {
        let store = InMemoryStore::new();
        store.put_request(sample_request("r1")).await.unwrap();

        let ok = store
            .transition_request("r1", RequestStatus::Pending, RequestStatus::Signing)
            .await
            .unwrap();
        assert!(ok);

        let fetched = store.get_request("r1").await.unwrap().unwrap();
        assert_eq!(fetched.status, RequestStatus::Signing);
    }

    #[tokio::test]
    async fn transition_fails_when_status_has_moved_on() {
        let store = InMemoryStore::new();
        store.put_request(sample_request("r1")).await.unwrap();
        store
            .transition_request("r1", RequestStatus::Pending, RequestStatus::Signing)
            .await
            .unwrap();

        // A second caller racing against the first, trying to move
        // from the now-stale `Pending` state, must lose.
        let ok = store
            .transition_request("r1", RequestStatus::Pending, RequestStatus::Signed)
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn transition_on_unknown_request_is_false() {
        let store = InMemoryStore::new();
        let ok = store
            .transition_request("missing", RequestStatus::Pending, RequestStatus::Signing)
            .await
            .unwrap();
        assert!(!ok);
    }
}
