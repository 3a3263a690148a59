//! DLQ Pipeline (§4.7): per-message retry accounting backed by a
//! [`KVStore`], with an in-memory fallback map when that store is
//! unreachable, gating whether a processing failure is retried in
//! place or routed to the dead-letter queue.

use crate::config::DlqPolicy;
use crate::error::ErrorCategory;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use withdrawal_api::{DlqMessage, ErrorInfo, KVStore, Queue};

const RETRY_COUNTER_TTL: Duration = Duration::from_secs(3_600);

fn retry_key(message_id: &str) -> String {
    format!("retry:{message_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlqOutcome {
    pub dead_lettered: bool,
    pub retry_count: u32,
}

pub struct DlqPipeline {
    retry_store: Arc<dyn KVStore>,
    dlq: Arc<dyn Queue<DlqMessage>>,
    policy: DlqPolicy,
    max_retries: u32,
    // In-process fallback used only when `retry_store` errors, e.g. a
    // Redis outage — matches §4.7's "in-memory fallback map".
    fallback_counts: DashMap<String, u32>,
}

impl DlqPipeline {
    pub fn new(retry_store: Arc<dyn KVStore>, dlq: Arc<dyn Queue<DlqMessage>>, policy: DlqPolicy, max_retries: u32) -> Self {
        Self {
            retry_store,
            dlq,
            policy,
            max_retries,
            fallback_counts: DashMap::new(),
        }
    }

    async fn increment_retry_count(&self, message_id: &str) -> u32 {
        let key = retry_key(message_id);
        match self.retry_store.incr(&key).await {
            Ok(n) => {
                if let Err(e) = self.retry_store.expire(&key, RETRY_COUNTER_TTL).await {
                    tracing::warn!(error = %e, message_id, "failed to refresh retry counter ttl");
                }
                n.max(0) as u32
            }
            Err(e) => {
                tracing::warn!(error = %e, message_id, "retry store unreachable, using in-memory fallback counter");
                let mut entry = self.fallback_counts.entry(message_id.to_string()).or_insert(0);
                *entry += 1;
                *entry
            }
        }
    }

    async fn clear_retry_count(&self, message_id: &str) {
        if let Err(e) = self.retry_store.del(&retry_key(message_id)).await {
            tracing::warn!(error = %e, message_id, "failed to clear retry counter");
        }
        self.fallback_counts.remove(message_id);
    }

    /// Classifies and accounts for one processing failure. Returns
    /// whether the message was dead-lettered (the caller must then
    /// delete the source message) or should instead be left for
    /// visibility-timeout redelivery. Propagates an error only when the
    /// DLQ send itself failed — in that case the caller must *not*
    /// delete the source message (§4.7).
    pub async fn handle_failure(
        &self,
        message_id: &str,
        batch_id: Option<String>,
        category: ErrorCategory,
        error_message: String,
        payload: HashMap<String, String>,
    ) -> anyhow::Result<DlqOutcome> {
        let retries = self.increment_retry_count(message_id).await;
        let exhausted = retries >= self.max_retries;
        let should_dead_letter = matches!(self.policy, DlqPolicy::Always) || category.is_permanent() || exhausted;

        if !should_dead_letter {
            return Ok(DlqOutcome {
                dead_lettered: false,
                retry_count: retries,
            });
        }

        let message = DlqMessage {
            request_id: message_id.to_string(),
            batch_id,
            payload,
            error: ErrorInfo {
                category: format!("{category:?}"),
                message: error_message,
                occurred_at: Utc::now(),
            },
            retry_count: retries,
            dead_lettered_at: Utc::now(),
        };

        self.dlq.send(message).await?;
        self.clear_retry_count(message_id).await;

        Ok(DlqOutcome {
            dead_lettered: true,
            retry_count: retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use withdrawal_api::{InMemoryKvStore, InMemoryQueue};

    fn pipeline(policy: DlqPolicy, max_retries: u32) -> DlqPipeline {
        DlqPipeline::new(Arc::new(InMemoryKvStore::new()), Arc::new(InMemoryQueue::new()), policy, max_retries)
    }

    #[tokio::test]
    async fn permanent_category_dead_letters_on_first_attempt() {
        let pipeline = pipeline(DlqPolicy::OnPermanentOrMaxRetries, 5);
        let outcome = pipeline
            .handle_failure("m1", None, ErrorCategory::InsufficientFunds, "no funds".to_string(), HashMap::new())
            .await
            .unwrap();
        assert!(outcome.dead_lettered);
        assert_eq!(outcome.retry_count, 1);
    }

    #[tokio::test]
    async fn retryable_category_stays_under_max_retries() {
        let pipeline = pipeline(DlqPolicy::OnPermanentOrMaxRetries, 5);
        for _ in 0..4 {
            let outcome = pipeline
                .handle_failure("m1", None, ErrorCategory::Network, "timeout".to_string(), HashMap::new())
                .await
                .unwrap();
            assert!(!outcome.dead_lettered);
        }
        let outcome = pipeline
            .handle_failure("m1", None, ErrorCategory::Network, "timeout".to_string(), HashMap::new())
            .await
            .unwrap();
        assert!(outcome.dead_lettered);
        assert_eq!(outcome.retry_count, 5);
    }

    #[tokio::test]
    async fn always_policy_dead_letters_immediately() {
        let pipeline = pipeline(DlqPolicy::Always, 5);
        let outcome = pipeline
            .handle_failure("m1", None, ErrorCategory::Network, "timeout".to_string(), HashMap::new())
            .await
            .unwrap();
        assert!(outcome.dead_lettered);
    }

    #[tokio::test]
    async fn dead_lettering_clears_the_retry_counter() {
        let pipeline = pipeline(DlqPolicy::Always, 5);
        pipeline
            .handle_failure("m1", None, ErrorCategory::Network, "timeout".to_string(), HashMap::new())
            .await
            .unwrap();

        let outcome = pipeline
            .handle_failure("m1", None, ErrorCategory::Network, "timeout again".to_string(), HashMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.retry_count, 1);
    }
}
