//! Intake, batch-ready and dead-letter queues. `Queue<T>` is the single
//! abstraction the core crate programs against; a visibility-timeout
//! receive/ack/nack cycle matches the SQS-like semantics assumed by the
//! Signing Worker (§4.5) and Queue Recovery (§4.8) designs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// A message handed out by [`Queue::receive`]. `receipt_handle` is the
/// opaque token `ack`/`nack` use to resolve it; it is only valid until
/// the message's visibility timeout lapses, at which point a recovery
/// pass (§4.8) may hand the same body out again under a new handle.
#[derive(Debug, Clone)]
pub struct QueueMessage<T> {
    pub receipt_handle: String,
    pub body: T,
}

#[async_trait]
pub trait Queue<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Enqueue a new message.
    async fn send(&self, body: T) -> anyhow::Result<()>;

    /// Receive up to `max_messages`, each becoming invisible to other
    /// receivers for `visibility_timeout`.
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> anyhow::Result<Vec<QueueMessage<T>>>;

    /// Permanently remove a message the caller finished processing.
    async fn ack(&self, receipt_handle: &str) -> anyhow::Result<()>;

    /// Return a message to the queue immediately, making it visible to
    /// other receivers again.
    async fn nack(&self, receipt_handle: &str) -> anyhow::Result<()>;

    /// Push a message's visibility deadline further into the future
    /// without acking or nacking it — the queue transport's
    /// `ExtendVisibility` (§1), for a caller that knows it needs more
    /// than the original visibility timeout to finish processing.
    /// Returns `false` if the handle is unknown or already expired.
    async fn extend_visibility(&self, receipt_handle: &str, extension: Duration) -> anyhow::Result<bool>;

    /// Messages whose visibility timeout has lapsed without an ack —
    /// the input to Queue Recovery (§4.8).
    async fn visible_count(&self) -> anyhow::Result<usize>;
}

struct InFlight<T> {
    body: T,
    deadline: Instant,
}

/// Test and single-process fake, matching the in-memory `Queue<T>` in
/// spirit but backed by a simple `VecDeque` instead of a broker.
pub struct InMemoryQueue<T> {
    inner: Mutex<InMemoryQueueState<T>>,
}

struct InMemoryQueueState<T> {
    ready: VecDeque<T>,
    in_flight: std::collections::HashMap<String, InFlight<T>>,
}

impl<T> InMemoryQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InMemoryQueueState {
                ready: VecDeque::new(),
                in_flight: std::collections::HashMap::new(),
            }),
        }
    }
}

impl<T> Default for InMemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Queue<T> for InMemoryQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn send(&self, body: T) -> anyhow::Result<()> {
        let mut state = self.inner.lock().await;
        state.ready.push_back(body);
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> anyhow::Result<Vec<QueueMessage<T>>> {
        let mut state = self.inner.lock().await;

        // Re-surface anything whose visibility timeout has lapsed
        // before handing out fresh messages, mirroring how a real
        // broker would requeue on expiry.
        let now = Instant::now();
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in expired {
            if let Some(entry) = state.in_flight.remove(&handle) {
                state.ready.push_back(entry.body);
            }
        }

        let mut out = Vec::with_capacity(max_messages.min(state.ready.len()));
        for _ in 0..max_messages {
            let Some(body) = state.ready.pop_front() else {
                break;
            };
            let receipt_handle = Uuid::new_v4().to_string();
            state.in_flight.insert(
                receipt_handle.clone(),
                InFlight {
                    body: body.clone(),
                    deadline: now + visibility_timeout,
                },
            );
            out.push(QueueMessage { receipt_handle, body });
        }
        Ok(out)
    }

    async fn ack(&self, receipt_handle: &str) -> anyhow::Result<()> {
        let mut state = self.inner.lock().await;
        state.in_flight.remove(receipt_handle);
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> anyhow::Result<()> {
        let mut state = self.inner.lock().await;
        if let Some(entry) = state.in_flight.remove(receipt_handle) {
            state.ready.push_back(entry.body);
        }
        Ok(())
    }

    async fn extend_visibility(&self, receipt_handle: &str, extension: Duration) -> anyhow::Result<bool> {
        let mut state = self.inner.lock().await;
        let Some(entry) = state.in_flight.get_mut(receipt_handle) else {
            return Ok(false);
        };
        let now = Instant::now();
        if entry.deadline <= now {
            return Ok(false);
        }
        entry.deadline = now + extension;
        Ok(true)
    }

    async fn visible_count(&self) -> anyhow::Result<usize> {
        let state = self.inner.lock().await;
        Ok(state.ready.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_receive_round_trips_body() {
        let queue: InMemoryQueue<String> = InMemoryQueue::new();
        queue.send("hello".to_string()).await.unwrap();
        let messages = queue.receive(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "hello");
    }

    #[tokio::test]
    async fn ack_removes_message_permanently() {
        let queue: InMemoryQueue<String> = InMemoryQueue::new();
        queue.send("hello".to_string()).await.unwrap();
        let messages = queue.receive(10, Duration::from_secs(30)).await.unwrap();
        queue.ack(&messages[0].receipt_handle).await.unwrap();

        let again = queue.receive(10, Duration::from_secs(30)).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn nack_makes_message_visible_again() {
        let queue: InMemoryQueue<String> = InMemoryQueue::new();
        queue.send("hello".to_string()).await.unwrap();
        let messages = queue.receive(10, Duration::from_secs(30)).await.unwrap();
        queue.nack(&messages[0].receipt_handle).await.unwrap();

        let again = queue.receive(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn extend_visibility_delays_resurfacing() {
        let queue: InMemoryQueue<String> = InMemoryQueue::new();
        queue.send("hello".to_string()).await.unwrap();
        let first = queue.receive(10, Duration::from_millis(20)).await.unwrap();
        assert!(queue
            .extend_visibility(&first[0].receipt_handle, Duration::from_secs(30))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(25)).await;
        let second = queue.receive(10, Duration::from_secs(30)).await.unwrap();
        assert!(second.is_empty(), "extended message resurfaced too early");
    }

    #[tokio::test]
    async fn extend_visibility_on_unknown_handle_returns_false() {
        let queue: InMemoryQueue<String> = InMemoryQueue::new();
        assert!(!queue
            .extend_visibility("no-such-handle", Duration::from_secs(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn expired_visibility_timeout_resurfaces_message() {
        let queue: InMemoryQueue<String> = InMemoryQueue::new();
        queue.send("hello".to_string()).await.unwrap();
        let first = queue.receive(10, Duration::from_millis(1)).await.unwrap();
        assert_eq!(first.len(), 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = queue.receive(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(second.len(), 1);
    }
}
