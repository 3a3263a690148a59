//! Nonce Coordinator (§4.1): durable, atomic, per-`(signer, chain,
//! network)` monotonic nonce issuance over a [`KVStore`].

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use withdrawal_api::KVStore;

const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(86_400);
const USED_NONCE_TTL: Duration = Duration::from_secs(300);

fn nonce_key(chain: &str, network: &str, signer: &str) -> String {
    format!("nonce:{chain}:{network}:{}", signer.to_lowercase())
}

fn used_nonce_key(chain: &str, network: &str, signer: &str, n: u64) -> String {
    format!("used_nonce:{chain}:{network}:{}:{n}", signer.to_lowercase())
}

pub struct NonceCoordinator {
    store: Arc<dyn KVStore>,
    // §6 `nonceTtlSeconds`, defaulting to 24h per §3's `NonceSlot`.
    nonce_ttl: Duration,
    // Per-signer FIFO reuse pool of nonces returned after a failed
    // signing attempt. In-process only: the nonce store is never shared
    // across two concurrently-signing processes (see §5 ownership rule),
    // so losing the pool on restart just means a gap, which the spec
    // accepts as possible.
    reuse_pools: DashMap<String, Mutex<VecDeque<u64>>>,
}

impl NonceCoordinator {
    pub fn new(store: Arc<dyn KVStore>) -> Self {
        Self::with_ttl(store, DEFAULT_NONCE_TTL)
    }

    pub fn with_ttl(store: Arc<dyn KVStore>, nonce_ttl: Duration) -> Self {
        Self {
            store,
            nonce_ttl,
            reuse_pools: DashMap::new(),
        }
    }

    /// Sets the slot to `max(existing_or_0, network_nonce)` and refreshes
    /// the TTL.
    pub async fn initialize(
        &self,
        signer: &str,
        network_nonce: u64,
        chain: &str,
        network: &str,
    ) -> anyhow::Result<()> {
        let key = nonce_key(chain, network, signer);
        let existing = self
            .store
            .get(&key)
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let next = existing.max(network_nonce);
        self.store.set(&key, &next.to_string(), Some(self.nonce_ttl)).await?;
        Ok(())
    }

    /// Atomic increment; returns the pre-increment value. Drains the
    /// reuse pool first — a returned nonce is reissued before the
    /// counter advances again, which avoids leaving permanent gaps for
    /// nonces that were allocated but never broadcast.
    pub async fn get_and_increment(&self, signer: &str, chain: &str, network: &str) -> anyhow::Result<u64> {
        if let Some(reused) = self.pop_reuse(signer, chain, network) {
            return Ok(reused);
        }

        let key = nonce_key(chain, network, signer);
        let next = self
            .store
            .incr(&key)
            .await
            .map_err(|e| anyhow::anyhow!("nonce store unavailable: {e}"))?;
        // Refresh TTL only, never the value: a blind `set` here would
        // race a concurrent `incr` on the same key and could clobber a
        // value this call never saw (two messages for the same signer
        // signed concurrently, per §5, both call get_and_increment).
        self.store.expire(&key, self.nonce_ttl).await?;
        Ok((next - 1) as u64)
    }

    /// Overwrite with TTL refresh, used for reconciliation when
    /// `network_nonce > cached`.
    pub async fn set(&self, signer: &str, n: u64, chain: &str, network: &str) -> anyhow::Result<()> {
        let key = nonce_key(chain, network, signer);
        self.store.set(&key, &n.to_string(), Some(self.nonce_ttl)).await
    }

    pub async fn get(&self, signer: &str, chain: &str, network: &str) -> anyhow::Result<Option<u64>> {
        let key = nonce_key(chain, network, signer);
        Ok(self.store.get(&key).await?.and_then(|v| v.parse().ok()))
    }

    pub async fn clear(&self, signer: &str, chain: &str, network: &str) -> anyhow::Result<()> {
        let key = nonce_key(chain, network, signer);
        self.store.del(&key).await?;
        Ok(())
    }

    /// Checks a 5-minute used-nonce marker; on miss, sets the marker and
    /// returns `false`.
    pub async fn is_nonce_duplicate(&self, signer: &str, chain: &str, network: &str, n: u64) -> anyhow::Result<bool> {
        let key = used_nonce_key(chain, network, signer, n);
        let set = self.store.set_nx(&key, "1", Some(USED_NONCE_TTL)).await?;
        Ok(!set)
    }

    /// Pushes `n` onto the per-signer FIFO reuse pool after a signing
    /// failure that followed nonce allocation.
    pub fn return_nonce(&self, signer: &str, chain: &str, network: &str, n: u64) {
        let key = format!("{chain}:{network}:{}", signer.to_lowercase());
        self.reuse_pools
            .entry(key)
            .or_insert_with(|| Mutex::new(VecDeque::new()))
            .lock()
            .push_back(n);
    }

    fn pop_reuse(&self, signer: &str, chain: &str, network: &str) -> Option<u64> {
        let key = format!("{chain}:{network}:{}", signer.to_lowercase());
        self.reuse_pools.get(&key)?.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use withdrawal_api::InMemoryKvStore;

    fn coordinator() -> NonceCoordinator {
        NonceCoordinator::new(Arc::new(InMemoryKvStore::new()))
    }

    #[tokio::test]
    async fn initialize_then_increment_yields_network_nonce_first() {
        let coord = coordinator();
        coord.initialize("0xabc", 10, "ethereum", "mainnet").await.unwrap();
        let n = coord.get_and_increment("0xabc", "ethereum", "mainnet").await.unwrap();
        assert_eq!(n, 10);
        let n2 = coord.get_and_increment("0xabc", "ethereum", "mainnet").await.unwrap();
        assert_eq!(n2, 11);
    }

    #[tokio::test]
    async fn issued_nonces_are_strictly_increasing() {
        let coord = coordinator();
        coord.initialize("0xabc", 0, "ethereum", "mainnet").await.unwrap();
        let mut prev = None;
        for _ in 0..5 {
            let n = coord.get_and_increment("0xabc", "ethereum", "mainnet").await.unwrap();
            if let Some(p) = prev {
                assert!(n > p);
            }
            prev = Some(n);
        }
    }

    #[tokio::test]
    async fn returned_nonce_is_reissued_before_the_counter_advances() {
        let coord = coordinator();
        coord.initialize("0xabc", 0, "ethereum", "mainnet").await.unwrap();
        let first = coord.get_and_increment("0xabc", "ethereum", "mainnet").await.unwrap();
        coord.return_nonce("0xabc", "ethereum", "mainnet", first);

        let reissued = coord.get_and_increment("0xabc", "ethereum", "mainnet").await.unwrap();
        assert_eq!(reissued, first);

        let next = coord.get_and_increment("0xabc", "ethereum", "mainnet").await.unwrap();
        assert_eq!(next, first + 1);
    }

    #[tokio::test]
    async fn is_nonce_duplicate_flags_second_use() {
        let coord = coordinator();
        assert!(!coord.is_nonce_duplicate("0xabc", "ethereum", "mainnet", 5).await.unwrap());
        assert!(coord.is_nonce_duplicate("0xabc", "ethereum", "mainnet", 5).await.unwrap());
    }

    #[tokio::test]
    async fn set_overwrites_the_slot() {
        let coord = coordinator();
        coord.initialize("0xabc", 0, "ethereum", "mainnet").await.unwrap();
        coord.set("0xabc", 42, "ethereum", "mainnet").await.unwrap();
        assert_eq!(coord.get("0xabc", "ethereum", "mainnet").await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn clear_removes_the_slot() {
        let coord = coordinator();
        coord.initialize("0xabc", 5, "ethereum", "mainnet").await.unwrap();
        coord.clear("0xabc", "ethereum", "mainnet").await.unwrap();
        assert_eq!(coord.get("0xabc", "ethereum", "mainnet").await.unwrap(), None);
    }

    #[tokio::test]
    async fn with_ttl_overrides_the_default_nonce_ttl() {
        let coord = NonceCoordinator::with_ttl(Arc::new(InMemoryKvStore::new()), Duration::from_secs(60));
        coord.initialize("0xabc", 3, "ethereum", "mainnet").await.unwrap();
        assert_eq!(coord.get("0xabc", "ethereum", "mainnet").await.unwrap(), Some(3));
    }
}
