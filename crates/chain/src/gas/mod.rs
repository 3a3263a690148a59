//! Process-local, single-slot gas price cache (§4.2). Each chain's
//! signer owns its own instance — never shared across chains.

use parking_lot::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct GasPriceSample {
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
    timestamp: Instant,
}

pub struct GasPriceCache {
    ttl: Duration,
    slot: RwLock<Option<GasPriceSample>>,
}

impl GasPriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Returns the cached fees if they are still within TTL, else `None`
    /// (and implicitly evicts the stale entry).
    pub fn get(&self) -> Option<(u128, u128)> {
        let mut slot = self.slot.write();
        match *slot {
            Some(sample) if sample.timestamp.elapsed() <= self.ttl => {
                Some((sample.max_fee_per_gas, sample.max_priority_fee_per_gas))
            }
            Some(_) => {
                *slot = None;
                None
            }
            None => None,
        }
    }

    pub fn set(&self, max_fee_per_gas: u128, max_priority_fee_per_gas: u128) {
        *self.slot.write() = Some(GasPriceSample {
            max_fee_per_gas,
            max_priority_fee_per_gas,
            timestamp: Instant::now(),
        });
    }

    pub fn is_expired(&self) -> bool {
        self.get().is_none()
    }
}

impl Default for GasPriceCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_none_before_first_set() {
        let cache = GasPriceCache::new(Duration::from_secs(30));
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn returns_value_within_ttl() {
        let cache = GasPriceCache::new(Duration::from_secs(30));
        cache.set(100, 2);
        assert_eq!(cache.get(), Some((100, 2)));
    }

    #[test]
    fn evicts_after_ttl_elapses() {
        let cache = GasPriceCache::new(Duration::from_millis(1));
        cache.set(100, 2);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(), None);
        assert!(cache.is_expired());
    }
}
