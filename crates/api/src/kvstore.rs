//! Atomic key/value primitives the Nonce Coordinator (§4.1) and DLQ
//! Pipeline (§4.7) are built on: `INCR`, `SET`, `GET`, `DEL`, `EXISTS`
//! and TTL-bearing writes, matching the Redis command set the design
//! assumes.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;

#[async_trait]
pub trait KVStore: Send + Sync {
    /// Atomically increments the integer at `key` by one, creating it
    /// with an initial value of `1` if absent, and returns the new
    /// value. This is the primitive `NonceCoordinator::get_and_increment`
    /// is built on.
    async fn incr(&self, key: &str) -> anyhow::Result<i64>;

    /// Unconditionally sets `key` to `value`, optionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Refreshes `key`'s TTL without touching its value (Redis `PEXPIRE`).
    /// Callers that need to slide a TTL alongside an atomic `incr` must
    /// use this instead of `set` — `set` would race a concurrent `incr`
    /// and could clobber a value it never saw.
    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Sets `key` to `value` only if it does not already exist
    /// (Redis `SET key value NX`), returning whether the set happened.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<bool>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn del(&self, key: &str) -> anyhow::Result<bool>;

    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
}

/// Redis-backed `KVStore`, one connection manager shared across calls.
pub struct RedisKvStore {
    client: redis::Client,
    manager: tokio::sync::Mutex<Option<redis::aio::ConnectionManager>>,
}

impl RedisKvStore {
    pub fn new(redis_url: impl AsRef<str>) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url.as_ref())?,
            manager: tokio::sync::Mutex::new(None),
        })
    }

    async fn connection(&self) -> anyhow::Result<redis::aio::ConnectionManager> {
        let mut guard = self.manager.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_connection_manager().await?);
        }
        Ok(guard.as_ref().unwrap().clone())
    }
}

#[async_trait]
impl KVStore for RedisKvStore {
    async fn incr(&self, key: &str) -> anyhow::Result<i64> {
        let mut conn = self.connection().await?;
        let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut conn = self.connection().await?;
        match ttl {
            Some(ttl) => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async::<()>(&mut conn)
                    .await?;
            }
            None => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .query_async::<()>(&mut conn)
                    .await?;
            }
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<bool> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.connection().await?;
        let exists: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(exists > 0)
    }
}

struct Entry {
    value: String,
    expires_at: Option<std::time::Instant>,
}

/// In-process fake for tests and single-node deployments that don't
/// want a Redis dependency. TTLs are honored lazily, on read.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        entry
            .expires_at
            .map(|deadline| deadline > std::time::Instant::now())
            .unwrap_or(true)
    }
}

#[async_trait]
impl KVStore for InMemoryKvStore {
    async fn incr(&self, key: &str) -> anyhow::Result<i64> {
        // Single `DashMap::entry` call, so the read-modify-write is
        // atomic under the shard lock — two concurrent `incr`s on the
        // same key can never observe and overwrite the same current
        // value (a plain get-then-insert pair could lose an update).
        let mut parse_err = None;
        let next = match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) if Self::is_live(occupied.get()) => {
                let current: i64 = match occupied.get().value.parse() {
                    Ok(v) => v,
                    Err(e) => {
                        parse_err = Some(e);
                        0
                    }
                };
                let next = current + 1;
                occupied.get_mut().value = next.to_string();
                next
            }
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                occupied.insert(Entry { value: "1".to_string(), expires_at: None });
                1
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry { value: "1".to_string(), expires_at: None });
                1
            }
        };
        if let Some(e) = parse_err {
            anyhow::bail!("stored value for {key} is not an integer: {e}");
        }
        Ok(next)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| std::time::Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(std::time::Instant::now() + ttl);
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<bool> {
        if self.exists(key).await? {
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        Ok(true)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .entries
            .get(key)
            .filter(|entry| Self::is_live(entry))
            .map(|entry| entry.value.clone()))
    }

    async fn del(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.get(key).filter(|entry| Self::is_live(entry)).is_some())
    }
}
