//! Drain counters: how many items each pipe has delivered.
//!
//! Counters live behind [`CounterStore`] so handlers never see the backend.
//! Increments must be atomic in the backend itself; concurrent deliveries
//! for the same pipe are never read-modify-write in this process.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("counter overflow for '{0}'")]
    Overflow(String),
}

/// Atomic additive counters keyed by pipe identifier.
pub trait CounterStore: Send + Sync {
    /// Add `delta` to `key`, creating it at zero first. Returns the new total.
    fn increment<'a>(&'a self, key: &'a str, delta: u64) -> BoxFuture<'a, Result<u64, StoreError>>;

    /// Current total, `None` if never incremented.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<u64>, StoreError>>;
}

/// `INCRBY`/`GET` against Redis. The connection manager reconnects on its
/// own and is cheap to clone per call.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

impl CounterStore for RedisCounterStore {
    fn increment<'a>(&'a self, key: &'a str, delta: u64) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let total: u64 = conn.incr(key, delta).await?;
            Ok(total)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<u64>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let total: Option<u64> = conn.get(key).await?;
            Ok(total)
        })
    }
}

/// Process-local counters. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCounterStore {
    counts: Mutex<HashMap<String, u64>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment<'a>(&'a self, key: &'a str, delta: u64) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let mut counts = match self.counts.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let slot = counts.entry(key.to_string()).or_insert(0);
            *slot = slot
                .checked_add(delta)
                .ok_or_else(|| StoreError::Overflow(key.to_string()))?;
            Ok(*slot)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<u64>, StoreError>> {
        Box::pin(async move {
            let counts = match self.counts.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Ok(counts.get(key).copied())
        })
    }
}

/// Number of items in a delivered batch: the array length, or `None` for
/// anything that is not an array.
pub fn batch_len(body: &[u8]) -> Option<u64> {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Array(items)) => Some(items.len() as u64),
        _ => None,
    }
}
