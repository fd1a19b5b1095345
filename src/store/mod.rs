//! Counter Store
//!
//! Capability interface over a shared external key/value counter store with
//! atomic increment and TTL primitives. Rate windows are the only state kept
//! here; quota counts come from the primary datastore.
//!
//! The store is injected as an `Arc<dyn CounterStore>` constructed once at
//! process start. Callers apply their own fail-open policy when the store is
//! down: the limiter treats any failed command as the liveness signal, while
//! health endpoints use [`CounterStore::ping`] as a standalone probe.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

mod resp;

pub use resp::RespCounterStore;

/// Counter store infrastructure failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Could not reach the store or the connection dropped mid-command.
    #[error("counter store unreachable: {0}")]
    Unreachable(String),

    /// The store replied with something the client could not interpret.
    #[error("counter store protocol error: {0}")]
    Protocol(String),

    /// A command exceeded its socket timeout.
    #[error("counter store command timed out")]
    Timeout,

    /// Reconnection gave up after exhausting its retry budget. The client
    /// stays in this state; it never dials again.
    #[error("counter store gave up after {attempts} connect attempts")]
    Terminal {
        /// How many connect attempts were made before giving up.
        attempts: u32,
    },
}

/// Atomic counter primitives backed by a shared store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, returning the post-increment value.
    /// A missing key is created at 1.
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;

    /// Arm a TTL on `key`. The key expires on its own; nothing deletes it.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Read the raw value of `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remaining TTL in seconds; -1 if the key has no TTL, -2 if missing.
    async fn ttl(&self, key: &str) -> Result<i64, StoreError>;

    /// Standalone liveness probe for health surfaces. The request path does
    /// not call this; a failed command already signals a dead store.
    async fn ping(&self) -> bool;
}

struct MemoryEntry {
    count: u64,
    raw: Option<String>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process counter store with real TTL arithmetic. Used by tests and by
/// single-node deployments that have no external store.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(MemoryEntry {
            count: 0,
            raw: None,
            expires_at: None,
        });
        if entry.expired() {
            entry.count = 0;
            entry.expires_at = None;
        }
        entry.count += 1;
        entry.raw = None;
        Ok(entry.count)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entries.get(key) {
            Some(entry) if !entry.expired() => Ok(Some(
                entry
                    .raw
                    .clone()
                    .unwrap_or_else(|| entry.count.to_string()),
            )),
            _ => Ok(None),
        }
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        match self.entries.get(key) {
            Some(entry) if !entry.expired() => match entry.expires_at {
                Some(at) => Ok(at.saturating_duration_since(Instant::now()).as_secs() as i64),
                None => Ok(-1),
            },
            _ => Ok(-2),
        }
    }

    async fn ping(&self) -> bool {
        true
    }
}
