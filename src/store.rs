//! Shared expiring key/value store.
//!
//! [`SharedStore`] is the Redis-shaped seam both the store-backed window counter and the
//! result cache sit on. Every write that creates a key is expected to be followed by (or carry)
//! an explicit TTL; nothing in this crate writes "forever" keys.
//!
//! [`MemoryStore`] is a process-local implementation with the same semantics. It reads time
//! through a [`Clock`], so expiry is deterministic under a [`ManualClock`](crate::ManualClock).

use crate::clock::{self, Clock, SystemClock};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Abstract storage interface shared by rate limiting and result caching.
///
/// Expired keys must be indistinguishable from absent keys for every operation.
#[async_trait]
pub trait SharedStore: Send + Sync + std::fmt::Debug {
    /// Fetch the raw value for `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl`. Overwrites any existing value and TTL.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increment the integer at `key`, creating it at `1` (without TTL) if absent.
    ///
    /// Returns the post-increment value.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Set the TTL of an existing key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining TTL; `None` if the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Remove `key`. Returns `true` if something was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Keys currently stored under `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process [`SharedStore`].
///
/// Per-key operations run under the key's shard lock, so `incr` is atomic with respect to
/// concurrent increments and expiry checks on the same key.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    slots: Arc<DashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { slots: Arc::new(DashMap::new()), clock }
    }

    /// Number of stored keys, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every expired key. Reads never return expired values, so this only reclaims memory.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.slots.len())
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        Ok(self.slots.get(key).filter(|slot| slot.is_live(now)).map(|slot| slot.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = clock::add(self.clock.now(), ttl);
        self.slots.insert(key.to_string(), Slot { value, expires_at: Some(expires_at) });
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = self.clock.now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                let slot = occupied.get_mut();
                let current: i64 = slot.value.parse().map_err(|_| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: format!("'{}' is not an integer", slot.value),
                })?;
                let next = current.saturating_add(1);
                slot.value = next.to_string();
                Ok(next)
            }
            Entry::Occupied(mut expired) => {
                expired.insert(Slot { value: "1".into(), expires_at: None });
                Ok(1)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot { value: "1".into(), expires_at: None });
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        match self.slots.get_mut(key) {
            Some(mut slot) if slot.is_live(now) => {
                slot.expires_at = Some(clock::add(now, ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .and_then(|slot| slot.expires_at)
            .map(|at| clock::until(now, at)))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self.slots.remove(key).is_some_and(|(_, slot)| slot.is_live(now)))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().is_live(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
