//! Date-scoped result cache over the shared store.
//!
//! Keys are `"<namespace>:<subject>:<YYYY-MM-DD>"`. Two requests for the same subject on the
//! same UTC day always land on the same slot, which is what limits generation to once per
//! subject per day; there is no separate counter.
//!
//! The cache never fails a request. Without a store, or when the store errors, it behaves as
//! an empty cache that drops writes, and logs the error.

use crate::rate_limit::IdentityKey;
use crate::store::SharedStore;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Who a cached result is shared with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Shared by every caller; holds the popular catalog.
    Public,
    /// Private to one identity; holds custom subjects.
    Identity(IdentityKey),
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Public => f.write_str("public"),
            Namespace::Identity(identity) => write!(f, "{identity}"),
        }
    }
}

/// Deterministic cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(namespace: &Namespace, subject: &str, date: NaiveDate) -> Self {
        CacheKey(format!("{namespace}:{subject}:{}", date.format("%Y-%m-%d")))
    }

    pub fn public(subject: &str, date: NaiveDate) -> Self {
        Self::new(&Namespace::Public, subject, date)
    }

    pub fn for_identity(identity: &IdentityKey, subject: &str, date: NaiveDate) -> Self {
        Self::new(&Namespace::Identity(identity.clone()), subject, date)
    }

    /// Prefix matching every key in `namespace`, for [`ResultCache::purge_matching`].
    pub fn namespace_prefix(namespace: &Namespace) -> String {
        format!("{namespace}:")
    }

    /// Prefix matching every public key.
    pub fn public_prefix() -> String {
        Self::namespace_prefix(&Namespace::Public)
    }

    /// Prefix matching every key private to `identity`.
    pub fn user_prefix(identity: &IdentityKey) -> String {
        Self::namespace_prefix(&Namespace::Identity(identity.clone()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// JSON values with per-entry TTL.
#[derive(Debug, Clone)]
pub struct ResultCache {
    store: Option<Arc<dyn SharedStore>>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store: Some(store) }
    }

    /// A cache that stores nothing; every lookup misses.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Cached value, or `None` when absent, expired, unreadable, or the store is down.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let store = self.store.as_ref()?;
        let raw = match store.get(key.as_str()).await {
            Ok(raw) => raw?,
            Err(error) => {
                warn!(target: "briefgate::cache", key = %key, %error, "cache get failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(target: "briefgate::cache", key = %key, %error, "cached value unreadable; treating as miss");
                None
            }
        }
    }

    /// Store `value` for `ttl`. Returns `false` if nothing was written.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(target: "briefgate::cache", key = %key, %error, "value not serialisable; not cached");
                return false;
            }
        };
        match store.set_ex(key.as_str(), raw, ttl).await {
            Ok(()) => {
                debug!(target: "briefgate::cache", key = %key, ttl_secs = ttl.as_secs(), "cached");
                true
            }
            Err(error) => {
                warn!(target: "briefgate::cache", key = %key, %error, "cache set failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &CacheKey) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        match store.delete(key.as_str()).await {
            Ok(removed) => removed,
            Err(error) => {
                warn!(target: "briefgate::cache", key = %key, %error, "cache delete failed");
                false
            }
        }
    }

    /// Delete every key starting with `prefix`. Returns how many were removed.
    pub async fn purge_matching(&self, prefix: &str) -> usize {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        let keys = match store.keys_with_prefix(prefix).await {
            Ok(keys) => keys,
            Err(error) => {
                warn!(target: "briefgate::cache", prefix, %error, "cache purge scan failed");
                return 0;
            }
        };
        let mut removed = 0;
        for key in keys {
            match store.delete(&key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(target: "briefgate::cache", key = %key, %error, "cache purge delete failed");
                }
            }
        }
        debug!(target: "briefgate::cache", prefix, removed, "purged cache entries");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn keys_are_deterministic_and_date_scoped() {
        let a = CacheKey::public("BTS", date(2024, 1, 1));
        let b = CacheKey::public("BTS", date(2024, 1, 1));
        let c = CacheKey::public("BTS", date(2024, 1, 2));
        assert_eq!(a.as_str().as_bytes(), b.as_str().as_bytes());
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "public:BTS:2024-01-01");

        let user = CacheKey::for_identity(&IdentityKey::user("u1"), "Obscure Band", date(2024, 1, 1));
        assert_eq!(user.as_str(), "user:u1:Obscure Band:2024-01-01");
    }

    #[tokio::test]
    async fn set_then_get_until_ttl() {
        let clock = ManualClock::at_date(2024, 1, 1).unwrap();
        let cache = ResultCache::new(Arc::new(MemoryStore::with_clock(Arc::new(clock.clone()))));
        let key = CacheKey::public("BTS", clock.today());

        assert!(cache.set(&key, &vec!["a", "b"], Duration::from_secs(60)).await);
        assert_eq!(cache.get::<Vec<String>>(&key).await, Some(vec!["a".into(), "b".into()]));

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.get::<Vec<String>>(&key).await, None);
    }

    #[tokio::test]
    async fn purge_removes_only_matching_prefix() {
        let cache = ResultCache::new(Arc::new(MemoryStore::new()));
        let day = date(2024, 1, 1);
        let ttl = Duration::from_secs(60);
        cache.set(&CacheKey::public("BTS", day), &1, ttl).await;
        cache.set(&CacheKey::public("TWICE", day), &2, ttl).await;
        let private = CacheKey::for_identity(&IdentityKey::user("u1"), "BTS", day);
        cache.set(&private, &3, ttl).await;

        assert_eq!(cache.purge_matching(&CacheKey::public_prefix()).await, 2);
        assert_eq!(CacheKey::user_prefix(&IdentityKey::user("u1")), "user:u1:");
        assert_eq!(cache.get::<i32>(&private).await, Some(3));
        assert!(cache.delete(&private).await);
        assert!(!cache.delete(&private).await);
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = ResultCache::disabled();
        let key = CacheKey::public("BTS", date(2024, 1, 1));
        assert!(!cache.set(&key, &1, Duration::from_secs(60)).await);
        assert_eq!(cache.get::<i32>(&key).await, None);
        assert_eq!(cache.purge_matching("public:").await, 0);
    }

    #[derive(Debug)]
    struct DownStore;

    #[async_trait]
    impl SharedStore for DownStore {
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set_ex(&self, _: &str, _: String, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn incr(&self, _: &str) -> Result<i64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn expire(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn ttl(&self, _: &str) -> Result<Option<Duration>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn keys_with_prefix(&self, _: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn unavailable_store_degrades_to_no_cache() {
        let cache = ResultCache::new(Arc::new(DownStore));
        let key = CacheKey::public("BTS", date(2024, 1, 1));
        assert!(!cache.set(&key, &1, Duration::from_secs(60)).await);
        assert_eq!(cache.get::<i32>(&key).await, None);
        assert!(!cache.delete(&key).await);
    }

    #[tokio::test]
    async fn unreadable_values_are_misses() {
        let store = Arc::new(MemoryStore::new());
        let key = CacheKey::public("BTS", date(2024, 1, 1));
        store.set_ex(key.as_str(), "{not json".into(), Duration::from_secs(60)).await.unwrap();
        let cache = ResultCache::new(store);
        assert_eq!(cache.get::<i32>(&key).await, None);
    }
}
