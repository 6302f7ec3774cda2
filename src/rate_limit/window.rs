use crate::clock::{self, Clock, SystemClock};
use crate::error::StoreError;
use crate::rate_limit::Decision;
use crate::store::SharedStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix of every rate-limit key written to the shared store.
pub const STORE_KEY_PREFIX: &str = "rate_limit:";

/// Entries are kept this long past their window before the sweep reclaims them.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5 * 60);

/// The memory counter sweeps idle entries once every this many calls.
pub const DEFAULT_SWEEP_EVERY: u64 = 64;

/// Fixed-window request counter.
///
/// * No entry, or the window elapsed: start a new window with `count = 1`; allowed.
/// * `count < max_count`: increment; allowed.
/// * Otherwise: denied until the window closes.
///
/// Bursts of up to `2 * max_count` can straddle a window boundary; state per key is O(1).
#[async_trait]
pub trait WindowCounter: Send + Sync + std::fmt::Debug {
    async fn increment_and_check(
        &self,
        key: &str,
        max_count: u32,
        window: Duration,
    ) -> Result<Decision, StoreError>;
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    window_start: DateTime<Utc>,
    window: Duration,
}

impl WindowEntry {
    fn fresh(now: DateTime<Utc>, window: Duration) -> Self {
        Self { count: 1, window_start: now, window }
    }

    fn window_end(&self) -> DateTime<Utc> {
        clock::add(self.window_start, self.window)
    }
}

/// Process-local counter.
///
/// Check-and-update for a key runs under that key's shard lock, and so does the sweep's
/// eviction test, so a sweep can never drop an entry another caller is incrementing.
#[derive(Debug, Clone)]
pub struct MemoryWindowCounter {
    entries: Arc<DashMap<String, WindowEntry>>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    sweep_every: u64,
    calls: Arc<AtomicU64>,
}

impl Default for MemoryWindowCounter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryWindowCounter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
            grace: DEFAULT_GRACE,
            sweep_every: DEFAULT_SWEEP_EVERY,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// How long an idle entry survives past its window.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Sweep idle entries once every `calls` lookups (minimum 1).
    pub fn with_sweep_every(mut self, calls: u64) -> Self {
        self.sweep_every = calls.max(1);
        self
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries whose window closed more than `grace` ago. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < clock::add(entry.window_end(), self.grace));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(target: "briefgate::rate_limit", evicted, "swept idle window counters");
        }
        evicted
    }

    fn decide(&self, key: &str, max_count: u32, window: Duration) -> Decision {
        // Sweep before taking the entry guard: `retain` locks every shard.
        if self.calls.fetch_add(1, Ordering::Relaxed) % self.sweep_every == self.sweep_every - 1 {
            self.sweep();
        }

        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry { count: 0, window_start: now, window });

        if entry.count == 0 || now >= entry.window_end() {
            *entry = WindowEntry::fresh(now, window);
            return Decision::Allowed { remaining: max_count.saturating_sub(1) };
        }

        if entry.count < max_count {
            entry.count += 1;
            return Decision::Allowed { remaining: max_count - entry.count };
        }

        Decision::Denied { retry_after: clock::until(now, entry.window_end()) }
    }
}

#[async_trait]
impl WindowCounter for MemoryWindowCounter {
    async fn increment_and_check(
        &self,
        key: &str,
        max_count: u32,
        window: Duration,
    ) -> Result<Decision, StoreError> {
        Ok(self.decide(key, max_count, window))
    }
}

/// Counter kept in the [`SharedStore`], shared by every process using the same store.
///
/// Uses atomic `incr`; the first increment of a window sets the key's TTL to the window, so
/// the store's own expiry starts the next window. A counter found without a TTL (a crash
/// between `incr` and `expire`) gets one on the spot.
#[derive(Debug, Clone)]
pub struct StoreWindowCounter {
    store: Arc<dyn SharedStore>,
}

impl StoreWindowCounter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WindowCounter for StoreWindowCounter {
    async fn increment_and_check(
        &self,
        key: &str,
        max_count: u32,
        window: Duration,
    ) -> Result<Decision, StoreError> {
        let rate_key = format!("{STORE_KEY_PREFIX}{key}");
        let count = self.store.incr(&rate_key).await?;

        let remaining_window = if count == 1 {
            self.store.expire(&rate_key, window).await?;
            window
        } else {
            match self.store.ttl(&rate_key).await? {
                Some(ttl) => ttl,
                None => {
                    warn!(target: "briefgate::rate_limit", key = %rate_key, "rate counter had no TTL; restoring window expiry");
                    self.store.expire(&rate_key, window).await?;
                    window
                }
            }
        };

        if count <= i64::from(max_count) {
            let remaining = u32::try_from(i64::from(max_count) - count).unwrap_or(0);
            Ok(Decision::Allowed { remaining })
        } else {
            Ok(Decision::Denied { retry_after: remaining_window })
        }
    }
}

/// Store-backed counter with a local fallback.
///
/// When a store is configured it decides; if the store errors the local memory counter
/// decides instead, so an outage degrades to per-process limits rather than no limits.
#[derive(Debug, Clone)]
pub struct DualWindowCounter {
    durable: Option<StoreWindowCounter>,
    local: MemoryWindowCounter,
}

impl DualWindowCounter {
    pub fn new(store: Option<Arc<dyn SharedStore>>, local: MemoryWindowCounter) -> Self {
        Self { durable: store.map(StoreWindowCounter::new), local }
    }

    /// Memory-only counter.
    pub fn local(local: MemoryWindowCounter) -> Self {
        Self { durable: None, local }
    }

    pub fn local_counter(&self) -> &MemoryWindowCounter {
        &self.local
    }
}

#[async_trait]
impl WindowCounter for DualWindowCounter {
    async fn increment_and_check(
        &self,
        key: &str,
        max_count: u32,
        window: Duration,
    ) -> Result<Decision, StoreError> {
        if let Some(durable) = &self.durable {
            match durable.increment_and_check(key, max_count, window).await {
                Ok(decision) => return Ok(decision),
                Err(error) => {
                    warn!(target: "briefgate::rate_limit", key, %error, "shared rate counter failed; using local window");
                }
            }
        }
        self.local.increment_and_check(key, max_count, window).await
    }
}
