//! Minimal counters for admission and generation.
//!
//! Plain relaxed atomics; exporters read them through [`Counters::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared by the limiter and the scheduler.
#[derive(Debug, Default)]
pub struct Counters {
    admitted: AtomicU64,
    denied: AtomicU64,
    fail_open: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    generations: AtomicU64,
    generation_failures: AtomicU64,
    fallbacks: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub admitted: u64,
    pub denied: u64,
    /// Requests admitted because the limiter itself failed.
    pub fail_open: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Successful upstream generations.
    pub generations: u64,
    pub generation_failures: u64,
    /// Fallback payloads served in place of a failed generation.
    pub fallbacks: u64,
}

macro_rules! bump {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    bump! {
        record_admitted => admitted,
        record_denied => denied,
        record_fail_open => fail_open,
        record_cache_hit => cache_hits,
        record_cache_miss => cache_misses,
        record_generation => generations,
        record_generation_failure => generation_failures,
        record_fallback => fallbacks,
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            fail_open: self.fail_open.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            generations: self.generations.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}
