//! Service configuration.
//!
//! Every field has a default, so `{}` is a complete configuration matching the production
//! settings: 5 generations per hour per identity, 24 hour cache, batches of 5 with a 2 second
//! pause, two retries from a one second base, and a daily warm pass at 06:00 UTC.
//!
//! ```rust
//! use briefgate::BriefingConfig;
//!
//! let config = BriefingConfig::from_json_str(r#"{
//!     "limiter": { "policies": { "auth": { "max_requests": 20, "window_secs": 900 } } },
//!     "scheduler": { "batch_size": 10 }
//! }"#).unwrap();
//! assert_eq!(config.scheduler.batch_size, 10);
//! assert_eq!(config.limiter.policies.auth.max_requests, 20);
//! assert_eq!(config.limiter.policies.general_api.max_requests, 100);
//! ```

use crate::backoff::{Backoff, Jitter};
use crate::catalog::Catalog;
use crate::error::ConfigError;
use crate::rate_limit::window::{DEFAULT_GRACE, DEFAULT_SWEEP_EVERY};
use crate::rate_limit::PolicyTable;
use crate::clock::millis;
use crate::retry::{DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};
use crate::scheduler::{
    default_daily_run_at, DEFAULT_BATCH_PAUSE, DEFAULT_BATCH_SIZE, DEFAULT_CACHE_TTL,
    DEFAULT_COST_PER_GENERATION,
};
use chrono::NaiveTime;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BriefingConfig {
    pub limiter: LimiterConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    /// Replaces the built-in popular catalog when present.
    pub catalog: Option<Catalog>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// When false, the scheduler never charges custom-subject misses.
    pub enabled: bool,
    pub policies: PolicyTable,
    /// How long idle in-memory windows are kept past their end.
    pub memory_grace_secs: u64,
    /// In-memory sweep frequency, in limiter calls.
    pub sweep_every: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policies: PolicyTable::default(),
            memory_grace_secs: DEFAULT_GRACE.as_secs(),
            sweep_every: DEFAULT_SWEEP_EVERY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, nothing is cached even if a store is supplied.
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true, ttl_secs: DEFAULT_CACHE_TTL.as_secs() }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    /// Capacity of the generation gate; defaults to `batch_size` and may not be smaller.
    pub concurrency: Option<usize>,
    pub batch_pause_ms: u64,
    /// Flat cost in USD used when the backend gives no estimate.
    pub cost_per_generation: f64,
    /// Start the daily warm pass on init.
    pub daily_warm: bool,
    /// Time of day (UTC) for the daily warm pass, `"HH:MM:SS"`.
    pub daily_run_at: NaiveTime,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: None,
            batch_pause_ms: millis(DEFAULT_BATCH_PAUSE),
            cost_per_generation: DEFAULT_COST_PER_GENERATION,
            daily_warm: false,
            daily_run_at: default_daily_run_at(),
        }
    }
}

impl SchedulerConfig {
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(self.batch_size)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: Option<u64>,
    pub jitter: Jitter,
    /// Deadline for a single generation attempt; an attempt past it counts as a retryable
    /// timeout.
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: millis(DEFAULT_BASE_DELAY),
            attempt_timeout_ms: millis(DEFAULT_ATTEMPT_TIMEOUT),
            max_delay_ms: None,
            jitter: Jitter::None,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        let backoff = Backoff::exponential(Duration::from_millis(self.base_delay_ms));
        match self.max_delay_ms {
            Some(max) => backoff.with_max(Duration::from_millis(max)),
            None => backoff,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl BriefingConfig {
    /// Parse and validate.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limiter.policies.validate()?;
        if self.cache.ttl_secs == 0 {
            return Err(invalid("cache.ttl_secs", "must be at least one second"));
        }
        if self.scheduler.batch_size == 0 {
            return Err(invalid("scheduler.batch_size", "must be at least 1"));
        }
        if self.scheduler.concurrency() < self.scheduler.batch_size {
            return Err(invalid("scheduler.concurrency", "must not be below scheduler.batch_size"));
        }
        if !self.scheduler.cost_per_generation.is_finite() || self.scheduler.cost_per_generation < 0.0
        {
            return Err(invalid("scheduler.cost_per_generation", "must be a non-negative number"));
        }
        if let Some(max) = self.retry.max_delay_ms {
            if max < self.retry.base_delay_ms {
                return Err(invalid("retry.max_delay_ms", "must not be below retry.base_delay_ms"));
            }
        }
        if self.retry.attempt_timeout_ms == 0 {
            return Err(invalid("retry.attempt_timeout_ms", "must be at least one millisecond"));
        }
        if self.catalog.as_ref().is_some_and(Catalog::is_empty) {
            return Err(invalid("catalog", "must list at least one subject"));
        }
        Ok(())
    }

    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.limiter.policies = policies;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.scheduler.batch_size = size;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.scheduler.batch_pause_ms = millis(pause);
        self
    }

    pub fn with_concurrency(mut self, capacity: usize) -> Self {
        self.scheduler.concurrency = Some(capacity);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.retry.attempt_timeout_ms = millis(timeout);
        self
    }

    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.retry.max_retries = retries;
        self
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_daily_warm(mut self, run_at: NaiveTime) -> Self {
        self.scheduler.daily_warm = true;
        self.scheduler.daily_run_at = run_at;
        self
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.to_string() }
}
