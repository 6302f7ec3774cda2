//! The assembled subsystem: one limiter, one cache, one gate and one scheduler built from a
//! [`BriefingConfig`] and shared by every caller.

use crate::cache::ResultCache;
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::BriefingConfig;
use crate::counters::{Counters, CountersSnapshot};
use crate::error::{BriefingError, ConfigError, GenerationError, RateLimited};
use crate::gate::ConcurrencyGate;
use crate::generation::{GenerationBackend, GenerationSettings};
use crate::payload::GenerationOutcome;
use crate::rate_limit::{
    Decision, DualWindowCounter, IdentityKey, MemoryWindowCounter, PolicyKind, RateLimiter,
};
use crate::retry::RetryPolicy;
use crate::scheduler::{BriefingScheduler, DailyWarm, WarmJob, WarmStats};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::SharedStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug)]
pub struct BriefingService {
    config: BriefingConfig,
    limiter: Arc<RateLimiter>,
    scheduler: BriefingScheduler,
    counters: Arc<Counters>,
    daily: Mutex<Option<DailyWarm>>,
}

impl BriefingService {
    /// Build the service on the system clock.
    ///
    /// Without a store, rate limits are per process and nothing is cached. When
    /// `scheduler.daily_warm` is set the daily pass is started here, which must then happen
    /// inside a Tokio runtime.
    pub fn init(
        config: BriefingConfig,
        store: Option<Arc<dyn SharedStore>>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Self::builder(config, backend);
        if let Some(store) = store {
            builder = builder.store(store);
        }
        builder.build()
    }

    pub fn builder(config: BriefingConfig, backend: Arc<dyn GenerationBackend>) -> ServiceBuilder {
        ServiceBuilder {
            config,
            backend,
            store: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn config(&self) -> &BriefingConfig {
        &self.config
    }

    /// The shared limiter, e.g. for an [`AdmissionLayer`](crate::rate_limit::AdmissionLayer).
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn scheduler(&self) -> &BriefingScheduler {
        &self.scheduler
    }

    pub async fn admit(&self, identity: &IdentityKey, kind: PolicyKind) -> Result<(), RateLimited> {
        self.limiter.admit(identity, kind).await
    }

    /// Like [`admit`](Self::admit) but returns the remaining budget too.
    pub async fn check(&self, identity: &IdentityKey, kind: PolicyKind) -> Decision {
        self.limiter.check(identity, kind).await
    }

    pub async fn resolve_briefing(
        &self,
        subject: &str,
        identity: Option<&IdentityKey>,
        settings: Option<&GenerationSettings>,
    ) -> Result<GenerationOutcome, BriefingError> {
        self.scheduler.resolve(subject, identity, settings).await
    }

    pub async fn resolve_briefing_or_fallback(
        &self,
        subject: &str,
        identity: Option<&IdentityKey>,
        settings: Option<&GenerationSettings>,
    ) -> Result<GenerationOutcome, BriefingError> {
        self.scheduler.resolve_or_fallback(subject, identity, settings).await
    }

    pub async fn warm_popular_catalog(&self) -> WarmStats {
        self.scheduler.warm_popular_catalog().await
    }

    pub fn spawn_warm(&self) -> WarmJob {
        self.scheduler.spawn_warm()
    }

    /// Start the daily pass at the configured time unless it is already running. Returns a
    /// receiver for its statistics either way.
    pub fn start_daily_warm(&self) -> watch::Receiver<Option<WarmStats>> {
        let mut daily = self.daily.lock().expect("daily warm slot poisoned");
        if let Some(running) = daily.as_ref().filter(|d| !d.is_finished()) {
            return running.subscribe();
        }
        let run_at = self.config.scheduler.daily_run_at;
        info!(target: "briefgate::service", %run_at, "starting daily warm pass");
        let started = self.scheduler.spawn_daily_warm(run_at);
        let updates = started.subscribe();
        *daily = Some(started);
        updates
    }

    /// Statistics of the last daily pass, if one has completed.
    pub fn latest_warm(&self) -> Option<WarmStats> {
        self.daily.lock().expect("daily warm slot poisoned").as_ref().and_then(DailyWarm::latest)
    }

    pub fn is_popular(&self, subject: &str) -> bool {
        self.scheduler.is_popular(subject)
    }

    pub fn list_popular(&self) -> &Catalog {
        self.scheduler.list_popular()
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Delete cached briefings whose key starts with `prefix`.
    pub async fn purge_cache(&self, prefix: &str) -> usize {
        self.scheduler.cache().purge_matching(prefix).await
    }

    /// Stop the daily pass and close the generation gate. Cached briefings are still served;
    /// anything that would need a generation fails.
    pub fn shutdown(&self) {
        if let Some(daily) = self.daily.lock().expect("daily warm slot poisoned").take() {
            daily.cancel();
        }
        self.scheduler.gate().close();
        info!(target: "briefgate::service", "briefing service shut down");
    }
}

/// Builder for [`BriefingService`] with injectable time, for tests and embedding.
#[derive(Debug)]
pub struct ServiceBuilder {
    config: BriefingConfig,
    backend: Arc<dyn GenerationBackend>,
    store: Option<Arc<dyn SharedStore>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl ServiceBuilder {
    pub fn store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> Result<BriefingService, ConfigError> {
        let config = self.config;
        config.validate()?;

        if self.store.is_none() {
            warn!(
                target: "briefgate::service",
                "no shared store configured; rate limits are per process and caching is off"
            );
        }

        let counters = Arc::new(Counters::new());
        let local = MemoryWindowCounter::new(self.clock.clone())
            .with_grace(Duration::from_secs(config.limiter.memory_grace_secs))
            .with_sweep_every(config.limiter.sweep_every);
        let limiter = Arc::new(RateLimiter::with_counters(
            Arc::new(DualWindowCounter::new(self.store.clone(), local)),
            config.limiter.policies,
            counters.clone(),
        ));

        let cache = match (&self.store, config.cache.enabled) {
            (Some(store), true) => ResultCache::new(store.clone()),
            _ => ResultCache::disabled(),
        };

        let retry = RetryPolicy::builder()
            .max_retries(config.retry.max_retries)
            .backoff(config.retry.backoff())
            .with_jitter(config.retry.jitter)
            .should_retry(GenerationError::is_retryable)
            .with_shared_sleeper(self.sleeper.clone())
            .build();

        let mut scheduler = BriefingScheduler::builder(self.backend)
            .catalog(Arc::new(config.catalog.clone().unwrap_or_default()))
            .cache(cache)
            .gate(ConcurrencyGate::new(config.scheduler.concurrency()))
            .retry(retry)
            .attempt_timeout(config.retry.attempt_timeout())
            .clock(self.clock)
            .sleeper(self.sleeper)
            .counters(counters.clone())
            .cache_ttl(config.cache.ttl())
            .batch_size(config.scheduler.batch_size)
            .batch_pause(config.scheduler.batch_pause())
            .cost_per_generation(config.scheduler.cost_per_generation);
        if config.limiter.enabled {
            scheduler = scheduler.limiter(limiter.clone());
        }

        let service = BriefingService {
            limiter,
            scheduler: scheduler.build(),
            counters,
            daily: Mutex::new(None),
            config,
        };
        info!(
            target: "briefgate::service",
            popular = service.list_popular().len(),
            concurrency = service.config.scheduler.concurrency(),
            "briefing service initialised"
        );
        if service.config.scheduler.daily_warm {
            service.start_daily_warm();
        }
        Ok(service)
    }
}
