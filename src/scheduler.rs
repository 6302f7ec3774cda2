//! Decides, per requested subject, whether to serve a cached briefing, generate a fresh one, or
//! reject the request.
//!
//! Two routes:
//! - **Popular** subjects (in the [`Catalog`]) share one public cache slot per day. The warm
//!   pass fills those slots every morning, so reads are unlimited; a miss means the pass failed
//!   or has not run yet and is generated on demand.
//! - **Custom** subjects are cached per identity and need one. A miss is charged against the
//!   identity's `briefing-generation` budget before anything is generated.
//!
//! Every upstream call goes through one shared [`ConcurrencyGate`] and the retry policy, and
//! the payload is validated before it is cached. Each attempt has a deadline, so a hung
//! provider costs at most `(max_retries + 1) * attempt_timeout` of gate time.

use crate::cache::{CacheKey, ResultCache};
use crate::catalog::Catalog;
use crate::clock::{millis, Clock, SystemClock};
use crate::counters::Counters;
use crate::error::{BriefingError, GenerationError};
use crate::gate::ConcurrencyGate;
use crate::generation::{GenerationBackend, GenerationSettings};
use crate::payload::{BriefingPayload, GenerationOutcome, Source};
use crate::rate_limit::{IdentityKey, PolicyKind, RateLimiter};
use crate::retry::{RetryPolicy, DEFAULT_ATTEMPT_TIMEOUT};
use crate::sleeper::{Sleeper, TokioSleeper};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

mod jobs;
mod warm;

pub use jobs::{default_daily_run_at, DailyWarm, WarmJob, WarmJobError};
pub use warm::{SubjectFailure, WarmStats};

/// Default lifetime of a cached briefing (24 hours).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default number of subjects generated concurrently by the warm pass.
pub const DEFAULT_BATCH_SIZE: usize = 5;
/// Default pause between warm batches.
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_secs(2);
/// Default flat cost of one generation in USD.
pub const DEFAULT_COST_PER_GENERATION: f64 = 0.08;

#[derive(Debug, Clone)]
pub struct BriefingScheduler {
    catalog: Arc<Catalog>,
    cache: ResultCache,
    backend: Arc<dyn GenerationBackend>,
    limiter: Option<Arc<RateLimiter>>,
    gate: ConcurrencyGate,
    retry: RetryPolicy<GenerationError>,
    attempt_timeout: Duration,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    counters: Arc<Counters>,
    cache_ttl: Duration,
    batch_size: usize,
    batch_pause: Duration,
    cost_per_generation: f64,
}

impl BriefingScheduler {
    pub fn builder(backend: Arc<dyn GenerationBackend>) -> SchedulerBuilder {
        SchedulerBuilder::new(backend)
    }

    pub fn is_popular(&self, subject: &str) -> bool {
        self.catalog.is_popular(subject)
    }

    pub fn list_popular(&self) -> &Catalog {
        &self.catalog
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Serve `subject` from cache or generate it.
    ///
    /// Custom subjects require `identity`; without one this returns
    /// [`BriefingError::MissingIdentity`] and neither the limiter nor the backend is called.
    pub async fn resolve(
        &self,
        subject: &str,
        identity: Option<&IdentityKey>,
        settings: Option<&GenerationSettings>,
    ) -> Result<GenerationOutcome, BriefingError> {
        let started = Instant::now();
        let popular = self.catalog.is_popular(subject);
        let key = match (popular, identity) {
            (true, _) => CacheKey::public(subject, self.clock.today()),
            (false, Some(identity)) => CacheKey::for_identity(identity, subject, self.clock.today()),
            (false, None) => {
                warn!(target: "briefgate::scheduler", subject, "custom subject requested without identity");
                return Err(BriefingError::MissingIdentity { subject: subject.to_string() });
            }
        };

        if let Some(payload) = self.cache.get::<BriefingPayload>(&key).await {
            debug!(target: "briefgate::scheduler", subject, key = %key, "served from cache");
            self.counters.record_cache_hit();
            return Ok(GenerationOutcome {
                payload,
                cost_estimate: 0.0,
                duration: started.elapsed(),
                source: Source::Cache,
            });
        }
        self.counters.record_cache_miss();

        match identity {
            _ if popular => {
                warn!(
                    target: "briefgate::scheduler",
                    subject,
                    key = %key,
                    "popular subject missing from cache; generating on demand"
                );
            }
            Some(identity) => {
                if let Some(limiter) = &self.limiter {
                    limiter.admit(identity, PolicyKind::BriefingGeneration).await?;
                }
            }
            None => {}
        }

        let (payload, cost) = self.generate(subject, settings).await?;
        self.cache.set(&key, &payload, self.cache_ttl).await;
        Ok(GenerationOutcome {
            payload,
            cost_estimate: cost,
            duration: started.elapsed(),
            source: Source::Fresh,
        })
    }

    /// Like [`resolve`](Self::resolve), but a failed generation becomes a fallback payload.
    /// Rate limiting and missing identities are still errors.
    pub async fn resolve_or_fallback(
        &self,
        subject: &str,
        identity: Option<&IdentityKey>,
        settings: Option<&GenerationSettings>,
    ) -> Result<GenerationOutcome, BriefingError> {
        let started = Instant::now();
        match self.resolve(subject, identity, settings).await {
            Err(BriefingError::GenerationFailed { subject, cause }) => {
                self.counters.record_fallback();
                warn!(target: "briefgate::scheduler", subject = %subject, cause = %cause, "serving fallback briefing");
                Ok(GenerationOutcome {
                    payload: BriefingPayload::fallback(&subject, &cause, self.clock.now()),
                    cost_estimate: 0.0,
                    duration: started.elapsed(),
                    source: Source::Fallback,
                })
            }
            other => other,
        }
    }

    /// One gated, retried, validated generation. Returns the payload and its cost.
    async fn generate(
        &self,
        subject: &str,
        settings: Option<&GenerationSettings>,
    ) -> Result<(BriefingPayload, f64), BriefingError> {
        let started = Instant::now();
        let limit = self.attempt_timeout;
        let attempt = move || async move {
            let payload = tokio::time::timeout(limit, self.backend.generate(subject, settings))
                .await
                .map_err(|_| GenerationError::Timeout(limit))??;
            payload.validate()?;
            Ok::<_, GenerationError>(payload)
        };

        let result = match self.gate.run(self.retry.execute(attempt)).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(retry_error)) => Err(retry_error.to_string()),
            Err(closed) => Err(closed.to_string()),
        };

        match result {
            Ok(mut payload) => {
                let elapsed = started.elapsed();
                let cost = self.backend.cost_estimate(&payload).unwrap_or(self.cost_per_generation);
                let metadata = &mut payload.metadata;
                metadata.generated_at.get_or_insert_with(|| self.clock.now());
                metadata.subject.get_or_insert_with(|| subject.to_string());
                metadata.duration_ms.get_or_insert(millis(elapsed));

                self.counters.record_generation();
                info!(
                    target: "briefgate::scheduler",
                    subject,
                    duration_ms = millis(elapsed),
                    cost_usd = cost,
                    "briefing generated"
                );
                Ok((payload, cost))
            }
            Err(cause) => {
                self.counters.record_generation_failure();
                error!(target: "briefgate::scheduler", subject, cause = %cause, "briefing generation failed");
                Err(BriefingError::GenerationFailed { subject: subject.to_string(), cause })
            }
        }
    }
}

/// Builder for [`BriefingScheduler`]. Everything but the backend has a default.
#[derive(Debug)]
pub struct SchedulerBuilder {
    backend: Arc<dyn GenerationBackend>,
    catalog: Arc<Catalog>,
    cache: ResultCache,
    limiter: Option<Arc<RateLimiter>>,
    gate: Option<ConcurrencyGate>,
    retry: Option<RetryPolicy<GenerationError>>,
    attempt_timeout: Duration,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    counters: Arc<Counters>,
    cache_ttl: Duration,
    batch_size: usize,
    batch_pause: Duration,
    cost_per_generation: f64,
}

impl SchedulerBuilder {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            catalog: Arc::new(Catalog::popular()),
            cache: ResultCache::disabled(),
            limiter: None,
            gate: None,
            retry: None,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            counters: Arc::new(Counters::new()),
            cache_ttl: DEFAULT_CACHE_TTL,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
            cost_per_generation: DEFAULT_COST_PER_GENERATION,
        }
    }

    pub fn catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn cache(mut self, cache: ResultCache) -> Self {
        self.cache = cache;
        self
    }

    /// Charge custom-subject cache misses against this limiter.
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Share a gate with other schedulers. Defaults to a private gate sized like a batch.
    pub fn gate(mut self, gate: ConcurrencyGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Defaults to two retries from a one second base, skipping invalid payloads, sleeping
    /// through the scheduler's sleeper.
    pub fn retry(mut self, retry: RetryPolicy<GenerationError>) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Deadline for one backend call; an attempt past it fails with
    /// [`GenerationError::Timeout`] and is retried. Zero is raised to one millisecond.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout.max(Duration::from_millis(1));
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

    pub fn counters(mut self, counters: Arc<Counters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Clamped to at least one.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    pub fn cost_per_generation(mut self, cost: f64) -> Self {
        self.cost_per_generation = cost;
        self
    }

    pub fn build(self) -> BriefingScheduler {
        let retry = self.retry.unwrap_or_else(|| {
            RetryPolicy::builder()
                .should_retry(GenerationError::is_retryable)
                .with_shared_sleeper(self.sleeper.clone())
                .build()
        });
        BriefingScheduler {
            gate: self.gate.unwrap_or_else(|| ConcurrencyGate::new(self.batch_size)),
            retry,
            attempt_timeout: self.attempt_timeout,
            catalog: self.catalog,
            cache: self.cache,
            backend: self.backend,
            limiter: self.limiter,
            clock: self.clock,
            sleeper: self.sleeper,
            counters: self.counters,
            cache_ttl: self.cache_ttl,
            batch_size: self.batch_size,
            batch_pause: self.batch_pause,
            cost_per_generation: self.cost_per_generation,
        }
    }
}
