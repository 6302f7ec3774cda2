#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # briefgate
//!
//! Request admission and result caching for an AI-briefing backend.
//!
//! Generating a briefing is slow and billed per call, so every request goes through three
//! checks before anything reaches the provider:
//!
//! - **Rate limiting**: fixed-window budgets per identity and named policy, counted in a
//!   shared store with an in-memory fallback. Infrastructure errors admit the request.
//! - **Caching**: one result per subject per UTC day. Popular subjects share a public slot that
//!   a daily warm pass fills in batches; custom subjects are cached per identity.
//! - **Bounded generation**: one concurrency gate shared by interactive and bulk work, with
//!   exponential-backoff retries and a fallback payload when everything fails.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use briefgate::{
//!     BriefingConfig, BriefingPayload, BriefingService, GenerationBackend, GenerationError,
//!     GenerationSettings, IdentityKey, MemoryStore, Source,
//! };
//!
//! #[derive(Debug)]
//! struct Echo;
//!
//! #[async_trait]
//! impl GenerationBackend for Echo {
//!     async fn generate(
//!         &self,
//!         subject: &str,
//!         _settings: Option<&GenerationSettings>,
//!     ) -> Result<BriefingPayload, GenerationError> {
//!         Ok(BriefingPayload::new(format!("Today in {subject}"), "echo"))
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let service = BriefingService::init(
//!     BriefingConfig::default(),
//!     Some(Arc::new(MemoryStore::new())),
//!     Arc::new(Echo),
//! )
//! .unwrap();
//!
//! let fresh = service.resolve_briefing("BTS", None, None).await.unwrap();
//! assert_eq!(fresh.source, Source::Fresh);
//! let cached = service.resolve_briefing("BTS", None, None).await.unwrap();
//! assert_eq!(cached.source, Source::Cache);
//!
//! let user = IdentityKey::user("u1");
//! let custom = service.resolve_briefing("Obscure Band", Some(&user), None).await.unwrap();
//! assert_eq!(custom.source, Source::Fresh);
//! # });
//! ```

pub mod backoff;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod counters;
pub mod error;
pub mod gate;
pub mod generation;
#[cfg(feature = "subscriber")]
pub mod logging;
pub mod payload;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod sleeper;
pub mod store;

pub use backoff::{Backoff, Jitter};
pub use cache::{CacheKey, Namespace, ResultCache};
pub use catalog::{Catalog, Category};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BriefingConfig, CacheConfig, LimiterConfig, RetryConfig, SchedulerConfig};
pub use counters::{Counters, CountersSnapshot};
pub use error::{BriefingError, ConfigError, GenerationError, RateLimited, RetryError, StoreError};
pub use gate::{ConcurrencyGate, GateClosed, GatePermit};
pub use generation::{GenerationBackend, GenerationSettings};
pub use payload::{BriefingPayload, GenerationOutcome, Metadata, Source, Topic, TopicCategory};
pub use rate_limit::{
    AdmissionError, AdmissionLayer, Decision, DualWindowCounter, IdentityKey, Identify,
    MemoryWindowCounter, PolicyKind, PolicyTable, RateLimiter, StoreWindowCounter, WindowCounter,
};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use scheduler::{
    default_daily_run_at, BriefingScheduler, DailyWarm, SchedulerBuilder, SubjectFailure,
    WarmJob, WarmJobError, WarmStats,
};
pub use service::{BriefingService, ServiceBuilder};
pub use sleeper::{ClockSleeper, InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{MemoryStore, SharedStore};
