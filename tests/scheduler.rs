mod common;

use briefgate::{
    BriefingConfig, BriefingService, CacheKey, IdentityKey, InstantSleeper, ManualClock,
    MemoryStore, SharedStore, Source, TrackingSleeper,
};
use chrono::NaiveDate;
use common::{CountingBackend, DownStore, HungBackend, LogCapture};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    service: BriefingService,
    backend: Arc<CountingBackend>,
    store: Arc<MemoryStore>,
    clock: ManualClock,
}

fn fixture_with(config: BriefingConfig, backend: CountingBackend) -> Fixture {
    let clock = ManualClock::at_date(2024, 1, 1).unwrap();
    let backend = Arc::new(backend);
    let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
    let service = BriefingService::builder(config, backend.clone())
        .store(store.clone())
        .clock(Arc::new(clock.clone()))
        .sleeper(Arc::new(InstantSleeper))
        .build()
        .unwrap();
    Fixture { service, backend, store, clock }
}

fn fixture() -> Fixture {
    fixture_with(BriefingConfig::default(), CountingBackend::new())
}

fn new_year() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

#[tokio::test]
async fn popular_subject_generates_once_then_hits_cache() {
    let f = fixture();

    let first = f.service.resolve_briefing("BTS", None, None).await.unwrap();
    assert_eq!(first.source, Source::Fresh);
    assert!(first.cost_estimate > 0.0);

    let second = f.service.resolve_briefing("BTS", None, None).await.unwrap();
    assert_eq!(second.source, Source::Cache);
    assert_eq!(second.cost_estimate, 0.0);
    assert_eq!(f.backend.calls(), 1);

    let key = CacheKey::public("BTS", new_year());
    assert_eq!(key.as_str(), "public:BTS:2024-01-01");
    assert!(f.store.get(key.as_str()).await.unwrap().is_some());
    assert_eq!(f.store.ttl(key.as_str()).await.unwrap(), Some(Duration::from_secs(86_400)));
}

#[tokio::test]
async fn cached_briefing_expires_with_the_day() {
    let f = fixture();
    f.service.resolve_briefing("Naruto", None, None).await.unwrap();
    f.clock.advance(Duration::from_secs(86_400));
    let next = f.service.resolve_briefing("Naruto", None, None).await.unwrap();
    assert_eq!(next.source, Source::Fresh);
    assert_eq!(f.backend.calls(), 2);
}

#[tokio::test]
async fn custom_subject_requires_identity() {
    let f = fixture();
    let err = f.service.resolve_briefing("UnknownStan123", None, None).await.unwrap_err();
    assert!(err.is_missing_identity());
    assert_eq!(f.backend.calls(), 0);
    assert_eq!(f.service.counters().admitted, 0);
    assert_eq!(f.service.counters().denied, 0);
}

#[tokio::test]
async fn custom_subjects_spend_generation_budget() {
    let f = fixture();
    let u1 = IdentityKey::user("u1");
    for i in 0..5 {
        let outcome = f.service.resolve_briefing(&format!("Indie {i}"), Some(&u1), None).await;
        assert_eq!(outcome.unwrap().source, Source::Fresh);
    }
    let denied = f.service.resolve_briefing("Indie 5", Some(&u1), None).await.unwrap_err();
    assert!(denied.is_rate_limited());
    assert!(denied.retry_after().unwrap() <= Duration::from_secs(3600));

    // Cached custom results and popular subjects are still served.
    let cached = f.service.resolve_briefing("Indie 0", Some(&u1), None).await.unwrap();
    assert_eq!(cached.source, Source::Cache);
    assert!(f.service.resolve_briefing("BTS", Some(&u1), None).await.is_ok());

    let key = CacheKey::for_identity(&u1, "Indie 0", new_year());
    assert_eq!(key.as_str(), "user:u1:Indie 0:2024-01-01");
    assert!(f.store.get(key.as_str()).await.unwrap().is_some());
}

#[tokio::test]
async fn failed_generation_serves_fallback_without_caching() {
    let backend = CountingBackend::new();
    backend.fail_for("TWICE");
    let f = fixture_with(BriefingConfig::default(), backend);

    let err = f.service.resolve_briefing("TWICE", None, None).await.unwrap_err();
    assert!(err.is_generation_failed());

    let outcome = f.service.resolve_briefing_or_fallback("TWICE", None, None).await.unwrap();
    assert_eq!(outcome.source, Source::Fallback);
    assert!(outcome.payload.content.contains("TWICE"));
    assert_eq!(outcome.payload.generated_by, "Fallback Handler");
    assert!(f.store.get(CacheKey::public("TWICE", new_year()).as_str()).await.unwrap().is_none());
    // Initial call plus two retries, twice.
    assert_eq!(f.backend.calls(), 6);
    assert_eq!(f.service.counters().fallbacks, 1);
}

#[tokio::test]
async fn retries_back_off_one_then_two_seconds() {
    let backend = Arc::new(CountingBackend::new());
    backend.fail_for("BTS");
    let sleeper = TrackingSleeper::new();
    let service = BriefingService::builder(BriefingConfig::default(), backend.clone())
        .sleeper(Arc::new(sleeper.clone()))
        .build()
        .unwrap();

    assert!(service.resolve_briefing("BTS", None, None).await.is_err());
    assert_eq!(sleeper.calls(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn store_outage_degrades_to_uncached_local_limits() {
    let backend = Arc::new(CountingBackend::new());
    let service = BriefingService::builder(BriefingConfig::default(), backend.clone())
        .store(Arc::new(DownStore))
        .sleeper(Arc::new(InstantSleeper))
        .build()
        .unwrap();

    for _ in 0..2 {
        let outcome = service.resolve_briefing("BTS", None, None).await.unwrap();
        assert_eq!(outcome.source, Source::Fresh);
    }
    assert_eq!(backend.calls(), 2);

    let u1 = IdentityKey::user("u1");
    for _ in 0..5 {
        service.resolve_briefing("Indie", Some(&u1), None).await.unwrap();
    }
    assert!(service.resolve_briefing("Indie", Some(&u1), None).await.unwrap_err().is_rate_limited());
    assert_eq!(service.counters().fail_open, 0);
}

#[tokio::test]
async fn popular_cache_miss_is_logged() {
    let capture = LogCapture::default();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let f = fixture();
    f.service.resolve_briefing("Minecraft", None, None).await.unwrap();

    let logs = capture.contents();
    assert!(logs.contains("WARN"));
    assert!(logs.contains("briefgate::scheduler"));
    assert!(logs.contains("generating on demand"));
    assert!(logs.contains("Minecraft"));
}

#[tokio::test(start_paused = true)]
async fn gate_bounds_interactive_and_bulk_generation() {
    let backend = Arc::new(CountingBackend::slow(Duration::from_millis(100)));
    let mut config = BriefingConfig::default().with_batch_size(3).with_concurrency(3);
    config.limiter.enabled = false;
    let service = Arc::new(
        BriefingService::builder(config, backend.clone())
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap(),
    );

    let warm = service.spawn_warm();
    let mut interactive = Vec::new();
    for i in 0..10 {
        let service = service.clone();
        interactive.push(tokio::spawn(async move {
            let user = IdentityKey::user(format!("u{i}"));
            service.resolve_briefing(&format!("Indie {i}"), Some(&user), None).await
        }));
    }

    for handle in interactive {
        assert_eq!(handle.await.unwrap().unwrap().source, Source::Fresh);
    }
    let stats = warm.wait().await.unwrap();
    assert_eq!(stats.successes, 23);
    assert_eq!(backend.calls(), 33);
    assert_eq!(backend.peak(), 3);
    assert_eq!(service.scheduler().gate().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn hung_provider_times_out_into_fallbacks() {
    let backend = Arc::new(HungBackend::default());
    let config = BriefingConfig::default().with_attempt_timeout(Duration::from_secs(30));
    let service = Arc::new(
        BriefingService::builder(config, backend.clone())
            .store(Arc::new(MemoryStore::new()))
            .sleeper(Arc::new(InstantSleeper))
            .build()
            .unwrap(),
    );

    let outcome = service.resolve_briefing_or_fallback("BTS", None, None).await.unwrap();
    assert_eq!(outcome.source, Source::Fallback);
    assert_eq!(backend.calls(), 3);
    assert_eq!(service.scheduler().gate().in_flight(), 0);

    // More hung requests than gate slots still all finish.
    let mut pending = Vec::new();
    for i in 0..6 {
        let service = service.clone();
        pending.push(tokio::spawn(async move {
            let user = IdentityKey::user(format!("u{i}"));
            service.resolve_briefing_or_fallback("Indie", Some(&user), None).await
        }));
    }
    for handle in pending {
        assert_eq!(handle.await.unwrap().unwrap().source, Source::Fallback);
    }
    assert_eq!(service.scheduler().gate().in_flight(), 0);
    assert_eq!(service.counters().fallbacks, 7);
    assert_eq!(service.counters().generation_failures, 7);
}
