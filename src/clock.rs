//! Wall-clock abstraction used by rate-limit windows, cache expiry and cache-key dates.
//!
//! Everything time-dependent in the crate reads "now" through [`Clock`], so tests can move
//! time forward with [`ManualClock`] instead of sleeping.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current UTC calendar date; cache keys are scoped by it.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start the clock at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    /// Start the clock at midnight UTC of the given date.
    ///
    /// Returns `None` for dates chrono cannot represent.
    pub fn at_date(year: i32, month: u32, day: u32) -> Option<Self> {
        let start = Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single()?;
        Some(Self::new(start))
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let step = ChronoDuration::from_std(by).unwrap_or(ChronoDuration::MAX);
        let mut now = self.now.lock().expect("manual clock poisoned");
        *now = now.checked_add_signed(step).unwrap_or(*now);
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().expect("manual clock poisoned") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("manual clock poisoned")
    }
}

/// Time left until `deadline`, clamped at zero.
pub(crate) fn until(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

/// `start + span`, saturating at chrono's maximum instant.
pub(crate) fn add(start: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(span)
        .ok()
        .and_then(|d| start.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Round a duration up to whole seconds.
pub(crate) fn ceil_secs(d: Duration) -> u64 {
    if d.subsec_nanos() > 0 {
        d.as_secs().saturating_add(1)
    } else {
        d.as_secs()
    }
}
