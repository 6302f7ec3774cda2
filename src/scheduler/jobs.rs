//! Background warm passes: one-off jobs and the daily schedule.

use super::{BriefingScheduler, WarmStats};
use crate::clock;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Default time of day (UTC) for the daily warm pass: 06:00.
pub fn default_daily_run_at() -> NaiveTime {
    NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default()
}

/// Why a [`WarmJob`] produced no statistics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WarmJobError {
    #[error("warm job was cancelled")]
    Cancelled,
    #[error("warm job crashed: {0}")]
    Crashed(String),
}

/// Handle to a warm pass running on the runtime. Dropping it detaches the pass.
#[derive(Debug)]
pub struct WarmJob {
    handle: JoinHandle<WarmStats>,
}

impl WarmJob {
    /// Wait for the pass to finish.
    pub async fn wait(self) -> Result<WarmStats, WarmJobError> {
        match self.handle.await {
            Ok(stats) => Ok(stats),
            Err(e) if e.is_cancelled() => Err(WarmJobError::Cancelled),
            Err(e) => {
                error!(target: "briefgate::warm", error = %e, "warm job crashed");
                Err(WarmJobError::Crashed(e.to_string()))
            }
        }
    }

    /// Abort the pass at its next await point. In-flight generations are dropped and their gate
    /// permits released; subjects already cached stay cached.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Handle to the daily warm schedule. Dropping it stops the schedule.
#[derive(Debug)]
pub struct DailyWarm {
    handle: JoinHandle<()>,
    latest: watch::Receiver<Option<WarmStats>>,
    run_at: NaiveTime,
}

impl DailyWarm {
    pub fn run_at(&self) -> NaiveTime {
        self.run_at
    }

    /// Statistics of the most recent completed pass.
    pub fn latest(&self) -> Option<WarmStats> {
        self.latest.borrow().clone()
    }

    /// Receiver notified after every completed pass.
    pub fn subscribe(&self) -> watch::Receiver<Option<WarmStats>> {
        self.latest.clone()
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for DailyWarm {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// First instant strictly after `now` whose UTC time of day is `run_at`.
pub(crate) fn next_run_after(now: DateTime<Utc>, run_at: NaiveTime) -> DateTime<Utc> {
    let today = Utc.from_utc_datetime(&now.date_naive().and_time(run_at));
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

impl BriefingScheduler {
    /// Start [`warm_popular_catalog`](Self::warm_popular_catalog) on the current runtime.
    pub fn spawn_warm(&self) -> WarmJob {
        let scheduler = self.clone();
        WarmJob { handle: tokio::spawn(async move { scheduler.warm_popular_catalog().await }) }
    }

    /// Run the warm pass every day at `run_at` UTC until the handle is cancelled or dropped.
    pub fn spawn_daily_warm(&self, run_at: NaiveTime) -> DailyWarm {
        let (tx, rx) = watch::channel(None);
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let now = scheduler.clock.now();
                let next = next_run_after(now, run_at);
                info!(target: "briefgate::warm", next_run = %next, "daily warm scheduled");
                scheduler.sleeper.sleep(clock::until(now, next)).await;

                let stats = scheduler.warm_popular_catalog().await;
                tx.send_replace(Some(stats));
            }
        });
        DailyWarm { handle, latest: rx, run_at }
    }
}
