use super::BriefingScheduler;
use crate::cache::CacheKey;
use crate::error::BriefingError;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

/// A subject the warm pass could not generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectFailure {
    pub subject: String,
    pub cause: String,
}

/// Statistics of one warm pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarmStats {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    /// Sum of per-subject cost estimates in USD.
    pub total_cost: f64,
    pub batches: usize,
    pub failed: Vec<SubjectFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl WarmStats {
    fn start(total: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            total,
            successes: 0,
            failures: 0,
            total_cost: 0.0,
            batches: 0,
            failed: Vec::new(),
            started_at,
            completed_at: started_at,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}

impl BriefingScheduler {
    /// Regenerate every catalog subject into the public cache for today.
    ///
    /// Subjects run in batches of the configured size; a batch is fully collected before the
    /// next starts and the configured pause separates consecutive batches. The cache is not
    /// consulted first, so running the pass again refreshes everything. A failing subject is
    /// recorded and does not affect the rest of its batch.
    pub async fn warm_popular_catalog(&self) -> WarmStats {
        let subjects = self.catalog.subjects();
        let mut stats = WarmStats::start(subjects.len(), self.clock.now());
        let batch_count = subjects.len().div_ceil(self.batch_size);
        info!(
            target: "briefgate::warm",
            total = stats.total,
            batches = batch_count,
            batch_size = self.batch_size,
            "warm pass started"
        );

        for (index, batch) in subjects.chunks(self.batch_size).enumerate() {
            let results = join_all(batch.iter().map(|subject| self.warm_subject(subject))).await;
            for (subject, result) in batch.iter().zip(results) {
                match result {
                    Ok(cost) => {
                        stats.successes += 1;
                        stats.total_cost += cost;
                    }
                    Err(cause) => {
                        error!(target: "briefgate::warm", subject = %subject, cause = %cause, "warm generation failed");
                        stats.failures += 1;
                        stats.failed.push(SubjectFailure { subject: subject.clone(), cause });
                    }
                }
            }
            stats.batches += 1;

            if index + 1 < batch_count {
                self.sleeper.sleep(self.batch_pause).await;
            }
        }

        stats.completed_at = self.clock.now();
        info!(
            target: "briefgate::warm",
            total = stats.total,
            successes = stats.successes,
            failures = stats.failures,
            total_cost_usd = stats.total_cost,
            batches = stats.batches,
            "warm pass completed"
        );
        stats
    }

    async fn warm_subject(&self, subject: &str) -> Result<f64, String> {
        let (payload, cost) = self.generate(subject, None).await.map_err(|e| match e {
            BriefingError::GenerationFailed { cause, .. } => cause,
            other => other.to_string(),
        })?;
        let key = CacheKey::public(subject, self.clock.today());
        if !self.cache.set(&key, &payload, self.cache_ttl).await {
            // Still a success: the payload was produced and paid for.
            warn!(target: "briefgate::warm", subject, key = %key, "warm result not cached");
        }
        Ok(cost)
    }
}
