//! Bounded retries for generation calls.
//!
//! Semantics:
//! - `max_retries` counts retries after the initial call, so an operation runs at most
//!   `max_retries + 1` times.
//! - `should_retry` decides whether a failure is eligible; ineligible failures return
//!   [`RetryError::NotRetryable`] immediately.
//! - The delay before retry `n` (1-based) is `backoff.delay(n)` with jitter applied, awaited
//!   through the configured [`Sleeper`].
//!
//! ```rust
//! use std::time::Duration;
//! use briefgate::{Backoff, InstantSleeper, RetryPolicy};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .backoff(Backoff::exponential(Duration::from_secs(1)))
//!     .with_sleeper(InstantSleeper)
//!     .build();
//! let result: Result<u32, _> = policy.execute(|| async { Err::<u32, &str>("down") }).await;
//! assert_eq!(result.unwrap_err().into_last(), "down");
//! # });
//! ```

use crate::backoff::{Backoff, Jitter};
use crate::clock::millis;
use crate::error::RetryError;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default number of retries after the initial call.
pub const DEFAULT_MAX_RETRIES: usize = 2;
/// Default base delay; doubles with every retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default deadline for one generation attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retry policy combining backoff, jitter, predicate, and sleeper.
#[derive(Clone)]
pub struct RetryPolicy<E> {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Predicate<E>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .field("should_retry", &"<predicate>")
            .finish()
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        RetryPolicyBuilder::new().build()
    }
}

impl<E> RetryPolicy<E> {
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Run `operation` until it succeeds, fails ineligibly, or retries run out.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, RetryError<E>>
    where
        E: Display,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        let mut attempt = 0;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !(self.should_retry)(&error) {
                return Err(RetryError::NotRetryable(error));
            }
            if attempt >= self.max_retries {
                return Err(RetryError::Exhausted { attempts: attempt + 1, last: error });
            }
            attempt += 1;
            let delay = self.jitter.apply(self.backoff.delay(attempt));
            debug!(
                target: "briefgate::retry",
                attempt,
                delay_ms = millis(delay),
                %error,
                "retrying after failure"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder<E> {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Predicate<E>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> RetryPolicyBuilder<E> {
    /// Two retries, exponential from one second, no jitter, real sleeping.
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::exponential(DEFAULT_BASE_DELAY),
            jitter: Jitter::None,
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.with_shared_sleeper(Arc::new(sleeper))
    }

    pub fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> RetryPolicy<E> {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
        }
    }
}

impl<E> Default for RetryPolicyBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::sleeper::{InstantSleeper, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy(sleeper: TrackingSleeper) -> RetryPolicy<GenerationError> {
        RetryPolicy::builder()
            .should_retry(GenerationError::is_retryable)
            .with_sleeper(sleeper)
            .build()
    }

    #[tokio::test]
    async fn success_first_attempt_never_sleeps() {
        let sleeper = TrackingSleeper::new();
        let calls = AtomicUsize::new(0);
        let result = policy(sleeper.clone())
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, GenerationError>(42)
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn succeeds_on_last_retry() {
        let calls = AtomicUsize::new(0);
        let result = policy(TrackingSleeper::new())
            .execute(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GenerationError::Upstream("503".into()))
                } else {
                    Ok("ok")
                }
            })
            .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_doubling_delays() {
        let sleeper = TrackingSleeper::new();
        let calls = AtomicUsize::new(0);
        let result = policy(sleeper.clone())
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GenerationError::Upstream(format!("attempt {n}")))
            })
            .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: GenerationError::Upstream("attempt 2".into())
            })
        );
        assert_eq!(sleeper.calls(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn ineligible_failure_is_not_retried() {
        let sleeper = TrackingSleeper::new();
        let calls = AtomicUsize::new(0);
        let result = policy(sleeper.clone())
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GenerationError::InvalidPayload("no content".into()))
            })
            .await;
        assert!(matches!(result, Err(RetryError::NotRetryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn zero_retries_runs_once() {
        let policy: RetryPolicy<GenerationError> =
            RetryPolicy::builder().max_retries(0).with_sleeper(InstantSleeper).build();
        let calls = AtomicUsize::new(0);
        let result = policy
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GenerationError::Timeout(Duration::from_secs(30)))
            })
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
