//! Backoff and jitter for generation retries.
//!
//! Attempt index `0` is the initial call (no delay); retries start at `attempt = 1`. The
//! exponential strategy doubles from `base`, so with the default 1s base the first retry waits
//! 1s and the second 2s. Delays saturate at [`MAX_BACKOFF`].
//!
//! ```rust
//! use std::time::Duration;
//! use briefgate::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_secs(1));
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_secs(1));
//! assert_eq!(backoff.delay(2), Duration::from_secs(2));
//! ```

use rand::{rng, Rng};
use serde::Deserialize;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 hour).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Constant(Duration),
    /// `base * 2^(attempt - 1)`, optionally capped.
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant(delay)
    }

    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Cap exponential growth. No-op for constant backoff.
    pub fn with_max(self, cap: Duration) -> Self {
        match self {
            Backoff::Exponential { base, .. } => Backoff::Exponential { base, max: Some(cap) },
            other => other,
        }
    }

    /// Delay before `attempt` (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let raw = match *self {
            Backoff::Constant(d) => d,
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                let exp = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                max.map_or(exp, |m| exp.min(m))
            }
        };
        raw.min(MAX_BACKOFF)
    }
}

/// Randomisation applied on top of a backoff delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// Exact backoff delay.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis: u64 = delay.as_millis().try_into().unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            Jitter::Full if millis == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal if millis == 0 => Duration::ZERO,
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}
