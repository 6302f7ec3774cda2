//! Error types for admission, caching and generation.
use crate::clock::ceil_secs;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the command.
    #[error("shared store unavailable: {0}")]
    Unavailable(String),
    /// A stored value did not have the expected shape.
    #[error("corrupt value at '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Failure reported by a [`GenerationBackend`](crate::generation::GenerationBackend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// The upstream provider returned an error.
    #[error("upstream generation failed: {0}")]
    Upstream(String),
    /// The upstream provider did not answer in time.
    #[error("upstream generation timed out after {0:?}")]
    Timeout(Duration),
    /// The provider answered but the payload failed validation.
    #[error("invalid briefing payload: {0}")]
    InvalidPayload(String),
}

impl GenerationError {
    /// Invalid payloads are deterministic for a given answer; retrying them only burns cost.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::InvalidPayload(_))
    }
}

/// Outcome of an operation that ran under a [`RetryPolicy`](crate::retry::RetryPolicy).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; `last` is the final failure.
    #[error("retry exhausted after {attempts} attempts; last error: {last}")]
    Exhausted { attempts: usize, last: E },
    /// The failure was not eligible for retry.
    #[error("{0}")]
    NotRetryable(E),
}

impl<E> RetryError<E> {
    /// The failure that ended the retry loop.
    pub fn last(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NotRetryable(e) => e,
        }
    }

    pub fn into_last(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NotRetryable(e) => e,
        }
    }
}

/// A request was denied by a rate-limit policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimited {
    /// Name of the policy that denied the request.
    pub policy: &'static str,
    /// Time until the current window closes.
    pub retry_after: Duration,
}

impl RateLimited {
    /// Retry hint in whole seconds, rounded up (suitable for a `Retry-After` header).
    pub fn retry_after_secs(&self) -> u64 {
        ceil_secs(self.retry_after)
    }
}

impl std::fmt::Display for RateLimited {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rate limit '{}' exceeded; retry after {}s", self.policy, self.retry_after_secs())
    }
}

impl std::error::Error for RateLimited {}

/// Errors surfaced by [`BriefingScheduler`](crate::scheduler::BriefingScheduler) and
/// [`BriefingService`](crate::service::BriefingService).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BriefingError {
    #[error(transparent)]
    RateLimited(#[from] RateLimited),
    /// Generation failed after retries; callers usually answer with a fallback payload.
    #[error("briefing generation for '{subject}' failed: {cause}")]
    GenerationFailed { subject: String, cause: String },
    /// A subject outside the popular catalog was requested anonymously.
    #[error("subject '{subject}' is not in the popular catalog and requires an identity")]
    MissingIdentity { subject: String },
    #[error(transparent)]
    BackendUnavailable(#[from] StoreError),
}

impl BriefingError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    pub fn is_generation_failed(&self) -> bool {
        matches!(self, Self::GenerationFailed { .. })
    }

    pub fn is_missing_identity(&self) -> bool {
        matches!(self, Self::MissingIdentity { .. })
    }

    /// Retry hint when the request was rate limited.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(limited) => Some(limited.retry_after),
            _ => None,
        }
    }
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Parse(String),
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display_rounds_retry_hint_up() {
        let err = RateLimited { policy: "auth", retry_after: Duration::from_millis(1500) };
        assert_eq!(err.retry_after_secs(), 2);
        let msg = err.to_string();
        assert!(msg.contains("auth"));
        assert!(msg.contains("2s"));
    }

    #[test]
    fn briefing_error_predicates() {
        let limited: BriefingError =
            RateLimited { policy: "auth", retry_after: Duration::from_secs(3) }.into();
        assert!(limited.is_rate_limited());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));

        let missing = BriefingError::MissingIdentity { subject: "Obscure Band".into() };
        assert!(missing.is_missing_identity());
        assert!(missing.retry_after().is_none());
        assert!(missing.to_string().contains("Obscure Band"));

        let failed = BriefingError::GenerationFailed { subject: "BTS".into(), cause: "boom".into() };
        assert!(failed.is_generation_failed());
    }

    #[test]
    fn retry_error_exposes_last_failure() {
        let err = RetryError::Exhausted { attempts: 3, last: GenerationError::Upstream("503".into()) };
        assert_eq!(err.last(), &GenerationError::Upstream("503".into()));
        assert!(err.to_string().contains("3 attempts"));
        let rejected = RetryError::NotRetryable(GenerationError::InvalidPayload("empty".into()));
        assert!(!rejected.last().is_retryable());
        assert_eq!(rejected.into_last(), GenerationError::InvalidPayload("empty".into()));
    }
}
