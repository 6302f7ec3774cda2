//! Rate limiting primitives.
//!
//! - [`WindowCounter`]: fixed-window counting, backed by the shared store, local memory, or
//!   both ([`DualWindowCounter`]: store first, memory when the store errors).
//! - [`RateLimiter`]: maps an [`IdentityKey`] and a [`PolicyKind`] to an admission decision
//!   and fails open on infrastructure errors.
//! - [`AdmissionLayer`]: Tower middleware that asks a `RateLimiter` before calling the inner
//!   service.
//!
//! Counter keys are `"<policy name>:<identity>"`, so one identity has an independent budget
//! per policy. The store-backed counter persists them as `"rate_limit:<policy>:<identity>"`.

use std::time::Duration;

pub mod identity;
pub mod limiter;
pub mod middleware;
pub mod policy;
pub mod window;

pub use identity::IdentityKey;
pub use limiter::RateLimiter;
pub use middleware::{AdmissionError, AdmissionLayer, AdmissionService, Identify};
pub use policy::{Limit, PolicyKind, PolicyTable, RatePolicy};
pub use window::{DualWindowCounter, MemoryWindowCounter, StoreWindowCounter, WindowCounter};

/// The decision returned by a window counter or rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is allowed to proceed.
    Allowed {
        /// Requests left in the current window.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: u32,
    },
    /// The request is denied.
    Denied {
        /// Time until the current window closes.
        /// Useful for `Retry-After` headers.
        retry_after: Duration,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Retry hint for a denial.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Denied { retry_after } => Some(*retry_after),
            Decision::Allowed { .. } => None,
        }
    }
}
