use crate::counters::Counters;
use crate::error::RateLimited;
use crate::rate_limit::{Decision, IdentityKey, PolicyKind, PolicyTable, WindowCounter};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Admission control: one fixed-window budget per (policy, identity).
///
/// Infrastructure errors never deny traffic. If the counter fails, the request is admitted,
/// an error is logged with the key and policy, and the `fail_open` counter is bumped.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    counter: Arc<dyn WindowCounter>,
    policies: PolicyTable,
    counters: Arc<Counters>,
}

impl RateLimiter {
    pub fn new(counter: Arc<dyn WindowCounter>, policies: PolicyTable) -> Self {
        Self::with_counters(counter, policies, Arc::new(Counters::new()))
    }

    pub fn with_counters(
        counter: Arc<dyn WindowCounter>,
        policies: PolicyTable,
        counters: Arc<Counters>,
    ) -> Self {
        Self { counter, policies, counters }
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Count the request and return the raw decision.
    pub async fn check(&self, identity: &IdentityKey, kind: PolicyKind) -> Decision {
        let policy = self.policies.policy(kind);
        let key = format!("{}:{}", policy.name, identity);

        match self.counter.increment_and_check(&key, policy.max_requests, policy.window).await {
            Ok(decision @ Decision::Allowed { remaining }) => {
                debug!(target: "briefgate::rate_limit", key = %key, remaining, "request admitted");
                self.counters.record_admitted();
                decision
            }
            Ok(decision @ Decision::Denied { retry_after }) => {
                warn!(
                    target: "briefgate::rate_limit",
                    key = %key,
                    policy = policy.name,
                    max = policy.max_requests,
                    retry_after_secs = retry_after.as_secs(),
                    "rate limit exceeded"
                );
                self.counters.record_denied();
                decision
            }
            Err(err) => {
                error!(
                    target: "briefgate::rate_limit",
                    key = %key,
                    policy = policy.name,
                    error = %err,
                    "rate limit check failed; admitting request"
                );
                self.counters.record_fail_open();
                Decision::Allowed { remaining: policy.max_requests }
            }
        }
    }

    /// Admit or deny with a retry hint.
    pub async fn admit(&self, identity: &IdentityKey, kind: PolicyKind) -> Result<(), RateLimited> {
        match self.check(identity, kind).await {
            Decision::Allowed { .. } => Ok(()),
            Decision::Denied { retry_after } => Err(RateLimited { policy: kind.name(), retry_after }),
        }
    }
}
