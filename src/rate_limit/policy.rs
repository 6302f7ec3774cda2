//! Named rate-limit presets.

use crate::error::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The closed set of policies callers can admit against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Custom briefing generation: 5 per hour.
    BriefingGeneration,
    /// General API traffic: 100 per hour.
    GeneralApi,
    /// Authentication endpoints: 10 per 15 minutes.
    Auth,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 3] =
        [PolicyKind::BriefingGeneration, PolicyKind::GeneralApi, PolicyKind::Auth];

    /// Stable name, used as the counter key prefix.
    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::BriefingGeneration => "briefing-generation",
            PolicyKind::GeneralApi => "general-api",
            PolicyKind::Auth => "auth",
        }
    }

    /// Built-in limit for this policy.
    pub fn preset(&self) -> Limit {
        match self {
            PolicyKind::BriefingGeneration => Limit { max_requests: 5, window_secs: 3600 },
            PolicyKind::GeneralApi => Limit { max_requests: 100, window_secs: 3600 },
            PolicyKind::Auth => Limit { max_requests: 10, window_secs: 900 },
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PolicyKind::ALL.into_iter().find(|kind| kind.name() == s).ok_or_else(|| {
            ConfigError::Invalid { field: "policy", reason: format!("unknown policy '{s}'") }
        })
    }
}

/// A request budget: `max_requests` per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Limit {
    pub max_requests: u32,
    pub window_secs: u64,
}

/// A resolved policy, ready to hand to a window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub name: &'static str,
    pub max_requests: u32,
    pub window: Duration,
}

/// Limits for every [`PolicyKind`]; missing entries fall back to the presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PolicyTable {
    pub briefing_generation: Limit,
    pub general_api: Limit,
    pub auth: Limit,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            briefing_generation: PolicyKind::BriefingGeneration.preset(),
            general_api: PolicyKind::GeneralApi.preset(),
            auth: PolicyKind::Auth.preset(),
        }
    }
}

impl PolicyTable {
    pub fn limit(&self, kind: PolicyKind) -> Limit {
        match kind {
            PolicyKind::BriefingGeneration => self.briefing_generation,
            PolicyKind::GeneralApi => self.general_api,
            PolicyKind::Auth => self.auth,
        }
    }

    pub fn policy(&self, kind: PolicyKind) -> RatePolicy {
        let limit = self.limit(kind);
        RatePolicy {
            name: kind.name(),
            max_requests: limit.max_requests,
            window: Duration::from_secs(limit.window_secs),
        }
    }

    /// Override one policy's limit.
    pub fn with_limit(mut self, kind: PolicyKind, max_requests: u32, window: Duration) -> Self {
        let limit = Limit { max_requests, window_secs: window.as_secs() };
        match kind {
            PolicyKind::BriefingGeneration => self.briefing_generation = limit,
            PolicyKind::GeneralApi => self.general_api = limit,
            PolicyKind::Auth => self.auth = limit,
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in PolicyKind::ALL {
            let limit = self.limit(kind);
            if limit.max_requests == 0 {
                return Err(ConfigError::Invalid {
                    field: "limiter.policies.max_requests",
                    reason: format!("policy '{kind}' must allow at least one request"),
                });
            }
            if limit.window_secs == 0 {
                return Err(ConfigError::Invalid {
                    field: "limiter.policies.window_secs",
                    reason: format!("policy '{kind}' needs a window of at least one second"),
                });
            }
        }
        Ok(())
    }
}
