//! Typed briefing payloads and the outcome of resolving one.

use crate::error::GenerationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of content a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCategory {
    News,
    SocialMedia,
    Events,
    Recommendations,
    /// Only used by fallback payloads.
    Error,
}

impl TopicCategory {
    /// Priority a topic of this category gets when the generator does not set one.
    pub fn default_priority(&self) -> u8 {
        match self {
            TopicCategory::News => 5,
            TopicCategory::SocialMedia => 4,
            TopicCategory::Events => 3,
            TopicCategory::Recommendations => 2,
            TopicCategory::Error => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub category: TopicCategory,
    pub priority: u8,
}

impl Topic {
    pub fn new(title: impl Into<String>, content: impl Into<String>, category: TopicCategory) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            sources: Vec::new(),
            category,
            priority: category.default_priority(),
        }
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Well-known metadata fields; anything else lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A generated briefing, as cached and served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefingPayload {
    pub content: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub topics: Vec<Topic>,
    pub generated_by: String,
    #[serde(default)]
    pub metadata: Metadata,
}

const FALLBACK_GENERATOR: &str = "Fallback Handler";

impl BriefingPayload {
    pub fn new(content: impl Into<String>, generated_by: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            summary: String::new(),
            sources: Vec::new(),
            topics: Vec::new(),
            generated_by: generated_by.into(),
            metadata: Metadata::default(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topics.push(topic);
        self
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Check the payload before it is cached or served.
    ///
    /// Content must be non-empty, every topic needs a title, and every source (top level and
    /// per topic) must be an `http` or `https` URL.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.content.trim().is_empty() {
            return Err(GenerationError::InvalidPayload("content is empty".into()));
        }
        for (index, topic) in self.topics.iter().enumerate() {
            if topic.title.trim().is_empty() {
                return Err(GenerationError::InvalidPayload(format!("topic {index} has no title")));
            }
        }
        let sources = self.sources.iter().chain(self.topics.iter().flat_map(|t| t.sources.iter()));
        for source in sources {
            if !is_http_url(source) {
                return Err(GenerationError::InvalidPayload(format!(
                    "source '{source}' is not an http(s) URL"
                )));
            }
        }
        Ok(())
    }

    /// Placeholder served when generation for `subject` failed.
    pub fn fallback(subject: &str, cause: &str, now: DateTime<Utc>) -> Self {
        let mut metadata = Metadata {
            generated_at: Some(now),
            subject: Some(subject.to_string()),
            error: Some(cause.to_string()),
            ..Metadata::default()
        };
        metadata.extra.insert("fallback".into(), serde_json::Value::Bool(true));

        Self {
            content: format!(
                "We're having trouble generating your {subject} briefing right now. \
                 Please try again in a few minutes."
            ),
            summary: "Briefing temporarily unavailable".into(),
            sources: Vec::new(),
            topics: vec![Topic::new(
                "⚠️ Service Issue",
                "Our AI briefing service is temporarily unavailable. Please try again shortly.",
                TopicCategory::Error,
            )],
            generated_by: FALLBACK_GENERATOR.into(),
            metadata,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.generated_by == FALLBACK_GENERATOR
    }
}

fn is_http_url(raw: &str) -> bool {
    let rest = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
            !host.is_empty() && !host.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Where a resolved briefing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Cache,
    Fresh,
    Fallback,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Cache => "cache",
            Source::Fresh => "fresh",
            Source::Fallback => "fallback",
        })
    }
}

/// Result of resolving one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub payload: BriefingPayload,
    /// Estimated upstream cost in USD; zero unless `source` is [`Source::Fresh`].
    pub cost_estimate: f64,
    pub duration: Duration,
    pub source: Source,
}
