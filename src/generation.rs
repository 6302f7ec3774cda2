//! The external briefing generator.

use crate::error::GenerationError;
use crate::payload::BriefingPayload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-user tuning passed through to the generator. The generator decides what to do with it;
/// the scheduler only forwards it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub include_social_media: bool,
    pub include_fan_reactions: bool,
    pub include_upcoming_events: bool,
    pub focus_areas: Vec<String>,
    pub exclude_topics: Vec<String>,
    pub tone: String,
    pub custom_prompt: Option<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            include_social_media: true,
            include_fan_reactions: true,
            include_upcoming_events: true,
            focus_areas: Vec::new(),
            exclude_topics: Vec::new(),
            tone: "informative".into(),
            custom_prompt: None,
        }
    }
}

/// Produces a briefing for a subject. Implementations talk to the AI provider; the crate never
/// does.
#[async_trait]
pub trait GenerationBackend: Send + Sync + std::fmt::Debug {
    async fn generate(
        &self,
        subject: &str,
        settings: Option<&GenerationSettings>,
    ) -> Result<BriefingPayload, GenerationError>;

    /// Cost of producing `payload` in USD, when the backend can tell (e.g. from token counts).
    /// `None` means the configured flat cost is used.
    fn cost_estimate(&self, _payload: &BriefingPayload) -> Option<f64> {
        None
    }
}
