//! Derived conversation analysis.
//!
//! One deterministic completion call reads the recent turns and reports what
//! the conversation is about, which question is still open, what the user
//! expects, their tone, and the intents of the latest message. Results are
//! cached by a hash of the transcript.

use lantern_config::ContextConfig;
use lantern_core::error::ProviderError;
use lantern_core::message::{ConversationTurn, MemorySegment, Message, SegmentKind};
use lantern_core::provider::{Provider, ProviderRequest};
use lantern_crawler::TtlCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::digest::content_hash;

const ANALYSIS_PROMPT: &str = "You analyse conversations. Read the transcript and reply with a single JSON \
object with the keys \"topic\", \"unresolved\", \"expectation\", \"tone\" (strings, empty when unknown) \
and \"intents\" (array of short strings describing what the last user message wants). Reply with JSON only.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationAnalysis {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub unresolved: String,
    #[serde(default)]
    pub expectation: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub intents: Vec<String>,
}

impl ConversationAnalysis {
    /// Parse the first JSON object found in a model reply.
    pub fn parse(reply: &str) -> Option<Self> {
        let start = reply.find('{')?;
        let end = reply.rfind('}')?;
        if end < start {
            return None;
        }
        serde_json::from_str(&reply[start..=end]).ok()
    }

    /// Non-empty fields as system segments, in [`SegmentKind::ANALYSIS`]
    /// order, pinned according to `config`.
    pub fn segments(&self, config: &ContextConfig) -> Vec<MemorySegment> {
        let intents = self
            .intents
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .collect::<Vec<_>>()
            .join(" / ");

        let fields = [
            (SegmentKind::Topic, "Current topic", self.topic.trim()),
            (SegmentKind::Unresolved, "Unresolved question", self.unresolved.trim()),
            (SegmentKind::Expectation, "User expectation", self.expectation.trim()),
            (SegmentKind::Tone, "Tone", self.tone.trim()),
            (SegmentKind::Intents, "Possible intents", intents.as_str()),
        ];

        fields
            .into_iter()
            .filter(|(_, _, value)| !value.is_empty())
            .map(|(kind, label, value)| {
                MemorySegment::system(format!("{label}: {value}"), kind).with_pinned(config.is_pinned(kind))
            })
            .collect()
    }
}

pub struct ConversationAnalyzer {
    provider: Arc<dyn Provider>,
    model: String,
    cache: Arc<TtlCache<ConversationAnalysis>>,
}

impl ConversationAnalyzer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, cache: Arc<TtlCache<ConversationAnalysis>>) -> Self {
        Self {
            provider,
            model: model.into(),
            cache,
        }
    }

    /// Analyse `turns`. An empty transcript yields an empty analysis without
    /// a completion call; an unparseable reply is an error.
    pub async fn analyze(&self, turns: &[ConversationTurn]) -> Result<ConversationAnalysis, ProviderError> {
        if turns.is_empty() {
            return Ok(ConversationAnalysis::default());
        }

        let transcript = turns
            .iter()
            .map(|t| format!("{}: {}", t.speaker.as_str(), t.text))
            .collect::<Vec<_>>()
            .join("\n");
        let key = content_hash(&transcript);

        self.cache
            .get_or_try_insert_with(&key, || async {
                let request = ProviderRequest::new(
                    self.model.clone(),
                    vec![Message::system(ANALYSIS_PROMPT), Message::user(transcript.clone())],
                )
                .with_temperature(0.0)
                .with_max_tokens(256);

                let response = self.provider.complete(request).await?;
                let analysis = ConversationAnalysis::parse(&response.message.content).ok_or_else(|| {
                    ProviderError::MalformedResponse("analysis reply is not a JSON object".into())
                })?;
                debug!(topic = %analysis.topic, intents = analysis.intents.len(), "Conversation analysed");
                Ok(analysis)
            })
            .await
    }
}
