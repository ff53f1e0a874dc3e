//! Whether to speak up in a conversation nobody addressed to the agent.
//!
//! Checks run in order and the first positive one decides:
//! 1. the event is addressed to the agent (direct message or mention)
//! 2. the text matches a configured trigger pattern
//! 3. the model, shown the recent context, says joining in would help
//! 4. a weighted coin flip at `level / 10`

use lantern_config::InterventionConfig;
use lantern_core::channel::ChatEvent;
use lantern_core::message::{MemorySegment, Message, Role};
use lantern_core::provider::{Provider, ProviderRequest};
use rand::rngs::StdRng;
use rand::Rng;
use regex_lite::Regex;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const JUDGE_PROMPT: &str = "You watch a group conversation and decide whether a helpful assistant should \
join in on the latest message. Join only when you can add something useful or someone seems to want an \
answer. Reply with JSON only: {\"intervene\": true|false, \"reason\": \"...\"}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterventionReason {
    Addressed,
    ExplicitTrigger,
    ModelJudged(String),
    Probability,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterventionDecision {
    pub speak: bool,
    pub reason: InterventionReason,
}

impl InterventionDecision {
    fn speak(reason: InterventionReason) -> Self {
        Self { speak: true, reason }
    }

    fn declined() -> Self {
        Self {
            speak: false,
            reason: InterventionReason::Declined,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Verdict {
    intervene: bool,
    #[serde(default)]
    reason: String,
}

pub struct InterventionEngine {
    level: u8,
    triggers: Vec<Regex>,
    model_judgement: bool,
    history_window: usize,
    provider: Arc<dyn Provider>,
    model: String,
    rng: Mutex<StdRng>,
}

impl InterventionEngine {
    /// Invalid trigger patterns are logged and skipped.
    pub fn new(config: &InterventionConfig, provider: Arc<dyn Provider>, model: impl Into<String>, rng: StdRng) -> Self {
        let triggers = config
            .triggers
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %pattern, "Ignoring invalid trigger pattern: {e}");
                    None
                }
            })
            .collect();

        Self {
            level: config.level.min(10),
            triggers,
            model_judgement: config.model_judgement,
            history_window: config.history_window,
            provider,
            model: model.into(),
            rng: Mutex::new(rng),
        }
    }

    pub async fn decide(&self, event: &ChatEvent, context: &[MemorySegment]) -> InterventionDecision {
        if event.addressed {
            return InterventionDecision::speak(InterventionReason::Addressed);
        }

        if self.triggers.iter().any(|re| re.is_match(&event.text)) {
            debug!(author_id = %event.author_id, "Explicit trigger matched");
            return InterventionDecision::speak(InterventionReason::ExplicitTrigger);
        }

        if self.model_judgement
            && let Some(reason) = self.judge(event, context).await
        {
            return InterventionDecision::speak(InterventionReason::ModelJudged(reason));
        }

        let roll = self.rng.lock().unwrap_or_else(|e| e.into_inner()).random_range(0..10u8);
        if roll < self.level {
            InterventionDecision::speak(InterventionReason::Probability)
        } else {
            InterventionDecision::declined()
        }
    }

    /// `Some(reason)` when the model votes to join in. Call or parse
    /// failures count as a no.
    async fn judge(&self, event: &ChatEvent, context: &[MemorySegment]) -> Option<String> {
        let recent = &context[context.len().saturating_sub(self.history_window)..];
        let history = recent
            .iter()
            .map(|s| format!("{}: {}", role_label(s.role), s.content))
            .collect::<Vec<_>>()
            .join("\n");

        let request = ProviderRequest::new(
            self.model.clone(),
            vec![
                Message::system(JUDGE_PROMPT),
                Message::user(format!(
                    "Recent conversation:\n{history}\n\nLatest message from {}:\n{}",
                    event.author_label(),
                    event.text
                )),
            ],
        )
        .with_temperature(0.0)
        .with_max_tokens(64);

        let reply = match self.provider.complete(request).await {
            Ok(response) => response.message.content,
            Err(e) => {
                warn!(channel_id = %event.channel_id, "Intervention judge failed: {e}");
                return None;
            }
        };

        let verdict = parse_verdict(&reply)?;
        debug!(intervene = verdict.intervene, reason = %verdict.reason, "Intervention verdict");
        verdict.intervene.then_some(verdict.reason)
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "note",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn parse_verdict(reply: &str) -> Option<Verdict> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{chat_event, group_event, ScriptedProvider};
    use lantern_core::error::ProviderError;
    use lantern_core::message::SegmentKind;
    use rand::SeedableRng;

    fn config(level: u8, model_judgement: bool) -> InterventionConfig {
        InterventionConfig {
            level,
            model_judgement,
            ..InterventionConfig::default()
        }
    }

    fn engine(config: &InterventionConfig, provider: Arc<ScriptedProvider>) -> InterventionEngine {
        InterventionEngine::new(config, provider, "m", StdRng::seed_from_u64(7))
    }

    #[tokio::test]
    async fn addressed_events_always_speak() {
        let provider = Arc::new(ScriptedProvider::new());
        let decision = engine(&config(0, true), provider.clone()).decide(&chat_event("hi"), &[]).await;
        assert_eq!(decision, InterventionDecision::speak(InterventionReason::Addressed));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn trigger_wins_before_the_model_is_asked() {
        let provider = Arc::new(ScriptedProvider::new());
        let decision = engine(&config(0, true), provider.clone())
            .decide(&group_event("u2", "hey Lantern, thoughts?"), &[])
            .await;
        assert_eq!(decision.reason, InterventionReason::ExplicitTrigger);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn model_verdict_decides_next() {
        let provider = Arc::new(
            ScriptedProvider::new().then(r#"{"intervene": true, "reason": "unanswered question"}"#),
        );
        let context = vec![MemorySegment::system("Current topic: trains", SegmentKind::Topic)];
        let decision = engine(&config(0, true), provider.clone())
            .decide(&group_event("u2", "which line goes to Nara"), &context)
            .await;

        assert_eq!(decision, InterventionDecision::speak(InterventionReason::ModelJudged("unanswered question".into())));
        let request = &provider.requests()[0];
        assert_eq!(request.temperature, 0.0);
        assert!(request.messages[1].content.contains("note: Current topic: trains"));
    }

    #[tokio::test]
    async fn judge_sees_only_the_history_window() {
        let provider = Arc::new(ScriptedProvider::new().then(r#"{"intervene": false}"#));
        let context: Vec<_> = (0..5)
            .map(|i| MemorySegment::system(format!("segment-{i}"), SegmentKind::ShortTerm))
            .collect();
        let config = InterventionConfig {
            level: 0,
            history_window: 2,
            ..InterventionConfig::default()
        };
        engine(&config, provider.clone()).decide(&group_event("u2", "hmm"), &context).await;

        let prompt = &provider.requests()[0].messages[1].content;
        assert!(!prompt.contains("segment-2"));
        assert!(prompt.contains("segment-3"));
        assert!(prompt.contains("segment-4"));
    }

    #[tokio::test]
    async fn judge_failure_or_garbage_counts_as_no() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_error(ProviderError::Timeout("slow".into()))
                .then("sure, why not"),
        );
        let engine = engine(&config(0, true), provider);
        for _ in 0..2 {
            let decision = engine.decide(&group_event("u2", "random chatter"), &[]).await;
            assert_eq!(decision, InterventionDecision::declined());
        }
    }

    #[tokio::test]
    async fn probability_bounds() {
        let provider = Arc::new(ScriptedProvider::new());
        let never = engine(&config(0, false), provider.clone());
        let always = engine(&config(10, false), provider.clone());
        for _ in 0..50 {
            assert!(!never.decide(&group_event("u2", "chatter"), &[]).await.speak);
            assert_eq!(
                always.decide(&group_event("u2", "chatter"), &[]).await.reason,
                InterventionReason::Probability
            );
        }
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn seeded_rng_is_reproducible() {
        let provider = Arc::new(ScriptedProvider::new());
        let a = engine(&config(5, false), provider.clone());
        let b = engine(&config(5, false), provider);
        for _ in 0..20 {
            let event = group_event("u2", "chatter");
            assert_eq!(a.decide(&event, &[]).await, b.decide(&event, &[]).await);
        }
    }

    #[test]
    fn invalid_triggers_are_skipped() {
        let config = InterventionConfig {
            triggers: vec!["(broken".into(), "(?i)lantern".into()],
            ..InterventionConfig::default()
        };
        let engine = engine(&config, Arc::new(ScriptedProvider::new()));
        assert_eq!(engine.triggers.len(), 1);
    }
}
