//! Context assembly: the memory tiers merged into one ordered prompt.
//!
//! Tiers, in output order:
//!
//! | Tier | Source | Pinned |
//! |------|--------|--------|
//! | Derived analysis | [`ConversationAnalyzer`] | per configured kind |
//! | Long-term summary | thread rolling summary | per config (default yes) |
//! | Group summary | group rolling summary | per config (default yes) |
//! | User profile | the author's [`UserProfile`](lantern_core::memory::UserProfile) | per config (default yes) |
//! | Recalled | embedding nearest neighbours | no |
//! | Short-term | most recent turns, oldest first | no |
//!
//! The output order doubles as the removal order of [`compact`]: the first
//! non-pinned segment is the oldest recalled or short-term turn.
//!
//! # Determinism
//!
//! No randomness is used during assembly. Analysis runs at temperature 0 and
//! is cached by transcript hash; embeddings are cached by text hash.

use lantern_config::ContextConfig;
use lantern_core::memory::ThreadScope;
use lantern_core::message::{ConversationTurn, MemorySegment, SegmentKind};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::analysis::ConversationAnalyzer;
use super::compaction::{compact, total_chars};
use crate::conversation::ConversationMemory;

pub struct ContextAssembler {
    memory: Arc<ConversationMemory>,
    analyzer: Option<ConversationAnalyzer>,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(memory: Arc<ConversationMemory>, config: ContextConfig) -> Self {
        Self {
            memory,
            analyzer: None,
            config,
        }
    }

    /// Enable the derived-analysis tier.
    pub fn with_analyzer(mut self, analyzer: ConversationAnalyzer) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Assemble the context for a new message `query` in `scope`, compacted
    /// to `budget_chars`.
    ///
    /// A failing tier contributes nothing; assembly itself never fails.
    pub async fn assemble(&self, scope: &ThreadScope, query: &str, budget_chars: usize) -> Vec<MemorySegment> {
        let thread = scope.thread();
        let short_term = match self
            .memory
            .recent_turns(&thread, self.memory.config().short_term_turns)
            .await
        {
            Ok(turns) => turns,
            Err(e) => {
                warn!(scope = %thread.key(), "Short-term turns unavailable: {e}");
                Vec::new()
            }
        };

        let mut segments = self.analysis_segments(&short_term, query).await;

        match self.memory.latest_summary(&thread).await {
            Ok(Some(summary)) => segments.push(self.segment(
                format!("Summary of the earlier conversation: {}", summary.text),
                SegmentKind::LongTermSummary,
            )),
            Ok(None) => {}
            Err(e) => warn!(scope = %thread.key(), "Long-term summary unavailable: {e}"),
        }

        if let Some(group) = scope.group() {
            match self.memory.latest_summary(&group).await {
                Ok(Some(summary)) => segments.push(self.segment(
                    format!("Summary of the group conversation: {}", summary.text),
                    SegmentKind::GroupSummary,
                )),
                Ok(None) => {}
                Err(e) => warn!(scope = %group.key(), "Group summary unavailable: {e}"),
            }
        }

        match self.memory.user_profile(&scope.user_id).await {
            Ok(Some(profile)) => segments.push(self.segment(
                format!("What is known about this user: {}", profile.summary),
                SegmentKind::UserProfile,
            )),
            Ok(None) => {}
            Err(e) => warn!(user_id = %scope.user_id, "User profile unavailable: {e}"),
        }

        match self.memory.recall(scope, query).await {
            Ok(recalled) => {
                let present: HashSet<&str> = short_term.iter().map(|t| t.text.as_str()).collect();
                segments.extend(
                    recalled
                        .into_iter()
                        .filter(|r| !present.contains(r.text.as_str()))
                        .map(|r| self.segment(format!("Related earlier message: {}", r.text), SegmentKind::Recalled)),
                );
            }
            Err(e) => warn!(scope = %thread.key(), "Recall unavailable: {e}"),
        }

        segments.extend(short_term.iter().map(|turn| {
            MemorySegment::from_turn(turn, SegmentKind::ShortTerm)
                .with_pinned(self.config.is_pinned(SegmentKind::ShortTerm))
        }));

        let before = segments.len();
        let compacted = compact(segments, budget_chars, self.config.min_segments);
        debug!(
            segments = compacted.len(),
            dropped = before - compacted.len(),
            chars = total_chars(&compacted),
            budget_chars,
            "Context assembled"
        );
        compacted
    }

    async fn analysis_segments(&self, short_term: &[ConversationTurn], query: &str) -> Vec<MemorySegment> {
        let Some(analyzer) = self.analyzer.as_ref().filter(|_| self.config.analysis_enabled) else {
            return Vec::new();
        };

        let mut transcript = short_term.to_vec();
        if !query.trim().is_empty() {
            transcript.push(ConversationTurn::user(query));
        }

        match analyzer.analyze(&transcript).await {
            Ok(analysis) => analysis.segments(&self.config),
            Err(e) => {
                warn!("Conversation analysis unavailable: {e}");
                Vec::new()
            }
        }
    }

    fn segment(&self, content: String, kind: SegmentKind) -> MemorySegment {
        MemorySegment::system(content, kind).with_pinned(self.config.is_pinned(kind))
    }
}
