//! Grounded summarization of crawled text.
//!
//! The model only sees the supplied page, delimited and fingerprinted, and
//! must answer [`UNAVAILABLE`] when the page does not contain the answer.
//! Anything that cannot be grounded comes back as the sentinel: no call is
//! made for missing content, and a failed call degrades to the same result.

use lantern_core::message::{MemorySegment, Message, Role, SegmentKind};
use lantern_core::provider::{Provider, ProviderRequest};
use lantern_crawler::extract::passes_gate;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::compaction::compact;
use crate::digest::content_hash;

/// Returned in place of a summary that could not be grounded in the page.
pub const UNAVAILABLE: &str = "UNAVAILABLE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundedSummary {
    pub summary: String,
    pub grounded: bool,
}

impl GroundedSummary {
    pub fn unavailable() -> Self {
        Self {
            summary: UNAVAILABLE.to_string(),
            grounded: false,
        }
    }
}

pub struct GroundedSummarizer {
    provider: Arc<dyn Provider>,
    model: String,
    min_content_chars: usize,
    chunk_chars: usize,
    max_source_chars: usize,
}

impl GroundedSummarizer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            min_content_chars: 100,
            chunk_chars: 1000,
            max_source_chars: 6000,
        }
    }

    /// Content below this many non-whitespace characters is not summarized.
    pub fn with_min_content_chars(mut self, min: usize) -> Self {
        self.min_content_chars = min;
        self
    }

    /// Source text is split into chunks of `chunk_chars` and at most
    /// `max_source_chars` of it reach the model.
    pub fn with_source_limits(mut self, chunk_chars: usize, max_source_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self.max_source_chars = max_source_chars;
        self
    }

    pub async fn summarize(&self, text: &str, instructions: &str) -> GroundedSummary {
        let text = text.trim();
        if !passes_gate(text, self.min_content_chars) {
            debug!(chars = text.chars().count(), "Nothing to summarize");
            return GroundedSummary::unavailable();
        }

        let page_hash = content_hash(text);
        let source = self.fit_source(text, instructions);
        let request = ProviderRequest::new(
            self.model.clone(),
            vec![
                Message::system(format!(
                    "Answer using only the page between BEGIN_PAGE and END_PAGE (sha256 {page_hash}). \
                     Do not add facts that are not on the page. If the page does not contain the \
                     answer, reply with exactly {UNAVAILABLE}."
                )),
                Message::system(instructions.to_string()),
                Message::user(format!("BEGIN_PAGE\n{source}\nEND_PAGE")),
            ],
        )
        .with_temperature(0.0)
        .with_top_p(0.1);

        let reply = match self.provider.complete(request).await {
            Ok(response) => response.message.content,
            Err(e) => {
                warn!(page = %page_hash, "Grounded summary failed: {e}");
                return GroundedSummary::unavailable();
            }
        };

        let summary = reply.trim();
        if summary.is_empty() || is_sentinel(summary) {
            debug!(page = %page_hash, "Page does not ground an answer");
            return GroundedSummary::unavailable();
        }

        GroundedSummary {
            summary: summary.to_string(),
            grounded: true,
        }
    }

    /// Chunk the page and compact it with the instructions pinned. Chunks
    /// are ordered last to first so the end of the page is dropped first.
    fn fit_source(&self, text: &str, instructions: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut segments: Vec<MemorySegment> = chars
            .chunks(self.chunk_chars)
            .rev()
            .map(|chunk| MemorySegment::new(Role::User, chunk.iter().collect::<String>(), SegmentKind::Source))
            .collect();
        segments.push(MemorySegment::system(instructions, SegmentKind::Instruction).with_pinned(true));

        let budget = self.max_source_chars + instructions.chars().count();
        let kept = compact(segments, budget, 0);

        kept.iter()
            .rev()
            .filter(|s| s.kind == SegmentKind::Source)
            .map(|s| s.content.as_str())
            .collect()
    }
}

/// The reply is the sentinel alone, give or take quotes and punctuation.
fn is_sentinel(reply: &str) -> bool {
    reply.trim_matches(|c: char| !c.is_alphanumeric()) == UNAVAILABLE
}
