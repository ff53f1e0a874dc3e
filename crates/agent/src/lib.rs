//! Conversation logic for Lantern.
//!
//! An inbound [`ChatEvent`](lantern_core::ChatEvent) flows through the
//! [`MessagePipeline`]:
//!
//! 1. **Limit** replies to other bots and honour silence requests
//! 2. **Classify** the message with the [`IntentTable`]
//! 3. **Ground** page and search answers with the [`GroundedSummarizer`]
//! 4. **Assemble** memory tiers into a budgeted context ([`ContextAssembler`])
//! 5. **Decide** whether to speak unprompted ([`InterventionEngine`])
//! 6. **Record** the exchange through [`ConversationMemory`]

pub mod context;
pub mod conversation;
pub mod digest;
pub mod intent;
pub mod intervention;
pub mod limits;
pub mod pipeline;
pub mod summarizer;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use context::{compact, ContextAssembler, ConversationAnalysis, ConversationAnalyzer};
pub use conversation::ConversationMemory;
pub use intent::{extract_urls, Intent, IntentTable};
pub use intervention::{InterventionDecision, InterventionEngine, InterventionReason};
pub use limits::{BotConversationLimiter, Cooldown};
pub use pipeline::{MessagePipeline, Route};
pub use summarizer::{GroundedSummarizer, GroundedSummary, UNAVAILABLE};
