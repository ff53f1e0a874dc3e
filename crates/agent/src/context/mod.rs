//! Context assembly for the reply path.
//!
//! - [`analysis`]: derived topic, open question, expectation, tone, intents
//! - [`compaction`]: budget compaction that never drops pinned segments
//! - [`assembler`]: tier merging in removal order

pub mod analysis;
pub mod assembler;
pub mod compaction;

pub use analysis::{ConversationAnalysis, ConversationAnalyzer};
pub use assembler::ContextAssembler;
pub use compaction::{compact, total_chars};
