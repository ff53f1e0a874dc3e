//! Memory stores for Lantern conversations.
//!
//! Every backend implements [`lantern_core::MemoryStore`]: per-scope turn
//! logs, rolling summaries, and embedded interactions for recall.

pub mod in_memory;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use vector::{cosine_similarity, nearest_interactions, StoredInteraction};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
