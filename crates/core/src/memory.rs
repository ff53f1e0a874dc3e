//! MemoryStore trait: persistence of turns, rolling summaries, user
//! profiles and recallable interactions.
//!
//! Storage is partitioned by [`StoreScope`]: one log per user per thread, and
//! one shared log per group. Recall is a nearest-neighbour search over the
//! embeddings stored for a scope. A [`UserProfile`] is keyed by user alone
//! and spans all of that user's threads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;
use crate::message::ConversationTurn;

/// Address of one conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreScope {
    Thread { user_id: String, thread_id: String },
    Group { group_id: String },
}

impl StoreScope {
    /// Stable string key, used as the partition column in stores.
    pub fn key(&self) -> String {
        match self {
            Self::Thread { user_id, thread_id } => format!("thread:{user_id}:{thread_id}"),
            Self::Group { group_id } => format!("group:{group_id}"),
        }
    }
}

/// The scopes a single chat event touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadScope {
    pub user_id: String,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl ThreadScope {
    pub fn new(user_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            thread_id: thread_id.into(),
            group_id: None,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn thread(&self) -> StoreScope {
        StoreScope::Thread {
            user_id: self.user_id.clone(),
            thread_id: self.thread_id.clone(),
        }
    }

    pub fn group(&self) -> Option<StoreScope> {
        self.group_id.as_ref().map(|group_id| StoreScope::Group {
            group_id: group_id.clone(),
        })
    }
}

/// Long-term summary of a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingSummary {
    pub text: String,

    /// How many turns of the scope this summary covers
    pub covered_turns: usize,

    pub created_at: DateTime<Utc>,
}

/// What has been learned about one user: traits, preferences, recurring
/// requests. One per user, replaced on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

/// An interaction recalled by embedding similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalledTurn {
    pub text: String,
    pub similarity: f32,
    pub created_at: DateTime<Utc>,
}

/// The core MemoryStore trait.
///
/// Implementations: SQLite, in-memory (for testing and ephemeral runs).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Append a turn to the end of a scope's log.
    async fn append_turn(&self, scope: &StoreScope, turn: ConversationTurn) -> std::result::Result<(), MemoryError>;

    /// The most recent `limit` turns, oldest first.
    async fn recent_turns(&self, scope: &StoreScope, limit: usize) -> std::result::Result<Vec<ConversationTurn>, MemoryError>;

    /// Turns after the first `offset`, oldest first.
    async fn turns_after(&self, scope: &StoreScope, offset: usize) -> std::result::Result<Vec<ConversationTurn>, MemoryError>;

    /// Number of turns persisted for a scope.
    async fn turn_count(&self, scope: &StoreScope) -> std::result::Result<usize, MemoryError>;

    /// The newest rolling summary, if any.
    async fn latest_summary(&self, scope: &StoreScope) -> std::result::Result<Option<RollingSummary>, MemoryError>;

    /// Store a new rolling summary. Older summaries are kept but superseded.
    async fn store_summary(&self, scope: &StoreScope, summary: RollingSummary) -> std::result::Result<(), MemoryError>;

    /// The profile of `user_id`, if one was ever stored.
    async fn user_profile(&self, user_id: &str) -> std::result::Result<Option<UserProfile>, MemoryError>;

    /// Store a profile, replacing any previous one for the same user.
    async fn store_user_profile(&self, profile: UserProfile) -> std::result::Result<(), MemoryError>;

    /// Store a recallable interaction with its embedding.
    async fn store_interaction(
        &self,
        scope: &StoreScope,
        text: &str,
        embedding: Vec<f32>,
    ) -> std::result::Result<(), MemoryError>;

    /// Nearest stored interactions of a scope, best first, filtered by
    /// `min_similarity`.
    async fn nearest(
        &self,
        scope: &StoreScope,
        embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> std::result::Result<Vec<RecalledTurn>, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_keys_are_distinct() {
        let scope = ThreadScope::new("u1", "t1").with_group("g1");
        assert_eq!(scope.thread().key(), "thread:u1:t1");
        assert_eq!(scope.group().unwrap().key(), "group:g1");
    }

    #[test]
    fn store_scope_serialization() {
        let scope = StoreScope::Group { group_id: "g9".into() };
        let json = serde_json::to_string(&scope).unwrap();
        assert!(json.contains("\"type\":\"group\""));
        assert!(json.contains("g9"));
    }
}
