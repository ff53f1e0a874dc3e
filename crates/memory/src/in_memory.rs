//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use lantern_core::error::MemoryError;
use lantern_core::memory::{MemoryStore, RecalledTurn, RollingSummary, StoreScope, UserProfile};
use lantern_core::message::ConversationTurn;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::vector::{self, StoredInteraction};

#[derive(Debug, Default)]
struct ScopeLog {
    turns: Vec<ConversationTurn>,
    summaries: Vec<RollingSummary>,
    interactions: Vec<StoredInteraction>,
}

/// A store that keeps every scope's log in process memory.
/// Nothing survives a restart.
pub struct InMemoryStore {
    scopes: Arc<RwLock<HashMap<String, ScopeLog>>>,
    profiles: Arc<RwLock<HashMap<String, UserProfile>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            scopes: Arc::new(RwLock::new(HashMap::new())),
            profiles: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append_turn(&self, scope: &StoreScope, turn: ConversationTurn) -> Result<(), MemoryError> {
        self.scopes
            .write()
            .await
            .entry(scope.key())
            .or_default()
            .turns
            .push(turn);
        Ok(())
    }

    async fn recent_turns(&self, scope: &StoreScope, limit: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        let scopes = self.scopes.read().await;
        let Some(log) = scopes.get(&scope.key()) else {
            return Ok(Vec::new());
        };
        let start = log.turns.len().saturating_sub(limit);
        Ok(log.turns[start..].to_vec())
    }

    async fn turns_after(&self, scope: &StoreScope, offset: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        let scopes = self.scopes.read().await;
        Ok(scopes
            .get(&scope.key())
            .map(|log| log.turns.iter().skip(offset).cloned().collect())
            .unwrap_or_default())
    }

    async fn turn_count(&self, scope: &StoreScope) -> Result<usize, MemoryError> {
        let scopes = self.scopes.read().await;
        Ok(scopes.get(&scope.key()).map_or(0, |log| log.turns.len()))
    }

    async fn latest_summary(&self, scope: &StoreScope) -> Result<Option<RollingSummary>, MemoryError> {
        let scopes = self.scopes.read().await;
        Ok(scopes
            .get(&scope.key())
            .and_then(|log| log.summaries.last().cloned()))
    }

    async fn store_summary(&self, scope: &StoreScope, summary: RollingSummary) -> Result<(), MemoryError> {
        self.scopes
            .write()
            .await
            .entry(scope.key())
            .or_default()
            .summaries
            .push(summary);
        Ok(())
    }

    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, MemoryError> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn store_user_profile(&self, profile: UserProfile) -> Result<(), MemoryError> {
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile);
        Ok(())
    }

    async fn store_interaction(
        &self,
        scope: &StoreScope,
        text: &str,
        embedding: Vec<f32>,
    ) -> Result<(), MemoryError> {
        self.scopes
            .write()
            .await
            .entry(scope.key())
            .or_default()
            .interactions
            .push(StoredInteraction {
                text: text.to_string(),
                embedding,
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn nearest(
        &self,
        scope: &StoreScope,
        embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<RecalledTurn>, MemoryError> {
        let scopes = self.scopes.read().await;
        Ok(scopes
            .get(&scope.key())
            .map(|log| vector::nearest_interactions(&log.interactions, embedding, limit, min_similarity))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread() -> StoreScope {
        StoreScope::Thread {
            user_id: "u1".into(),
            thread_id: "t1".into(),
        }
    }

    #[tokio::test]
    async fn recent_turns_are_oldest_first() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .append_turn(&thread(), ConversationTurn::user(format!("m{i}")))
                .await
                .unwrap();
        }

        let recent = store.recent_turns(&thread(), 3).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
        assert_eq!(store.turn_count(&thread()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn turns_after_skips_offset() {
        let store = InMemoryStore::new();
        for i in 0..4 {
            store
                .append_turn(&thread(), ConversationTurn::assistant(format!("r{i}")))
                .await
                .unwrap();
        }
        let after = store.turns_after(&thread(), 3).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].text, "r3");
        assert!(store.turns_after(&thread(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scopes_are_isolated() {
        let store = InMemoryStore::new();
        let group = StoreScope::Group { group_id: "g1".into() };
        store
            .append_turn(&group, ConversationTurn::user("in group"))
            .await
            .unwrap();

        assert_eq!(store.turn_count(&thread()).await.unwrap(), 0);
        assert_eq!(store.turn_count(&group).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn latest_summary_supersedes_older() {
        let store = InMemoryStore::new();
        assert!(store.latest_summary(&thread()).await.unwrap().is_none());

        for (text, covered) in [("first", 40), ("second", 80)] {
            store
                .store_summary(
                    &thread(),
                    RollingSummary {
                        text: text.into(),
                        covered_turns: covered,
                        created_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }

        let latest = store.latest_summary(&thread()).await.unwrap().unwrap();
        assert_eq!(latest.text, "second");
        assert_eq!(latest.covered_turns, 80);
    }

    #[tokio::test]
    async fn user_profile_is_replaced_not_appended() {
        let store = InMemoryStore::new();
        assert!(store.user_profile("u1").await.unwrap().is_none());

        for summary in ["likes trains", "likes trains and tea"] {
            store
                .store_user_profile(UserProfile {
                    user_id: "u1".into(),
                    summary: summary.into(),
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let profile = store.user_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.summary, "likes trains and tea");
        assert!(store.user_profile("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nearest_filters_by_threshold() {
        let store = InMemoryStore::new();
        store
            .store_interaction(&thread(), "about rust", vec![1.0, 0.0])
            .await
            .unwrap();
        store
            .store_interaction(&thread(), "about cooking", vec![0.0, 1.0])
            .await
            .unwrap();

        let hits = store.nearest(&thread(), &[0.9, 0.1], 5, 0.75).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "about rust");
    }

    #[tokio::test]
    async fn nearest_on_unknown_scope_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.nearest(&thread(), &[1.0], 2, 0.0).await.unwrap().is_empty());
    }
}
