//! Memory store adapter.
//!
//! Writes each exchange to the thread log, mirrors it into the group log,
//! and keeps an embedded copy of the user's text for recall. Once enough
//! turns accumulate past the latest rolling summary, a new summary is
//! generated and stored. Each new thread summary also folds the user's
//! latest messages into their [`UserProfile`].

use chrono::Utc;
use lantern_config::MemoryConfig;
use lantern_core::error::{MemoryError, ProviderError};
use lantern_core::memory::{MemoryStore, RecalledTurn, RollingSummary, StoreScope, ThreadScope, UserProfile};
use lantern_core::message::{ConversationTurn, Message, Speaker};
use lantern_core::provider::{EmbeddingRequest, Provider, ProviderRequest};
use lantern_crawler::TtlCache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::digest::{content_hash, truncate_chars};

pub struct ConversationMemory {
    store: Arc<dyn MemoryStore>,
    provider: Arc<dyn Provider>,
    summary_model: String,
    embedding_model: String,
    embeddings: Arc<TtlCache<Vec<f32>>>,
    config: MemoryConfig,
}

impl ConversationMemory {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        provider: Arc<dyn Provider>,
        summary_model: impl Into<String>,
        embedding_model: impl Into<String>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            provider,
            summary_model: summary_model.into(),
            embedding_model: embedding_model.into(),
            embeddings: Arc::new(TtlCache::new("embedding", 256, Duration::from_secs(600))),
            config,
        }
    }

    /// Share an embedding cache with other components.
    pub fn with_embedding_cache(mut self, cache: Arc<TtlCache<Vec<f32>>>) -> Self {
        self.embeddings = cache;
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// Persist one user/assistant exchange.
    ///
    /// Storage failures propagate. Embedding and summary failures are logged
    /// and skipped: the turns are already persisted by then.
    pub async fn record_exchange(
        &self,
        scope: &ThreadScope,
        user_text: &str,
        assistant_text: &str,
    ) -> lantern_core::Result<()> {
        let now = Utc::now();
        let thread = scope.thread();

        self.store
            .append_turn(&thread, ConversationTurn::new(Speaker::User, user_text, now))
            .await?;
        self.store
            .append_turn(&thread, ConversationTurn::new(Speaker::Assistant, assistant_text, now))
            .await?;

        let group = scope.group();
        if let Some(group) = &group {
            let max = self.config.max_turn_chars;
            self.store
                .append_turn(group, ConversationTurn::new(Speaker::User, truncate_chars(user_text, max), now))
                .await?;
            self.store
                .append_turn(
                    group,
                    ConversationTurn::new(Speaker::Assistant, truncate_chars(assistant_text, max), now),
                )
                .await?;
        }

        match self.embed(user_text).await {
            Ok(embedding) => self.store.store_interaction(&thread, user_text, embedding).await?,
            Err(e) => warn!(user_id = %scope.user_id, "Skipping recall record, embedding failed: {e}"),
        }

        match self.refresh_summary(&thread).await {
            Ok(Some(_)) => {
                if let Err(e) = self.refresh_profile(scope).await {
                    warn!(user_id = %scope.user_id, "User profile not updated: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(scope = %thread.key(), "Rolling summary not updated: {e}"),
        }
        if let Some(group) = &group
            && let Err(e) = self.refresh_summary(group).await
        {
            warn!(scope = %group.key(), "Rolling summary not updated: {e}");
        }

        debug!(user_id = %scope.user_id, thread_id = %scope.thread_id, "Exchange recorded");
        Ok(())
    }

    /// The most recent `limit` turns of a scope, oldest first.
    pub async fn recent_turns(&self, scope: &StoreScope, limit: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        self.store.recent_turns(scope, limit).await
    }

    pub async fn latest_summary(&self, scope: &StoreScope) -> Result<Option<RollingSummary>, MemoryError> {
        self.store.latest_summary(scope).await
    }

    /// The user's profile, unless profiles are turned off.
    pub async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, MemoryError> {
        if self.config.profile_max_chars == 0 {
            return Ok(None);
        }
        self.store.user_profile(user_id).await
    }

    /// Stored interactions of the thread most similar to `query`.
    pub async fn recall(&self, scope: &ThreadScope, query: &str) -> Result<Vec<RecalledTurn>, MemoryError> {
        if query.trim().is_empty() || self.config.recall_limit == 0 {
            return Ok(Vec::new());
        }
        let embedding = self
            .embed(query)
            .await
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;
        self.store
            .nearest(&scope.thread(), &embedding, self.config.recall_limit, self.config.recall_threshold)
            .await
    }

    /// Embedding of `text`, read through the embedding cache.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let key = content_hash(text);
        self.embeddings
            .get_or_try_insert_with(&key, || async {
                let response = self
                    .provider
                    .embed(EmbeddingRequest {
                        model: self.embedding_model.clone(),
                        inputs: vec![text.to_string()],
                    })
                    .await?;
                response
                    .embeddings
                    .into_iter()
                    .next()
                    .ok_or_else(|| ProviderError::MalformedResponse("empty embedding response".into()))
            })
            .await
    }

    /// Summarize the turns not yet covered by the latest summary once there
    /// are at least `summary_every` of them.
    async fn refresh_summary(&self, scope: &StoreScope) -> lantern_core::Result<Option<RollingSummary>> {
        let count = self.store.turn_count(scope).await?;
        let previous = self.store.latest_summary(scope).await?;
        let covered = previous.as_ref().map_or(0, |s| s.covered_turns);
        if count.saturating_sub(covered) < self.config.summary_every {
            return Ok(None);
        }

        let uncovered = self.store.turns_after(scope, covered).await?;
        let transcript = uncovered
            .iter()
            .map(|t| format!("{}: {}", t.speaker.as_str(), t.text))
            .collect::<Vec<_>>()
            .join("\n");
        let previous_text = previous.as_ref().map_or("(none)", |s| s.text.as_str());
        let max_chars = self.config.summary_max_chars;

        let request = ProviderRequest::new(
            self.summary_model.clone(),
            vec![
                Message::system(format!(
                    "You keep the long-term memory of a conversation. Merge the previous summary and \
                     the new turns into a single summary of at most {max_chars} characters. \
                     Reply with the summary only."
                )),
                Message::user(format!("Previous summary:\n{previous_text}\n\nNew turns:\n{transcript}")),
            ],
        )
        .with_temperature(0.0)
        .with_max_tokens(256);

        let response = self.provider.complete(request).await?;
        let text = truncate_chars(response.message.content.trim(), max_chars);
        if text.is_empty() {
            warn!(scope = %scope.key(), "Summary model returned nothing");
            return Ok(None);
        }

        let summary = RollingSummary {
            text,
            covered_turns: count,
            created_at: Utc::now(),
        };
        self.store.store_summary(scope, summary.clone()).await?;
        info!(scope = %scope.key(), covered = count, "Rolling summary updated");
        Ok(Some(summary))
    }

    /// Fold the user's messages from the last summary window into their
    /// profile.
    async fn refresh_profile(&self, scope: &ThreadScope) -> lantern_core::Result<Option<UserProfile>> {
        let max_chars = self.config.profile_max_chars;
        if max_chars == 0 {
            return Ok(None);
        }

        let window = self.store.recent_turns(&scope.thread(), self.config.summary_every).await?;
        let said = window
            .iter()
            .filter(|t| t.speaker == Speaker::User)
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if said.trim().is_empty() {
            return Ok(None);
        }

        let previous = self.store.user_profile(&scope.user_id).await?;
        let previous_text = previous.as_ref().map_or("(none)", |p| p.summary.as_str());

        let request = ProviderRequest::new(
            self.summary_model.clone(),
            vec![
                Message::system(format!(
                    "You maintain the profile of one user: their traits, preferences and recurring \
                     requests. Update the previous profile with what the new messages reveal, in at \
                     most {max_chars} characters. Reply with the profile only."
                )),
                Message::user(format!("Previous profile:\n{previous_text}\n\nNew messages from the user:\n{said}")),
            ],
        )
        .with_temperature(0.0)
        .with_max_tokens(256);

        let response = self.provider.complete(request).await?;
        let text = truncate_chars(response.message.content.trim(), max_chars);
        if text.is_empty() {
            warn!(user_id = %scope.user_id, "Profile model returned nothing");
            return Ok(None);
        }

        let profile = UserProfile {
            user_id: scope.user_id.clone(),
            summary: text,
            updated_at: Utc::now(),
        };
        self.store.store_user_profile(profile.clone()).await?;
        info!(user_id = %scope.user_id, "User profile updated");
        Ok(Some(profile))
    }
}
