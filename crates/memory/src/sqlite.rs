//! SQLite store.
//!
//! One database file. Three tables are partitioned by the scope key:
//! - `turns`: the append-only conversation log
//! - `summaries`: rolling summaries, newest wins
//! - `interactions`: recallable exchanges with their embedding as a
//!   little-endian f32 blob
//!
//! `user_profiles` holds one row per user, upserted in place.
//!
//! Recall loads a scope's interactions and ranks them in process.

use crate::vector::{self, StoredInteraction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lantern_core::error::MemoryError;
use lantern_core::memory::{MemoryStore, RecalledTurn, RollingSummary, StoreScope, UserProfile};
use lantern_core::message::{ConversationTurn, Speaker};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite memory store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        let statements = [
            (
                "turns table",
                r#"
                CREATE TABLE IF NOT EXISTS turns (
                    iid        INTEGER PRIMARY KEY AUTOINCREMENT,
                    scope_key  TEXT NOT NULL,
                    speaker    TEXT NOT NULL,
                    text       TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "turns index",
                "CREATE INDEX IF NOT EXISTS idx_turns_scope ON turns(scope_key, iid)",
            ),
            (
                "summaries table",
                r#"
                CREATE TABLE IF NOT EXISTS summaries (
                    iid           INTEGER PRIMARY KEY AUTOINCREMENT,
                    scope_key     TEXT NOT NULL,
                    text          TEXT NOT NULL,
                    covered_turns INTEGER NOT NULL,
                    created_at    TEXT NOT NULL
                )
                "#,
            ),
            (
                "summaries index",
                "CREATE INDEX IF NOT EXISTS idx_summaries_scope ON summaries(scope_key, iid)",
            ),
            (
                "interactions table",
                r#"
                CREATE TABLE IF NOT EXISTS interactions (
                    iid        INTEGER PRIMARY KEY AUTOINCREMENT,
                    scope_key  TEXT NOT NULL,
                    text       TEXT NOT NULL,
                    embedding  BLOB NOT NULL,
                    created_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "interactions index",
                "CREATE INDEX IF NOT EXISTS idx_interactions_scope ON interactions(scope_key)",
            ),
            (
                "user_profiles table",
                r#"
                CREATE TABLE IF NOT EXISTS user_profiles (
                    user_id    TEXT PRIMARY KEY,
                    summary    TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| MemoryError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn text_column(row: &SqliteRow, column: &str) -> Result<String, MemoryError> {
        row.try_get(column)
            .map_err(|e| MemoryError::QueryFailed(format!("{column} column: {e}")))
    }

    fn timestamp_column(row: &SqliteRow) -> Result<DateTime<Utc>, MemoryError> {
        Self::timestamp_named(row, "created_at")
    }

    fn timestamp_named(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, MemoryError> {
        let raw = Self::text_column(row, column)?;
        Ok(DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()))
    }

    fn row_to_turn(row: &SqliteRow) -> Result<ConversationTurn, MemoryError> {
        let speaker = Self::text_column(row, "speaker")?;
        let speaker = Speaker::from_str(&speaker).map_err(MemoryError::QueryFailed)?;
        Ok(ConversationTurn::new(
            speaker,
            Self::text_column(row, "text")?,
            Self::timestamp_column(row)?,
        ))
    }

    fn row_to_interaction(row: &SqliteRow) -> Result<StoredInteraction, MemoryError> {
        let blob: Vec<u8> = row
            .try_get("embedding")
            .map_err(|e| MemoryError::QueryFailed(format!("embedding column: {e}")))?;
        Ok(StoredInteraction {
            text: Self::text_column(row, "text")?,
            embedding: blob_to_embedding(&blob),
            created_at: Self::timestamp_column(row)?,
        })
    }
}

/// Serialize an embedding vector to bytes.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[async_trait]
impl MemoryStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append_turn(&self, scope: &StoreScope, turn: ConversationTurn) -> Result<(), MemoryError> {
        sqlx::query("INSERT INTO turns (scope_key, speaker, text, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(scope.key())
            .bind(turn.speaker.as_str())
            .bind(&turn.text)
            .bind(turn.timestamp.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("INSERT turn failed: {e}")))?;
        Ok(())
    }

    async fn recent_turns(&self, scope: &StoreScope, limit: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        let rows = sqlx::query(
            "SELECT speaker, text, created_at FROM turns WHERE scope_key = ?1 ORDER BY iid DESC LIMIT ?2",
        )
        .bind(scope.key())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("recent turns: {e}")))?;

        let mut turns = rows
            .iter()
            .map(Self::row_to_turn)
            .collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn turns_after(&self, scope: &StoreScope, offset: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        let rows = sqlx::query(
            "SELECT speaker, text, created_at FROM turns WHERE scope_key = ?1 ORDER BY iid ASC LIMIT -1 OFFSET ?2",
        )
        .bind(scope.key())
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("turns after offset: {e}")))?;

        rows.iter().map(Self::row_to_turn).collect()
    }

    async fn turn_count(&self, scope: &StoreScope) -> Result<usize, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM turns WHERE scope_key = ?1")
            .bind(scope.key())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("COUNT: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| MemoryError::QueryFailed(format!("cnt column: {e}")))?;
        Ok(cnt as usize)
    }

    async fn latest_summary(&self, scope: &StoreScope) -> Result<Option<RollingSummary>, MemoryError> {
        let row = sqlx::query(
            "SELECT text, covered_turns, created_at FROM summaries WHERE scope_key = ?1 ORDER BY iid DESC LIMIT 1",
        )
        .bind(scope.key())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("latest summary: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let covered: i64 = row
            .try_get("covered_turns")
            .map_err(|e| MemoryError::QueryFailed(format!("covered_turns column: {e}")))?;
        Ok(Some(RollingSummary {
            text: Self::text_column(&row, "text")?,
            covered_turns: covered.max(0) as usize,
            created_at: Self::timestamp_column(&row)?,
        }))
    }

    async fn store_summary(&self, scope: &StoreScope, summary: RollingSummary) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO summaries (scope_key, text, covered_turns, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(scope.key())
        .bind(&summary.text)
        .bind(summary.covered_turns as i64)
        .bind(summary.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT summary failed: {e}")))?;

        debug!(scope = %scope.key(), covered = summary.covered_turns, "Stored rolling summary");
        Ok(())
    }

    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, MemoryError> {
        let row = sqlx::query("SELECT summary, updated_at FROM user_profiles WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("user profile: {e}")))?;

        row.map(|row| {
            Ok(UserProfile {
                user_id: user_id.to_string(),
                summary: Self::text_column(&row, "summary")?,
                updated_at: Self::timestamp_named(&row, "updated_at")?,
            })
        })
        .transpose()
    }

    async fn store_user_profile(&self, profile: UserProfile) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO user_profiles (user_id, summary, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id) DO UPDATE SET summary = excluded.summary, updated_at = excluded.updated_at",
        )
        .bind(&profile.user_id)
        .bind(&profile.summary)
        .bind(profile.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("UPSERT user profile failed: {e}")))?;

        debug!(user_id = %profile.user_id, "Stored user profile");
        Ok(())
    }

    async fn store_interaction(
        &self,
        scope: &StoreScope,
        text: &str,
        embedding: Vec<f32>,
    ) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO interactions (scope_key, text, embedding, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(scope.key())
        .bind(text)
        .bind(embedding_to_blob(&embedding))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT interaction failed: {e}")))?;
        Ok(())
    }

    async fn nearest(
        &self,
        scope: &StoreScope,
        embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<RecalledTurn>, MemoryError> {
        let rows = sqlx::query("SELECT text, embedding, created_at FROM interactions WHERE scope_key = ?1")
            .bind(scope.key())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("interactions: {e}")))?;

        let stored = rows
            .iter()
            .map(Self::row_to_interaction)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(vector::nearest_interactions(&stored, embedding, limit, min_similarity))
    }
}
