//! Vector similarity for interaction recall.
//!
//! Pure-Rust cosine similarity plus a ranking helper shared by every store.

use chrono::{DateTime, Utc};
use lantern_core::memory::RecalledTurn;

/// An interaction as persisted: its text, embedding and creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredInteraction {
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank interactions by similarity to `query`, best first.
///
/// Interactions below `min_similarity` are dropped. Ties keep the newer
/// interaction first.
pub fn nearest_interactions<'a, I>(
    interactions: I,
    query: &[f32],
    limit: usize,
    min_similarity: f32,
) -> Vec<RecalledTurn>
where
    I: IntoIterator<Item = &'a StoredInteraction>,
{
    let mut scored: Vec<RecalledTurn> = interactions
        .into_iter()
        .filter_map(|i| {
            let similarity = cosine_similarity(&i.embedding, query);
            (similarity >= min_similarity).then(|| RecalledTurn {
                text: i.text.clone(),
                similarity,
                created_at: i.created_at,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    scored.truncate(limit);
    scored
}
