//! SearchEngine trait: the abstraction over a web search API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::SearchError;

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// The engine name (e.g., "google").
    fn name(&self) -> &str;

    /// Run a query and return ranked hits, best first.
    async fn search(&self, query: &str) -> std::result::Result<Vec<SearchHit>, SearchError>;
}
