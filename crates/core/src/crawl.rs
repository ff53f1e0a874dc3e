//! Crawl domain types: budgets, callers, and the nodes a traversal yields.

use serde::{Deserialize, Serialize};

/// One fetched page of a traversal. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlNode {
    pub url: String,
    pub depth: u32,
    pub content: String,
    pub outbound_links: Vec<String>,
}

/// Limits applied to one crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlBudget {
    /// Deepest level expanded; the seed is depth 0
    pub max_depth: u32,

    /// Outbound links followed per page
    pub max_links_per_page: usize,

    /// Fetches allowed in a single traversal
    pub max_calls_per_request: u32,

    /// Fetches allowed per identity per calendar day
    pub max_calls_per_day: u32,
}

impl CrawlBudget {
    pub const STANDARD: CrawlBudget = CrawlBudget {
        max_depth: 2,
        max_links_per_page: 10,
        max_calls_per_request: 10,
        max_calls_per_day: 5,
    };

    pub const ELEVATED: CrawlBudget = CrawlBudget {
        max_depth: 4,
        max_links_per_page: 30,
        max_calls_per_request: 30,
        max_calls_per_day: 50,
    };

    /// The same budget restricted to the seed page only.
    pub fn seed_only(self) -> Self {
        Self {
            max_depth: 0,
            max_calls_per_request: self.max_calls_per_request.min(1),
            ..self
        }
    }
}

/// Which budget profile an identity is entitled to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTier {
    #[default]
    Standard,
    Elevated,
}

/// The identity a crawl is charged to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub tier: AccessTier,
}

impl Caller {
    pub fn standard(id: impl Into<String>) -> Self {
        Self { id: id.into(), tier: AccessTier::Standard }
    }

    pub fn elevated(id: impl Into<String>) -> Self {
        Self { id: id.into(), tier: AccessTier::Elevated }
    }
}
