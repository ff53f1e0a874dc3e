//! PageFetcher trait: retrieval of one URL's readable text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Extracted content of a single page.
///
/// `text` is empty when the page could not be fetched or its content fell
/// below the acceptance gate. `links` may still be populated in the latter
/// case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub text: String,
    pub links: Vec<String>,
}

impl FetchedPage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_content(&self) -> bool {
        !self.text.is_empty()
    }
}

/// Fetches a page. Never fails: every failure degrades to an empty page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchedPage;
}
