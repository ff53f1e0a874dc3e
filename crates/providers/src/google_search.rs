//! Google Custom Search JSON API client.
//!
//! Failed requests are retried with exponential backoff (500 ms, 1 s, ...).
//! Results are filtered and re-ranked before truncation:
//! - non-http(s) links and URLs containing an excluded fragment are dropped
//! - priority hosts first, secondary hosts next, everything else last
//!   (stable within each rank)

use async_trait::async_trait;
use lantern_config::SearchConfig;
use lantern_core::error::SearchError;
use lantern_core::search::{SearchEngine, SearchHit};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub struct GoogleSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
    max_results: usize,
    max_retries: u32,
    backoff: Duration,
    excluded: Vec<String>,
    priority: Vec<String>,
    secondary: Vec<String>,
}

impl GoogleSearch {
    /// Build from the `[search]` config section. Requires both an API key and
    /// an engine ID.
    pub fn from_config(config: &SearchConfig) -> Result<Self, SearchError> {
        let (Some(api_key), Some(engine_id)) = (
            config.api_key.as_deref().filter(|k| !k.is_empty()),
            config.engine_id.as_deref().filter(|k| !k.is_empty()),
        ) else {
            return Err(SearchError::NotConfigured(
                "Set GOOGLE_API_KEY and GOOGLE_CSE_ID to enable search".into(),
            ));
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SearchError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
            max_results: config.max_results,
            max_retries: config.max_retries,
            backoff: Duration::from_millis(500),
            excluded: lowercase(&config.excluded_domains),
            priority: lowercase(&config.priority_domains),
            secondary: lowercase(&config.secondary_domains),
        })
    }

    /// Override the first backoff delay.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn request(&self, query: &str) -> Result<Vec<ApiItem>, RequestFailure> {
        let num = self.max_results.clamp(1, 10).to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RequestFailure::Retryable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(RequestFailure::Retryable(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(RequestFailure::Fatal(format!("status {status}")));
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| RequestFailure::Malformed(e.to_string()))?;
        Ok(body.items)
    }

    fn rank(&self, url: &str) -> u8 {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_default();
        if self.priority.iter().any(|d| host_matches(&host, d)) {
            0
        } else if self.secondary.iter().any(|d| host_matches(&host, d)) {
            1
        } else {
            2
        }
    }

    /// Drop unusable hits, rank the rest, keep the best `max_results`.
    fn select(&self, items: Vec<ApiItem>) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = items
            .into_iter()
            .filter(|i| i.link.starts_with("http://") || i.link.starts_with("https://"))
            .filter(|i| {
                let link = i.link.to_lowercase();
                !self.excluded.iter().any(|d| link.contains(d.as_str()))
            })
            .map(|i| SearchHit {
                title: i.title,
                url: i.link,
                snippet: i.snippet,
            })
            .collect();

        hits.sort_by_key(|h| self.rank(&h.url));
        hits.truncate(self.max_results);
        hits
    }
}

#[async_trait]
impl SearchEngine for GoogleSearch {
    fn name(&self) -> &str {
        "google"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let attempts = self.max_retries + 1;
        let mut delay = self.backoff;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.request(query).await {
                Ok(items) => {
                    let hits = self.select(items);
                    debug!(query, attempt, hits = hits.len(), "Search completed");
                    return Ok(hits);
                }
                Err(RequestFailure::Malformed(reason)) => {
                    return Err(SearchError::MalformedResponse(reason));
                }
                Err(RequestFailure::Fatal(reason)) => {
                    return Err(SearchError::Exhausted { attempts: attempt, reason });
                }
                Err(RequestFailure::Retryable(reason)) => {
                    warn!(query, attempt, "Search request failed: {reason}");
                    last_error = reason;
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(SearchError::Exhausted {
            attempts,
            reason: last_error,
        })
    }
}

enum RequestFailure {
    Retryable(String),
    Fatal(String),
    Malformed(String),
}

/// `host` equals `domain` or is a subdomain of it. A leading dot on
/// `domain` is ignored.
fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    !domain.is_empty()
        && (host == domain || host.strip_suffix(domain).is_some_and(|rest| rest.ends_with('.')))
}

fn lowercase(list: &[String]) -> Vec<String> {
    list.iter().map(|s| s.to_lowercase()).collect()
}

// --- Custom Search API types ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    items: Vec<ApiItem>,
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}
