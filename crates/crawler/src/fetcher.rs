//! HTTP page fetcher.
//!
//! Two stages, tried in order:
//! 1. **Render**: a headless-browser service returns the fully rendered HTML
//!    (`POST {endpoint}` with `{"url", "timeout_ms"}`). Skipped when no
//!    endpoint is configured.
//! 2. **Static**: a plain GET with a fixed user agent.
//!
//! A stage is accepted only when its extracted text passes the content gate.
//! Every failure degrades to an empty page.

use async_trait::async_trait;
use lantern_config::FetcherConfig;
use lantern_core::error::FetchError;
use lantern_core::fetch::{FetchedPage, PageFetcher};
use std::time::Duration;
use tracing::{debug, warn};

use crate::extract::{self, Extracted};

/// Client for a headless render service.
pub struct RenderClient {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl RenderClient {
    pub fn new(endpoint: impl Into<String>, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
            timeout,
        }
    }

    /// Rendered HTML of `url`.
    pub async fn render(&self, url: &str) -> Result<String, FetchError> {
        let body = serde_json::json!({
            "url": url,
            "timeout_ms": self.timeout.as_millis() as u64,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(url, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| request_error(url, self.timeout, e))
    }
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
    renderer: Option<RenderClient>,
    request_timeout: Duration,
    min_content_chars: usize,
}

impl HttpPageFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        let renderer = config.render_endpoint.as_ref().map(|endpoint| {
            RenderClient::new(
                endpoint.clone(),
                client.clone(),
                Duration::from_secs(config.render_timeout_secs),
            )
        });

        Ok(Self {
            client,
            renderer,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            min_content_chars: config.min_content_chars,
        })
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    async fn fetch_static(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| request_error(url, self.request_timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| request_error(url, self.request_timeout, e))
    }

    fn accept(&self, url: &str, extracted: &Extracted) -> Result<(), FetchError> {
        if extract::passes_gate(&extracted.text, self.min_content_chars) {
            Ok(())
        } else {
            Err(FetchError::BelowGate {
                url: url.to_string(),
                chars: extract::content_chars(&extracted.text),
            })
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> FetchedPage {
        if let Some(renderer) = &self.renderer {
            match renderer.render(url).await {
                Ok(html) => {
                    let extracted = extract::extract(&html);
                    match self.accept(url, &extracted) {
                        Ok(()) => {
                            debug!(url, chars = extracted.text.len(), stage = "render", "Page fetched");
                            return FetchedPage {
                                text: extracted.text,
                                links: extracted.links,
                            };
                        }
                        Err(e) => debug!(url, "Render stage rejected: {e}"),
                    }
                }
                Err(e) => warn!(url, "Render stage failed, falling back to static fetch: {e}"),
            }
        }

        match self.fetch_static(url).await {
            Ok(html) => {
                let extracted = extract::extract(&html);
                match self.accept(url, &extracted) {
                    Ok(()) => {
                        debug!(url, chars = extracted.text.len(), stage = "static", "Page fetched");
                        FetchedPage {
                            text: extracted.text,
                            links: extracted.links,
                        }
                    }
                    Err(e) => {
                        debug!(url, "Static stage rejected: {e}");
                        FetchedPage {
                            text: String::new(),
                            links: extracted.links,
                        }
                    }
                }
            }
            Err(e) => {
                warn!(url, "Static fetch failed: {e}");
                FetchedPage::empty()
            }
        }
    }
}

fn request_error(url: &str, timeout: Duration, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn article(words: usize) -> String {
        format!(
            "<html><head><title>Report</title></head><body><article>{}</article>\
             <a href=\"https://next.test/a\">a</a></body></html>",
            "lorem ipsum ".repeat(words)
        )
    }

    fn config(render: Option<String>) -> FetcherConfig {
        FetcherConfig {
            request_timeout_secs: 1,
            render_timeout_secs: 1,
            render_endpoint: render,
            ..FetcherConfig::default()
        }
    }

    #[tokio::test]
    async fn static_stage_returns_text_and_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article(20)))
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(&config(None)).unwrap();
        let page = fetcher.fetch(&format!("{}/page", server.uri())).await;

        assert!(page.text.starts_with("Report"));
        assert!(page.text.contains("lorem ipsum"));
        assert_eq!(page.links, vec!["https://next.test/a"]);
    }

    #[tokio::test]
    async fn below_gate_keeps_links_but_no_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/thin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article(1)))
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(&config(None)).unwrap();
        let page = fetcher.fetch(&format!("{}/thin", server.uri())).await;

        assert!(page.text.is_empty());
        assert_eq!(page.links, vec!["https://next.test/a"]);
    }

    #[tokio::test]
    async fn non_success_status_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(&config(None)).unwrap();
        assert_eq!(fetcher.fetch(&format!("{}/missing", server.uri())).await, FetchedPage::empty());
    }

    #[tokio::test]
    async fn timeout_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(article(20))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(&config(None)).unwrap();
        let page = fetcher.fetch(&format!("{}/slow", server.uri())).await;
        assert!(!page.has_content());
        assert!(page.links.is_empty());
    }

    #[tokio::test]
    async fn render_stage_preferred_when_it_passes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article(30)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article(20)))
            .expect(0)
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(&config(Some(format!("{}/render", server.uri())))).unwrap();
        assert!(fetcher.has_renderer());
        let page = fetcher.fetch(&format!("{}/page", server.uri())).await;
        assert!(page.has_content());
    }

    #[tokio::test]
    async fn render_failure_falls_back_to_static() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article(20)))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(&config(Some(format!("{}/render", server.uri())))).unwrap();
        let page = fetcher.fetch(&format!("{}/page", server.uri())).await;
        assert!(page.text.contains("lorem ipsum"));
    }

    #[tokio::test]
    async fn thin_render_falls_back_to_static() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>loading…</body></html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article(20)))
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(&config(Some(format!("{}/render", server.uri())))).unwrap();
        let page = fetcher.fetch(&format!("{}/page", server.uri())).await;
        assert!(page.text.contains("lorem ipsum"));
    }
}
