//! Bounded recursive crawler.
//!
//! Depth-first expansion from a seed URL over an explicit work stack. All
//! traversal state (visited set, call counter, accumulated nodes) lives in a
//! [`Traversal`] owned by one `crawl()` call. The quota ledger is the only
//! state shared between traversals.
//!
//! Per visited item, in order:
//! 1. already visited in this traversal → skip (no fetch, no charge)
//! 2. cache hit → emit the cached subtree (minus pages already visited),
//!    no charge, no further expansion
//! 3. charge one call to the request budget and one to the daily ledger;
//!    if either is exhausted the traversal stops with what it has
//! 4. fetch, filter links, mark visited, push children while
//!    `depth + 1 <= max_depth`
//!
//! Once everything pushed beneath a fetched node has been processed, the node
//! and the nodes gathered under it are cached as one subtree. A traversal cut
//! short by a budget never caches the subtrees it left unfinished.

use chrono::Utc;
use lantern_core::crawl::{Caller, CrawlBudget, CrawlNode};
use lantern_core::event::{DomainEvent, EventBus, QuotaScope};
use lantern_core::fetch::PageFetcher;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::cache::TtlCache;
use crate::quota::QuotaLedger;

pub struct BoundedCrawler {
    fetcher: Arc<dyn PageFetcher>,
    ledger: Arc<QuotaLedger>,
    cache: Arc<TtlCache<Vec<CrawlNode>>>,
    events: Option<Arc<EventBus>>,
}

enum Step {
    Visit { url: String, depth: u32 },
    /// Everything beneath the node at `nodes[start]` has been processed.
    Close { key: String, start: usize },
}

/// State of one traversal.
struct Traversal {
    stack: Vec<Step>,
    visited: HashSet<String>,
    calls: u32,
    nodes: Vec<CrawlNode>,
    stopped_by: Option<QuotaScope>,
}

impl Traversal {
    fn new(seed: String) -> Self {
        Self {
            stack: vec![Step::Visit { url: seed, depth: 0 }],
            visited: HashSet::new(),
            calls: 0,
            nodes: Vec::new(),
            stopped_by: None,
        }
    }
}

impl BoundedCrawler {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        ledger: Arc<QuotaLedger>,
        cache: Arc<TtlCache<Vec<CrawlNode>>>,
    ) -> Self {
        Self {
            fetcher,
            ledger,
            cache,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Crawl from `seed_url` within `budget`, charging fetches to `caller`.
    ///
    /// Returns the nodes in visit order. Empty when the caller has no quota
    /// left today, the seed is not an http(s) URL, or no node produced content.
    pub async fn crawl(&self, seed_url: &str, caller: &Caller, budget: &CrawlBudget) -> Vec<CrawlNode> {
        if self.ledger.remaining(caller) == 0 {
            info!(caller = %caller.id, "Daily crawl quota exhausted");
            self.publish(DomainEvent::QuotaExhausted {
                caller_id: caller.id.clone(),
                scope: QuotaScope::Day,
                timestamp: Utc::now(),
            });
            return Vec::new();
        }

        let Some(seed) = normalize_link(seed_url) else {
            debug!(seed_url, "Seed is not an absolute http(s) URL");
            return Vec::new();
        };

        let mut t = Traversal::new(seed.clone());

        while let Some(step) = t.stack.pop() {
            let (url, depth) = match step {
                Step::Visit { url, depth } => (url, depth),
                Step::Close { key, start } => {
                    let subtree = &t.nodes[start..];
                    if subtree.iter().any(|n| !n.content.is_empty()) {
                        self.cache.insert(key, subtree.to_vec());
                    }
                    continue;
                }
            };
            if t.visited.contains(&url) {
                continue;
            }

            let key = cache_key(&url, depth, budget);
            if let Some(subtree) = self.cache.get(&key) {
                debug!(url = %url, depth, nodes = subtree.len(), "Crawl cache hit");
                for node in subtree {
                    if t.visited.insert(node.url.clone()) {
                        t.nodes.push(node);
                    }
                }
                continue;
            }

            if t.calls >= budget.max_calls_per_request {
                t.stopped_by = Some(QuotaScope::Request);
                break;
            }
            if !self.ledger.consume(caller) {
                t.stopped_by = Some(QuotaScope::Day);
                break;
            }
            t.calls += 1;

            let page = self.fetcher.fetch(&url).await;
            let outbound_links = filter_links(&page.links, budget.max_links_per_page);
            debug!(
                url = %url,
                depth,
                chars = page.text.len(),
                links = outbound_links.len(),
                "Crawled page"
            );

            t.visited.insert(url.clone());
            t.stack.push(Step::Close {
                key,
                start: t.nodes.len(),
            });
            if depth < budget.max_depth {
                for link in outbound_links.iter().rev() {
                    t.stack.push(Step::Visit {
                        url: link.clone(),
                        depth: depth + 1,
                    });
                }
            }

            t.nodes.push(CrawlNode {
                url,
                depth,
                content: page.text,
                outbound_links,
            });
        }

        if let Some(scope) = t.stopped_by {
            info!(caller = %caller.id, ?scope, calls = t.calls, "Crawl stopped by budget");
            self.publish(DomainEvent::QuotaExhausted {
                caller_id: caller.id.clone(),
                scope,
                timestamp: Utc::now(),
            });
        }

        if t.nodes.iter().all(|n| n.content.is_empty()) {
            info!(seed = %seed, fetches = t.calls, "Crawl produced no content");
            t.nodes.clear();
        }

        info!(
            seed = %seed,
            caller = %caller.id,
            nodes = t.nodes.len(),
            fetches = t.calls,
            "Crawl finished"
        );
        self.publish(DomainEvent::CrawlCompleted {
            seed_url: seed,
            caller_id: caller.id.clone(),
            nodes: t.nodes.len(),
            fetches: t.calls,
            timestamp: Utc::now(),
        });

        t.nodes
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

/// `(url, depth)`, qualified by the budget shape so a shallow crawl never
/// answers for a deeper one.
fn cache_key(url: &str, depth: u32, budget: &CrawlBudget) -> String {
    format!("{url}|{depth}|{}|{}", budget.max_depth, budget.max_links_per_page)
}

/// Absolute http(s) URL with the fragment removed, or `None`.
pub fn normalize_link(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url.into())
}

/// Valid absolute links, de-duplicated, in document order, capped.
fn filter_links(raw: &[String], max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|l| normalize_link(l))
        .filter(|l| seen.insert(l.clone()))
        .take(max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{FixedOffset, TimeZone};
    use lantern_core::clock::ManualClock;
    use lantern_core::fetch::FetchedPage;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves a fixed site map and records every fetch.
    struct SiteFetcher {
        pages: HashMap<String, FetchedPage>,
        fetched: Mutex<Vec<String>>,
    }

    impl SiteFetcher {
        fn new(site: Vec<(&str, &str, Vec<&str>)>) -> Self {
            let pages = site
                .into_iter()
                .map(|(url, text, links)| {
                    (
                        url.to_string(),
                        FetchedPage {
                            text: text.to_string(),
                            links: links.iter().map(|l| l.to_string()).collect(),
                        },
                    )
                })
                .collect();
            Self {
                pages,
                fetched: Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for SiteFetcher {
        async fn fetch(&self, url: &str) -> FetchedPage {
            self.fetched.lock().unwrap().push(url.to_string());
            self.pages.get(url).cloned().unwrap_or_default()
        }
    }

    fn budget(max_depth: u32, max_links: usize, max_calls: u32) -> CrawlBudget {
        CrawlBudget {
            max_depth,
            max_links_per_page: max_links,
            max_calls_per_request: max_calls,
            max_calls_per_day: 50,
        }
    }

    fn crawler_for(fetcher: Arc<SiteFetcher>, daily: u32) -> BoundedCrawler {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap()));
        let limits = CrawlBudget {
            max_calls_per_day: daily,
            ..CrawlBudget::STANDARD
        };
        let ledger = Arc::new(QuotaLedger::new(
            &limits,
            &CrawlBudget::ELEVATED,
            clock,
            FixedOffset::east_opt(9 * 3600).unwrap(),
        ));
        let cache = Arc::new(TtlCache::new("crawl", 256, Duration::from_secs(600)));
        BoundedCrawler::new(fetcher, ledger, cache)
    }

    #[tokio::test]
    async fn seed_with_three_links_depth_one_two_links_fetches_three() {
        let site = Arc::new(SiteFetcher::new(vec![
            ("https://s.test/", "seed", vec!["https://s.test/a", "https://s.test/b", "https://s.test/c"]),
            ("https://s.test/a", "page a", vec!["https://s.test/a1"]),
            ("https://s.test/b", "page b", vec![]),
            ("https://s.test/c", "page c", vec![]),
        ]));
        let crawler = crawler_for(site.clone(), 50);

        let nodes = crawler
            .crawl("https://s.test/", &Caller::standard("u1"), &budget(1, 2, 10))
            .await;

        assert_eq!(site.fetched(), vec!["https://s.test/", "https://s.test/a", "https://s.test/b"]);
        let urls: Vec<_> = nodes.iter().map(|n| (n.url.as_str(), n.depth)).collect();
        assert_eq!(urls, vec![("https://s.test/", 0), ("https://s.test/a", 1), ("https://s.test/b", 1)]);
        assert_eq!(nodes[0].outbound_links.len(), 2);
    }

    #[tokio::test]
    async fn fetches_never_exceed_request_budget() {
        let links: Vec<String> = (0..20).map(|i| format!("https://s.test/{i}")).collect();
        let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
        let site = Arc::new(SiteFetcher::new(vec![("https://s.test/", "seed", link_refs)]));
        let crawler = crawler_for(site.clone(), 50);

        crawler
            .crawl("https://s.test/", &Caller::standard("u1"), &budget(3, 30, 4))
            .await;
        assert_eq!(site.fetched().len(), 4);
    }

    #[tokio::test]
    async fn cycles_fetch_each_page_once() {
        let site = Arc::new(SiteFetcher::new(vec![
            ("https://s.test/a", "page a", vec!["https://s.test/b", "https://s.test/a"]),
            ("https://s.test/b", "page b", vec!["https://s.test/a"]),
        ]));
        let crawler = crawler_for(site.clone(), 50);

        let nodes = crawler
            .crawl("https://s.test/a", &Caller::standard("u1"), &budget(4, 10, 30))
            .await;

        assert_eq!(site.fetched(), vec!["https://s.test/a", "https://s.test/b"]);
        assert_eq!(nodes.len(), 2);
    }

    #[tokio::test]
    async fn daily_quota_stops_traversal_and_keeps_partial_result() {
        let site = Arc::new(SiteFetcher::new(vec![
            ("https://s.test/", "seed", vec!["https://s.test/a", "https://s.test/b"]),
            ("https://s.test/a", "page a", vec![]),
            ("https://s.test/b", "page b", vec![]),
        ]));
        let crawler = crawler_for(site.clone(), 2);
        let caller = Caller::standard("u1");

        let nodes = crawler.crawl("https://s.test/", &caller, &budget(1, 10, 10)).await;
        assert_eq!(nodes.len(), 2);
        assert_eq!(crawler.ledger().remaining(&caller), 0);

        // Nothing left today: returns immediately without fetching
        let before = site.fetched().len();
        assert!(crawler.crawl("https://s.test/b", &caller, &budget(1, 10, 10)).await.is_empty());
        assert_eq!(site.fetched().len(), before);
    }

    #[tokio::test]
    async fn repeat_crawl_serves_the_whole_subtree_from_cache() {
        let site = Arc::new(SiteFetcher::new(vec![
            ("https://s.test/", "seed", vec!["https://s.test/a", "https://s.test/b"]),
            ("https://s.test/a", "page a", vec![]),
            ("https://s.test/b", "page b", vec![]),
        ]));
        let crawler = crawler_for(site.clone(), 50);
        let caller = Caller::elevated("u1");

        let first = crawler.crawl("https://s.test/", &caller, &budget(1, 10, 10)).await;
        let remaining = crawler.ledger().remaining(&caller);
        assert_eq!(site.fetched().len(), 3);

        let second = crawler.crawl("https://s.test/", &caller, &budget(1, 10, 10)).await;
        let urls = |nodes: &[CrawlNode]| nodes.iter().map(|n| n.url.clone()).collect::<Vec<_>>();
        assert_eq!(urls(&second), vec!["https://s.test/", "https://s.test/a", "https://s.test/b"]);
        assert_eq!(urls(&second), urls(&first));
        assert_eq!(site.fetched().len(), 3);
        assert_eq!(crawler.ledger().remaining(&caller), remaining);
    }

    #[tokio::test]
    async fn cached_child_subtree_is_reused_under_a_new_seed() {
        let site = Arc::new(SiteFetcher::new(vec![
            ("https://s.test/a", "page a", vec!["https://s.test/a1"]),
            ("https://s.test/a1", "page a1", vec![]),
            ("https://s.test/", "seed", vec!["https://s.test/a"]),
        ]));
        let crawler = crawler_for(site.clone(), 50);
        let caller = Caller::standard("u1");

        // Crawled as a seed, "a" is cached at depth 0 only
        crawler.crawl("https://s.test/a", &caller, &budget(1, 10, 10)).await;
        assert_eq!(site.fetched().len(), 2);

        let nodes = crawler.crawl("https://s.test/", &caller, &budget(2, 10, 10)).await;
        assert_eq!(nodes.len(), 3);
        assert_eq!(
            site.fetched(),
            vec!["https://s.test/a", "https://s.test/a1", "https://s.test/", "https://s.test/a", "https://s.test/a1"]
        );

        // Now every level is cached
        let again = crawler.crawl("https://s.test/", &caller, &budget(2, 10, 10)).await;
        assert_eq!(again.len(), 3);
        assert_eq!(site.fetched().len(), 5);
    }

    #[tokio::test]
    async fn shallow_crawl_does_not_answer_for_a_deep_one() {
        let site = Arc::new(SiteFetcher::new(vec![
            ("https://s.test/", "seed", vec!["https://s.test/a"]),
            ("https://s.test/a", "page a", vec![]),
        ]));
        let crawler = crawler_for(site.clone(), 50);
        let caller = Caller::standard("u1");

        let seed_only = crawler.crawl("https://s.test/", &caller, &budget(0, 10, 10)).await;
        assert_eq!(seed_only.len(), 1);

        let deep = crawler.crawl("https://s.test/", &caller, &budget(1, 10, 10)).await;
        assert_eq!(deep.len(), 2);
    }

    #[tokio::test]
    async fn subtree_cut_short_by_budget_is_not_cached() {
        let site = Arc::new(SiteFetcher::new(vec![
            ("https://s.test/", "seed", vec!["https://s.test/a", "https://s.test/b"]),
            ("https://s.test/a", "page a", vec![]),
            ("https://s.test/b", "page b", vec![]),
        ]));
        let crawler = crawler_for(site.clone(), 50);
        let caller = Caller::standard("u1");

        let partial = crawler.crawl("https://s.test/", &caller, &budget(1, 10, 2)).await;
        assert_eq!(partial.len(), 2);

        let full = crawler.crawl("https://s.test/", &caller, &budget(1, 10, 10)).await;
        assert_eq!(full.len(), 3);
    }

    #[tokio::test]
    async fn unreachable_seed_yields_empty_and_is_not_cached() {
        let site = Arc::new(SiteFetcher::new(vec![]));
        let crawler = crawler_for(site.clone(), 50);
        let caller = Caller::standard("u1");

        assert!(crawler.crawl("https://down.test/", &caller, &budget(2, 10, 10)).await.is_empty());
        assert!(crawler.crawl("https://down.test/", &caller, &budget(2, 10, 10)).await.is_empty());
        assert_eq!(site.fetched().len(), 2);
    }

    #[tokio::test]
    async fn failed_child_is_an_empty_node() {
        let site = Arc::new(SiteFetcher::new(vec![(
            "https://s.test/",
            "seed",
            vec!["https://gone.test/x"],
        )]));
        let crawler = crawler_for(site, 50);

        let nodes = crawler
            .crawl("https://s.test/", &Caller::standard("u1"), &budget(1, 10, 10))
            .await;
        assert_eq!(nodes.len(), 2);
        assert!(nodes[1].content.is_empty());
    }

    #[tokio::test]
    async fn non_http_seed_is_rejected_without_charge() {
        let site = Arc::new(SiteFetcher::new(vec![]));
        let crawler = crawler_for(site.clone(), 50);
        let caller = Caller::standard("u1");

        assert!(crawler.crawl("ftp://files.test/x", &caller, &budget(1, 10, 10)).await.is_empty());
        assert!(site.fetched().is_empty());
        assert_eq!(crawler.ledger().remaining(&caller), 50);
    }

    #[tokio::test]
    async fn completion_event_is_published() {
        let site = Arc::new(SiteFetcher::new(vec![("https://s.test/", "seed", vec![])]));
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let crawler = crawler_for(site, 50).with_events(bus);

        crawler
            .crawl("https://s.test/", &Caller::standard("u1"), &budget(0, 10, 10))
            .await;

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::CrawlCompleted { nodes, fetches, .. } => {
                assert_eq!(*nodes, 1);
                assert_eq!(*fetches, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn links_are_filtered_deduped_and_capped() {
        let raw: Vec<String> = [
            "https://a.test/x#top",
            "/relative",
            "mailto:someone@a.test",
            "https://a.test/x#bottom",
            "http://b.test/y",
            "https://c.test/z",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        assert_eq!(filter_links(&raw, 2), vec!["https://a.test/x", "http://b.test/y"]);
    }
}
