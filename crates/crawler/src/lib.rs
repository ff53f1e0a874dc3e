//! Quota-bounded recursive crawling for Lantern.
//!
//! - [`cache::TtlCache`]: capacity-bounded LRU cache whose entries expire
//! - [`quota::QuotaLedger`]: per-identity daily crawl counters
//! - [`fetcher::HttpPageFetcher`]: render-then-static page retrieval
//! - [`crawler::BoundedCrawler`]: depth, link and call limited traversal

pub mod cache;
pub mod quota;
pub mod extract;
pub mod fetcher;
pub mod crawler;

pub use cache::TtlCache;
pub use quota::{DailyCounter, QuotaLedger, QuotaRecord};
pub use fetcher::{HttpPageFetcher, RenderClient};
pub use crawler::BoundedCrawler;
