//! Wiring: configuration in, ready-to-use collaborators out.

use lantern_agent::{ConversationMemory, GroundedSummarizer, MessagePipeline};
use lantern_config::AppConfig;
use lantern_core::clock::{Clock, SystemClock};
use lantern_core::error::SearchError;
use lantern_core::event::EventBus;
use lantern_core::memory::MemoryStore;
use lantern_core::provider::Provider;
use lantern_crawler::{BoundedCrawler, HttpPageFetcher, QuotaLedger, TtlCache};
use lantern_memory::{InMemoryStore, SqliteStore};
use lantern_providers::{GoogleSearch, OpenAiCompatProvider};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error>;

pub struct Runtime {
    pub config: AppConfig,
    pub provider: Arc<dyn Provider>,
    pub crawler: Arc<BoundedCrawler>,
    pub event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl Runtime {
    pub fn new(config: AppConfig) -> Result<Self, BoxError> {
        let provider = OpenAiCompatProvider::from_config(&config.provider).map_err(|e| {
            format!(
                "{e}. Set LANTERN_API_KEY or OPENAI_API_KEY, or add provider.api_key to {}",
                AppConfig::config_dir().join("config.toml").display()
            )
        })?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let event_bus = Arc::new(EventBus::default());
        let fetcher = HttpPageFetcher::new(&config.fetcher)?;
        if !fetcher.has_renderer() {
            info!("No render endpoint configured, pages are fetched statically");
        }

        let crawler = BoundedCrawler::new(
            Arc::new(fetcher),
            Arc::new(QuotaLedger::from_config(&config.crawl, clock.clone())),
            Arc::new(TtlCache::from_policy("crawl", &config.cache.crawl)),
        )
        .with_events(event_bus.clone());

        Ok(Self {
            config,
            provider: Arc::new(provider),
            crawler: Arc::new(crawler),
            event_bus,
            clock,
        })
    }

    pub fn summarizer(&self) -> GroundedSummarizer {
        GroundedSummarizer::new(self.provider.clone(), self.config.provider.model.clone())
            .with_min_content_chars(self.config.fetcher.min_content_chars)
    }

    async fn memory_store(&self) -> Result<Arc<dyn MemoryStore>, BoxError> {
        match self.config.memory.backend.as_str() {
            "sqlite" => {
                let path = self.config.memory.database_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let store = SqliteStore::new(&path.to_string_lossy()).await?;
                Ok(Arc::new(store))
            }
            "in_memory" => Ok(Arc::new(InMemoryStore::new())),
            other => Err(format!("Unknown memory backend '{other}' (expected \"sqlite\" or \"in_memory\")").into()),
        }
    }

    pub async fn pipeline(&self) -> Result<MessagePipeline, BoxError> {
        let store = self.memory_store().await?;
        let memory = ConversationMemory::new(
            store,
            self.provider.clone(),
            self.config.provider.model.clone(),
            self.config.provider.embedding_model.clone(),
            self.config.memory.clone(),
        )
        .with_embedding_cache(Arc::new(TtlCache::from_policy("embedding", &self.config.cache.embedding)));

        let pipeline = MessagePipeline::new(
            &self.config,
            self.provider.clone(),
            self.crawler.clone(),
            Arc::new(memory),
            self.clock.clone(),
            StdRng::from_os_rng(),
            self.event_bus.clone(),
        );

        match GoogleSearch::from_config(&self.config.search) {
            Ok(search) => Ok(pipeline.with_search(Arc::new(search))),
            Err(SearchError::NotConfigured(reason)) => {
                info!("Web search disabled: {reason}");
                Ok(pipeline)
            }
            Err(e) => {
                warn!("Web search disabled: {e}");
                Ok(pipeline)
            }
        }
    }
}
