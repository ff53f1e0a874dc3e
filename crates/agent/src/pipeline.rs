//! The message pipeline: one inbound chat event in, at most one reply out.
//!
//! Routes, first match wins:
//!
//! | Route | When | Answer |
//! |-------|------|--------|
//! | page | message contains a URL | grounded summary of the crawled page |
//! | silence | "be quiet" style request | acknowledgement, once per cooldown window |
//! | features | "what can you do" | fixed capability description |
//! | search | lookup intent with search hits | grounded summary of the hits, with sources |
//! | chat | everything else | persona reply over the assembled context |
//!
//! Every reply is written back to memory. Failures that cannot be degraded
//! locally end in a single apology; details only reach the log.

use chrono::Utc;
use futures::future::join_all;
use lantern_config::{AppConfig, CrawlConfig, PersonaConfig};
use lantern_core::channel::ChatEvent;
use lantern_core::clock::Clock;
use lantern_core::crawl::{Caller, CrawlBudget};
use lantern_core::event::{DomainEvent, EventBus};
use lantern_core::message::Message;
use lantern_core::provider::{Provider, ProviderRequest};
use lantern_core::search::{SearchEngine, SearchHit};
use lantern_crawler::{BoundedCrawler, TtlCache};
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::context::{ContextAssembler, ConversationAnalyzer};
use crate::conversation::ConversationMemory;
use crate::digest::truncate_chars;
use crate::intent::{extract_urls, Intent, IntentTable};
use crate::intervention::InterventionEngine;
use crate::limits::{BotConversationLimiter, Cooldown};
use crate::summarizer::GroundedSummarizer;

pub const APOLOGY: &str = "Sorry, something went wrong on my side. Please try again in a little while.";
pub const SILENCE_ACK: &str = "Understood. I'll stay quiet here for a while unless someone calls me.";
pub const FEATURES: &str = "I can chat and remember our conversation, summarize a web page when you \
paste its URL, and look things up on the web when you ask me to search or ask a question. \
Say \"be quiet\" and I'll stop joining in on my own for a while.";
pub const COULD_NOT_RETRIEVE: &str = "Sorry, I couldn't retrieve that page.";
pub const NOT_ON_PAGE: &str = "I read the page, but it doesn't seem to answer that.";
pub const NOT_IN_RESULTS: &str = "I searched, but the results didn't give a reliable answer.";

const PAGE_INSTRUCTIONS: &str =
    "Summarize the facts stated on this page in a few sentences. Do not speculate or add outside knowledge.";

const QUERY_PROMPT: &str = "You write web search queries. Turn the user's message into one short search \
query made of keywords only, on a single line, in the user's language. Reply with the query only.";

/// Which route produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Silence,
    Features,
    Page,
    Search,
    Chat,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Silence => "silence",
            Self::Features => "features",
            Self::Page => "page",
            Self::Search => "search",
            Self::Chat => "chat",
        }
    }
}

struct Reply {
    route: Route,
    text: String,
}

impl Reply {
    fn new(route: Route, text: impl Into<String>) -> Self {
        Self {
            route,
            text: text.into(),
        }
    }
}

pub struct MessagePipeline {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    persona: PersonaConfig,
    crawl: CrawlConfig,
    crawler: Arc<BoundedCrawler>,
    search: Option<Arc<dyn SearchEngine>>,
    summarizer: GroundedSummarizer,
    memory: Arc<ConversationMemory>,
    assembler: ContextAssembler,
    intervention: InterventionEngine,
    intents: IntentTable,
    silence: Cooldown,
    bots: BotConversationLimiter,
    event_bus: Arc<EventBus>,
}

impl MessagePipeline {
    /// Wire the pipeline from configuration.
    pub fn new(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        crawler: Arc<BoundedCrawler>,
        memory: Arc<ConversationMemory>,
        clock: Arc<dyn Clock>,
        rng: StdRng,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let model = config.provider.model.clone();

        let mut assembler = ContextAssembler::new(memory.clone(), config.context.clone());
        if config.context.analysis_enabled {
            let cache = Arc::new(TtlCache::from_policy("analysis", &config.cache.summary));
            assembler = assembler.with_analyzer(ConversationAnalyzer::new(provider.clone(), model.clone(), cache));
        }

        Self {
            summarizer: GroundedSummarizer::new(provider.clone(), model.clone())
                .with_min_content_chars(config.fetcher.min_content_chars),
            intervention: InterventionEngine::new(&config.intervention, provider.clone(), model.clone(), rng),
            silence: Cooldown::new(Duration::from_secs(config.limits.cooldown_secs), clock.clone()),
            bots: BotConversationLimiter::from_config(&config.limits, clock, config.crawl.offset()),
            intents: IntentTable::standard(),
            temperature: config.provider.temperature,
            max_tokens: config.provider.max_tokens,
            persona: config.persona.clone(),
            crawl: config.crawl.clone(),
            search: None,
            provider,
            model,
            crawler,
            memory,
            assembler,
            event_bus,
        }
    }

    /// Enable the search route.
    pub fn with_search(mut self, search: Arc<dyn SearchEngine>) -> Self {
        self.search = Some(search);
        self
    }

    /// Replace the built-in intent table.
    pub fn with_intents(mut self, intents: IntentTable) -> Self {
        self.intents = intents;
        self
    }

    /// Handle one inbound event. `None` means stay silent.
    pub async fn handle(&self, event: &ChatEvent) -> Option<String> {
        self.event_bus.publish(DomainEvent::MessageReceived {
            channel: event.channel_id.clone(),
            author_id: event.author_id.clone(),
            content_preview: truncate_chars(&event.text, 80),
            timestamp: Utc::now(),
        });

        if event.is_bot_author {
            if !self.bots.allow(&event.author_id, &event.channel_id) {
                return None;
            }
        } else {
            self.bots.reset_conversation(&event.channel_id);
        }

        match self.respond(event).await {
            Ok(Some(reply)) => {
                info!(
                    channel_id = %event.channel_id,
                    thread_id = %event.thread_id,
                    route = reply.route.as_str(),
                    "Replying"
                );
                self.event_bus.publish(DomainEvent::ReplySent {
                    channel: event.channel_id.clone(),
                    route: reply.route.as_str().to_string(),
                    timestamp: Utc::now(),
                });
                Some(reply.text)
            }
            Ok(None) => None,
            Err(e) => {
                error!(
                    author_id = %event.author_id,
                    channel_id = %event.channel_id,
                    thread_id = %event.thread_id,
                    message_id = %event.message_id,
                    "Failed to handle message: {e}"
                );
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: format!("message {} in thread {}", event.message_id, event.thread_id),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Some(APOLOGY.to_string())
            }
        }
    }

    async fn respond(&self, event: &ChatEvent) -> lantern_core::Result<Option<Reply>> {
        let text = event.text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let Some(reply) = self.route(event, text).await? else {
            return Ok(None);
        };
        self.memory.record_exchange(&event.scope(), text, &reply.text).await?;
        Ok(Some(reply))
    }

    async fn route(&self, event: &ChatEvent, text: &str) -> lantern_core::Result<Option<Reply>> {
        // A link is always read, whatever else the message says
        let urls = extract_urls(text);
        if let Some(url) = urls.first() {
            let question = strip_urls(text, &urls);
            return Ok(Some(self.page_reply(event, url, &question).await));
        }

        let intent = self.intents.classify(text);
        debug!(intent = intent.map(|i| i.as_str()), "Message classified");

        match intent {
            Some(Intent::Silence) => {
                if self.silence.try_fire(&event.channel_id) {
                    return Ok(Some(Reply::new(Route::Silence, SILENCE_ACK)));
                }
                debug!(channel_id = %event.channel_id, "Silence already acknowledged");
                Ok(None)
            }
            Some(Intent::FeatureQuestion) => Ok(Some(Reply::new(Route::Features, FEATURES))),
            Some(Intent::Lookup) => match self.search_reply(event, text).await {
                Some(reply) => Ok(Some(reply)),
                None => self.chat_reply(event, text).await,
            },
            None => self.chat_reply(event, text).await,
        }
    }

    fn caller(&self, event: &ChatEvent) -> Caller {
        Caller {
            id: event.author_id.clone(),
            tier: self.crawl.tier_for(&event.author_id),
        }
    }

    // ── Page route ──

    /// `question` is the message with its links removed; empty when the user
    /// only pasted a link.
    async fn page_reply(&self, event: &ChatEvent, url: &str, question: &str) -> Reply {
        let caller = self.caller(event);
        let budget = self.crawl.budget_for(caller.tier);
        let nodes = self.crawler.crawl(url, &caller, &budget).await;

        let content = nodes
            .iter()
            .map(|n| n.content.as_str())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if content.is_empty() {
            return Reply::new(Route::Page, COULD_NOT_RETRIEVE);
        }

        let instructions = if question.is_empty() {
            PAGE_INSTRUCTIONS.to_string()
        } else {
            format!(
                "{PAGE_INSTRUCTIONS} The user asked: \"{question}\". Answer that from the page, \
                 then summarize what else is relevant."
            )
        };
        let summary = self.summarizer.summarize(&content, &instructions).await;
        if summary.grounded {
            Reply::new(Route::Page, summary.summary)
        } else {
            Reply::new(Route::Page, NOT_ON_PAGE)
        }
    }

    // ── Search route ──

    /// `None` when search is unavailable or found nothing, so the message
    /// falls through to the chat route.
    async fn search_reply(&self, event: &ChatEvent, text: &str) -> Option<Reply> {
        let search = self.search.as_ref()?;
        let query = self.search_query(text).await;

        let hits = match search.search(&query).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query = %query, engine = search.name(), "Search failed: {e}");
                Vec::new()
            }
        };
        if hits.is_empty() {
            debug!(query = %query, "No search hits");
            return None;
        }

        let caller = self.caller(event);
        let budget = self.crawl.budget_for(caller.tier).seed_only();
        let pages = join_all(hits.iter().map(|hit| self.hit_text(hit, &caller, &budget))).await;
        let sources = hits
            .iter()
            .zip(pages)
            .map(|(hit, page)| format!("Source: {} ({})\n{}", hit.title, hit.url, page))
            .collect::<Vec<_>>()
            .join("\n\n");

        let instructions = format!(
            "Answer the question \"{text}\" using only these search results. Mention where results \
             disagree. Keep it to a few sentences."
        );
        let summary = self.summarizer.summarize(&sources, &instructions).await;
        let body = if summary.grounded { summary.summary } else { NOT_IN_RESULTS.to_string() };
        let links = hits.iter().map(|h| format!("- {}", h.url)).collect::<Vec<_>>().join("\n");

        Some(Reply::new(Route::Search, format!("{body}\n\nSources:\n{links}")))
    }

    /// Keyword query for `text`, or `text` itself when generation fails.
    async fn search_query(&self, text: &str) -> String {
        let request = ProviderRequest::new(
            self.model.clone(),
            vec![Message::system(QUERY_PROMPT), Message::user(text)],
        )
        .with_temperature(0.0)
        .with_max_tokens(32);

        match self.provider.complete(request).await {
            Ok(response) => {
                let query = response
                    .message
                    .content
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .trim_matches(['"', '「', '」'])
                    .to_string();
                if query.is_empty() { text.to_string() } else { query }
            }
            Err(e) => {
                warn!("Query generation failed, searching the raw message: {e}");
                text.to_string()
            }
        }
    }

    /// The seed page text of a hit, or its snippet when the page yields nothing.
    async fn hit_text(&self, hit: &SearchHit, caller: &Caller, budget: &CrawlBudget) -> String {
        let nodes = self.crawler.crawl(&hit.url, caller, budget).await;
        match nodes.into_iter().next() {
            Some(node) if !node.content.is_empty() => node.content,
            _ => hit.snippet.clone(),
        }
    }

    // ── Chat route ──

    async fn chat_reply(&self, event: &ChatEvent, text: &str) -> lantern_core::Result<Option<Reply>> {
        if !event.addressed && self.silence.is_cooling(&event.channel_id) {
            debug!(channel_id = %event.channel_id, "Channel asked for silence");
            return Ok(None);
        }

        let scope = event.scope();
        let context = self
            .assembler
            .assemble(&scope, text, self.assembler.config().budget_chars)
            .await;

        let decision = self.intervention.decide(event, &context).await;
        if !decision.speak {
            debug!(channel_id = %event.channel_id, reason = ?decision.reason, "Staying out of the conversation");
            return Ok(None);
        }

        let user_text = if event.group_id.is_some() {
            format!("{}: {}", event.author_label(), text)
        } else {
            text.to_string()
        };

        let mut messages = Vec::with_capacity(context.len() + 2);
        messages.push(Message::system(self.persona.system_prompt.clone()));
        messages.extend(context.iter().map(|s| s.to_message()));
        messages.push(Message::user(user_text));

        let request = ProviderRequest::new(self.model.clone(), messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        let response = self.provider.complete(request).await?;

        let reply = response.message.content.trim();
        if reply.is_empty() {
            warn!(thread_id = %event.thread_id, "Model returned an empty reply");
            return Ok(None);
        }
        Ok(Some(Reply::new(Route::Chat, reply)))
    }
}

/// `text` without `urls`, whitespace collapsed. Empty when nothing but
/// punctuation is left.
fn strip_urls(text: &str, urls: &[String]) -> String {
    let mut rest = text.to_string();
    for url in urls {
        rest = rest.replace(url.as_str(), " ");
    }
    if !rest.chars().any(char::is_alphanumeric) {
        return String::new();
    }
    rest.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        chat_event, group_event, hit, FailingStore, ScriptedProvider, StaticFetcher, StaticSearch,
    };
    use chrono::TimeZone;
    use lantern_config::MemoryConfig;
    use lantern_core::clock::ManualClock;
    use lantern_core::error::{ProviderError, SearchError};
    use lantern_core::memory::MemoryStore;
    use lantern_crawler::QuotaLedger;
    use lantern_memory::InMemoryStore;
    use rand::SeedableRng;

    const PAGE: &str = "The Kamo river runs through Kyoto from north to south. Its banks are lined with \
                        cherry trees and the river is a popular place to walk in spring.";

    struct Harness {
        provider: Arc<ScriptedProvider>,
        fetcher: Arc<StaticFetcher>,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new(provider: ScriptedProvider, fetcher: StaticFetcher) -> Self {
            Self {
                provider: Arc::new(provider),
                fetcher: Arc::new(fetcher),
                store: Arc::new(InMemoryStore::new()),
                clock: Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap())),
            }
        }

        fn config() -> AppConfig {
            let mut config = AppConfig::default();
            config.context.analysis_enabled = false;
            config.intervention.model_judgement = false;
            config.intervention.level = 0;
            config
        }

        fn pipeline_with(&self, config: &AppConfig, store: Arc<dyn MemoryStore>) -> MessagePipeline {
            let ledger = Arc::new(QuotaLedger::from_config(&config.crawl, self.clock.clone()));
            let crawler = Arc::new(BoundedCrawler::new(
                self.fetcher.clone(),
                ledger,
                Arc::new(TtlCache::new("crawl", 64, Duration::from_secs(600))),
            ));
            let memory = Arc::new(ConversationMemory::new(
                store,
                self.provider.clone(),
                "m",
                "e",
                MemoryConfig::default(),
            ));
            MessagePipeline::new(
                config,
                self.provider.clone(),
                crawler,
                memory,
                self.clock.clone(),
                StdRng::seed_from_u64(1),
                Arc::new(EventBus::default()),
            )
        }

        fn pipeline(&self) -> MessagePipeline {
            self.pipeline_with(&Self::config(), self.store.clone())
        }
    }

    #[tokio::test]
    async fn chat_reply_is_recorded() {
        let h = Harness::new(ScriptedProvider::new().then("Hello Aki!"), StaticFetcher::new());
        let pipeline = h.pipeline();

        let reply = pipeline.handle(&chat_event("good morning")).await;
        assert_eq!(reply.as_deref(), Some("Hello Aki!"));

        let request = &h.provider.requests()[0];
        assert_eq!(request.messages[0].content, AppConfig::default().persona.system_prompt);
        assert_eq!(request.messages.last().unwrap().content, "good morning");

        let turns = h.store.recent_turns(&chat_event("").scope().thread(), 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].text, "Hello Aki!");
    }

    #[tokio::test]
    async fn url_is_crawled_and_summarized() {
        let h = Harness::new(
            ScriptedProvider::new().with_rule("BEGIN_PAGE", "The Kamo river crosses Kyoto."),
            StaticFetcher::new().with_page("https://example.com/kamo", PAGE, &[]),
        );
        let reply = h.pipeline().handle(&chat_event("what is this? https://example.com/kamo")).await;

        assert_eq!(reply.as_deref(), Some("The Kamo river crosses Kyoto."));
        assert_eq!(h.fetcher.calls(), vec!["https://example.com/kamo"]);
    }

    #[tokio::test]
    async fn link_is_read_even_when_the_message_asks_for_help_or_silence() {
        let h = Harness::new(
            ScriptedProvider::new().with_rule("BEGIN_PAGE", "The Kamo river crosses Kyoto."),
            StaticFetcher::new().with_page("https://example.com/kamo", PAGE, &[]),
        );
        let pipeline = h.pipeline();

        let reply = pipeline.handle(&chat_event("can you help me read https://example.com/kamo")).await;
        assert_eq!(reply.as_deref(), Some("The Kamo river crosses Kyoto."));

        let reply = pipeline.handle(&chat_event("be quiet and look at https://example.com/kamo")).await;
        assert_eq!(reply.as_deref(), Some("The Kamo river crosses Kyoto."));
        // The cached subtree answers the second time
        assert_eq!(h.fetcher.calls(), vec!["https://example.com/kamo"]);

        // The link did not start a silence window
        assert_eq!(pipeline.handle(&chat_event("be quiet")).await.as_deref(), Some(SILENCE_ACK));
    }

    #[tokio::test]
    async fn question_about_a_page_reaches_the_summarizer() {
        let h = Harness::new(
            ScriptedProvider::new().with_rule("BEGIN_PAGE", "It flows north to south."),
            StaticFetcher::new().with_page("https://example.com/kamo", PAGE, &[]),
        );
        let pipeline = h.pipeline();

        pipeline
            .handle(&chat_event("which way does it flow? https://example.com/kamo"))
            .await;
        pipeline.handle(&chat_event("https://example.com/kamo.")).await;

        let instructions: Vec<String> = h
            .provider
            .requests()
            .iter()
            .map(|r| r.messages[1].content.clone())
            .collect();
        assert_eq!(instructions.len(), 2);
        assert!(instructions[0].contains("The user asked: \"which way does it flow?\""));
        assert_eq!(instructions[1], PAGE_INSTRUCTIONS);
    }

    #[test]
    fn links_are_stripped_from_the_question() {
        let urls = vec!["https://a.test/x".to_string()];
        assert_eq!(strip_urls("what is  https://a.test/x about?", &urls), "what is about?");
        assert_eq!(strip_urls("https://a.test/x !", &urls), "");
    }

    #[tokio::test]
    async fn empty_crawl_cannot_retrieve() {
        let h = Harness::new(ScriptedProvider::new(), StaticFetcher::new());
        let reply = h.pipeline().handle(&chat_event("https://example.com/missing")).await;
        assert_eq!(reply.as_deref(), Some(COULD_NOT_RETRIEVE));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn ungrounded_page_says_so() {
        let h = Harness::new(
            ScriptedProvider::new().with_rule("BEGIN_PAGE", "UNAVAILABLE"),
            StaticFetcher::new().with_page("https://example.com/kamo", PAGE, &[]),
        );
        let reply = h.pipeline().handle(&chat_event("https://example.com/kamo")).await;
        assert_eq!(reply.as_deref(), Some(NOT_ON_PAGE));
    }

    #[tokio::test]
    async fn lookup_searches_crawls_seeds_and_cites_sources() {
        let h = Harness::new(
            ScriptedProvider::new()
                .with_rule("web search queries", "kamo river kyoto")
                .with_rule("BEGIN_PAGE", "The Kamo river runs north to south."),
            StaticFetcher::new().with_page(
                "https://example.com/kamo",
                PAGE,
                &["https://example.com/deeper"],
            ),
        );
        let search = Arc::new(StaticSearch::with_hits(vec![
            hit("https://example.com/kamo", "river page"),
            hit("https://example.org/empty", "snippet fallback"),
        ]));
        let pipeline = h.pipeline().with_search(search.clone());

        let reply = pipeline.handle(&chat_event("tell me about the Kamo river")).await.unwrap();
        assert_eq!(
            reply,
            "The Kamo river runs north to south.\n\nSources:\n- https://example.com/kamo\n- https://example.org/empty"
        );
        assert_eq!(search.queries(), vec!["kamo river kyoto"]);

        // Depth 0 only: the outbound link is never followed
        let mut calls = h.fetcher.calls();
        calls.sort();
        assert_eq!(calls, vec!["https://example.com/kamo", "https://example.org/empty"]);

        let summary_request = h
            .provider
            .requests()
            .into_iter()
            .find(|r| r.messages.iter().any(|m| m.content.contains("BEGIN_PAGE")))
            .unwrap();
        assert!(summary_request.messages[2].content.contains("snippet fallback"));
    }

    #[tokio::test]
    async fn failed_search_falls_back_to_chat() {
        let h = Harness::new(
            ScriptedProvider::new()
                .with_rule("web search queries", "weather osaka")
                .then("I can't look that up right now, but usually it's mild."),
            StaticFetcher::new(),
        );
        let pipeline = h
            .pipeline()
            .with_search(Arc::new(StaticSearch::failing(SearchError::Exhausted {
                attempts: 3,
                reason: "status 503".into(),
            })));

        let reply = pipeline.handle(&chat_event("is it warm in Osaka?")).await;
        assert_eq!(reply.as_deref(), Some("I can't look that up right now, but usually it's mild."));
    }

    #[tokio::test]
    async fn silence_is_acknowledged_once_and_mutes_interventions() {
        let h = Harness::new(ScriptedProvider::new(), StaticFetcher::new());
        let mut config = Harness::config();
        config.intervention.level = 10;
        let pipeline = h.pipeline_with(&config, h.store.clone());

        assert_eq!(pipeline.handle(&group_event("u2", "be quiet please")).await.as_deref(), Some(SILENCE_ACK));
        assert_eq!(pipeline.handle(&group_event("u3", "be quiet")).await, None);
        assert_eq!(pipeline.handle(&group_event("u2", "nice weather today")).await, None);
        assert_eq!(h.provider.call_count(), 0);

        h.clock.advance(chrono::TimeDelta::hours(1));
        assert_eq!(pipeline.handle(&group_event("u2", "be quiet")).await.as_deref(), Some(SILENCE_ACK));
    }

    #[tokio::test]
    async fn feature_question_gets_fixed_description() {
        let h = Harness::new(ScriptedProvider::new(), StaticFetcher::new());
        let reply = h.pipeline().handle(&chat_event("what can you do?")).await;
        assert_eq!(reply.as_deref(), Some(FEATURES));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn unaddressed_chatter_is_ignored_at_level_zero() {
        let h = Harness::new(ScriptedProvider::new(), StaticFetcher::new());
        assert_eq!(h.pipeline().handle(&group_event("u2", "lunch anyone")).await, None);
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn bot_conversations_are_capped() {
        let h = Harness::new(
            ScriptedProvider::new().then("one").then("two").then("three"),
            StaticFetcher::new(),
        );
        let pipeline = h.pipeline();
        let bot = |text: &str| ChatEvent {
            is_bot_author: true,
            author_id: "bot-7".into(),
            ..chat_event(text)
        };

        assert_eq!(pipeline.handle(&bot("ping")).await.as_deref(), Some("one"));
        assert_eq!(pipeline.handle(&bot("ping")).await.as_deref(), Some("two"));
        assert_eq!(pipeline.handle(&bot("ping")).await, None);

        pipeline.handle(&ChatEvent { text: String::new(), ..chat_event("") }).await;
        assert_eq!(pipeline.handle(&bot("ping")).await.as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn storage_failure_becomes_apology() {
        let h = Harness::new(ScriptedProvider::new().then("hi"), StaticFetcher::new());
        let pipeline = h.pipeline_with(&Harness::config(), Arc::new(FailingStore));
        let mut rx = pipeline.event_bus.subscribe();

        let reply = pipeline.handle(&chat_event("hello")).await;
        assert_eq!(reply.as_deref(), Some(APOLOGY));

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            saw_error |= matches!(event.as_ref(), DomainEvent::ErrorOccurred { .. });
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn provider_failure_becomes_apology() {
        let h = Harness::new(
            ScriptedProvider::new().then_error(ProviderError::AuthenticationFailed("bad key".into())),
            StaticFetcher::new(),
        );
        let reply = h.pipeline().handle(&chat_event("hello")).await;
        assert_eq!(reply.as_deref(), Some(APOLOGY));
        assert!(!reply.unwrap().contains("bad key"));
    }
}
