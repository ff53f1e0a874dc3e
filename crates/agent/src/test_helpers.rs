//! Scripted collaborators for tests.
//!
//! Enabled for this crate's unit tests and, through the `test-helpers`
//! feature, for downstream integration tests.

use async_trait::async_trait;
use chrono::Utc;
use lantern_core::channel::ChatEvent;
use lantern_core::error::{MemoryError, ProviderError, SearchError};
use lantern_core::fetch::{FetchedPage, PageFetcher};
use lantern_core::memory::{MemoryStore, RecalledTurn, RollingSummary, StoreScope, UserProfile};
use lantern_core::message::{ConversationTurn, Message};
use lantern_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
use lantern_core::search::{SearchEngine, SearchHit};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Provider ──────────────────────────────────────────────────────────────

/// A provider that answers from a script.
///
/// Rules are checked first: the first rule whose needle appears in any
/// message of the request supplies the reply. Otherwise the next queued
/// reply is used. An empty queue is an error.
pub struct ScriptedProvider {
    rules: Vec<(String, String)>,
    queue: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    embed_calls: Mutex<usize>,
    fail_embeddings: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            embed_calls: Mutex::new(0),
            fail_embeddings: false,
        }
    }

    /// Reply with `reply` whenever a request mentions `needle`.
    pub fn with_rule(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), reply.to_string()));
        self
    }

    /// Queue one reply.
    pub fn then(self, reply: &str) -> Self {
        lock(&self.queue).push_back(Ok(reply.to_string()));
        self
    }

    /// Queue one failure.
    pub fn then_error(self, error: ProviderError) -> Self {
        lock(&self.queue).push_back(Err(error));
        self
    }

    pub fn failing_embeddings(mut self) -> Self {
        self.fail_embeddings = true;
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }

    pub fn embed_count(&self) -> usize {
        *lock(&self.embed_calls)
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let rule_reply = self
            .rules
            .iter()
            .find(|(needle, _)| request.messages.iter().any(|m| m.content.contains(needle.as_str())))
            .map(|(_, reply)| reply.clone());
        lock(&self.requests).push(request);

        let reply = match rule_reply {
            Some(reply) => reply,
            None => lock(&self.queue)
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::MalformedResponse("script exhausted".into())))?,
        };
        Ok(text_response(&reply))
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        *lock(&self.embed_calls) += 1;
        if self.fail_embeddings {
            return Err(ProviderError::Network("embedding service down".into()));
        }
        Ok(EmbeddingResponse {
            embeddings: request.inputs.iter().map(|t| letter_histogram(t)).collect(),
            model: request.model,
        })
    }
}

/// A response carrying `text` as the assistant message.
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Deterministic toy embedding: ASCII letter counts plus one bucket for
/// everything else. Texts sharing vocabulary land close together.
pub fn letter_histogram(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 27];
    for c in text.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() {
            v[(c as u8 - b'a') as usize] += 1.0;
        } else if !c.is_whitespace() {
            v[26] += 1.0;
        }
    }
    v
}

// ── Fetcher ───────────────────────────────────────────────────────────────

/// A fetcher serving fixed pages and recording every call.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, FetchedPage>,
    calls: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, text: &str, links: &[&str]) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                text: text.to_string(),
                links: links.iter().map(|l| l.to_string()).collect(),
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> FetchedPage {
        lock(&self.calls).push(url.to_string());
        self.pages.get(url).cloned().unwrap_or_default()
    }
}

// ── Search ────────────────────────────────────────────────────────────────

/// A search engine returning fixed hits, or a fixed error.
pub struct StaticSearch {
    result: Result<Vec<SearchHit>, SearchError>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self {
            result: Ok(hits),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: SearchError) -> Self {
        Self {
            result: Err(error),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl SearchEngine for StaticSearch {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        lock(&self.queries).push(query.to_string());
        self.result.clone()
    }
}

pub fn hit(url: &str, snippet: &str) -> SearchHit {
    SearchHit {
        title: format!("Title of {url}"),
        url: url.to_string(),
        snippet: snippet.to_string(),
    }
}

// ── Store ─────────────────────────────────────────────────────────────────

/// A store whose every operation fails, standing in for an unreachable database.
pub struct FailingStore;

fn unreachable_store() -> MemoryError {
    MemoryError::Storage("database unreachable".into())
}

#[async_trait]
impl MemoryStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn append_turn(&self, _: &StoreScope, _: ConversationTurn) -> Result<(), MemoryError> {
        Err(unreachable_store())
    }

    async fn recent_turns(&self, _: &StoreScope, _: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        Err(unreachable_store())
    }

    async fn turns_after(&self, _: &StoreScope, _: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        Err(unreachable_store())
    }

    async fn turn_count(&self, _: &StoreScope) -> Result<usize, MemoryError> {
        Err(unreachable_store())
    }

    async fn latest_summary(&self, _: &StoreScope) -> Result<Option<RollingSummary>, MemoryError> {
        Err(unreachable_store())
    }

    async fn store_summary(&self, _: &StoreScope, _: RollingSummary) -> Result<(), MemoryError> {
        Err(unreachable_store())
    }

    async fn user_profile(&self, _: &str) -> Result<Option<UserProfile>, MemoryError> {
        Err(unreachable_store())
    }

    async fn store_user_profile(&self, _: UserProfile) -> Result<(), MemoryError> {
        Err(unreachable_store())
    }

    async fn store_interaction(&self, _: &StoreScope, _: &str, _: Vec<f32>) -> Result<(), MemoryError> {
        Err(unreachable_store())
    }

    async fn nearest(&self, _: &StoreScope, _: &[f32], _: usize, _: f32) -> Result<Vec<RecalledTurn>, MemoryError> {
        Err(unreachable_store())
    }
}

// ── Events ────────────────────────────────────────────────────────────────

/// An addressed direct message from `u1` in thread `t1` of channel `c1`.
pub fn chat_event(text: &str) -> ChatEvent {
    ChatEvent {
        message_id: "m1".into(),
        author_id: "u1".into(),
        author_name: Some("Aki".into()),
        channel_id: "c1".into(),
        thread_id: "t1".into(),
        group_id: None,
        text: text.into(),
        is_bot_author: false,
        addressed: true,
        timestamp: Utc::now(),
    }
}

/// An unaddressed group message.
pub fn group_event(author: &str, text: &str) -> ChatEvent {
    ChatEvent {
        author_id: author.into(),
        author_name: None,
        group_id: Some("g1".into()),
        addressed: false,
        ..chat_event(text)
    }
}
