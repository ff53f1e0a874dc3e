//! Configuration loading, validation, and management for Lantern.
//!
//! Loads configuration from `~/.lantern/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use chrono::{FixedOffset, Offset, Utc};
use lantern_core::crawl::{AccessTier, CrawlBudget};
use lantern_core::message::SegmentKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.lantern/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion and embedding service
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Crawl budgets and quota day boundary
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Page fetcher timeouts and extraction gate
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Content cache capacities and TTLs
    #[serde(default)]
    pub cache: CacheConfig,

    /// Memory store and memory tiers
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Context window budget and pinning
    #[serde(default)]
    pub context: ContextConfig,

    /// Unprompted reply policy
    #[serde(default)]
    pub intervention: InterventionConfig,

    /// Web search engine
    #[serde(default)]
    pub search: SearchConfig,

    /// Character the agent speaks as
    #[serde(default)]
    pub persona: PersonaConfig,

    /// Bot-conversation and notice limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

// ── Provider ──

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Temperature for conversational replies
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Completion requests allowed in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_provider_timeout() -> u64 {
    60
}
fn default_max_concurrent() -> usize {
    4
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_provider_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .finish()
    }
}

// ── Crawl ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    #[serde(default = "default_standard_budget")]
    pub standard: CrawlBudget,

    #[serde(default = "default_elevated_budget")]
    pub elevated: CrawlBudget,

    /// Identities entitled to the elevated budget
    #[serde(default)]
    pub elevated_users: Vec<String>,

    /// UTC offset of the quota day boundary, in minutes (+09:00 by default)
    #[serde(default = "default_timezone_offset")]
    pub timezone_offset_minutes: i32,
}

fn default_standard_budget() -> CrawlBudget {
    CrawlBudget::STANDARD
}
fn default_elevated_budget() -> CrawlBudget {
    CrawlBudget::ELEVATED
}
fn default_timezone_offset() -> i32 {
    9 * 60
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            standard: default_standard_budget(),
            elevated: default_elevated_budget(),
            elevated_users: Vec::new(),
            timezone_offset_minutes: default_timezone_offset(),
        }
    }
}

impl CrawlConfig {
    /// The tier an identity is entitled to.
    pub fn tier_for(&self, user_id: &str) -> AccessTier {
        if self.elevated_users.iter().any(|u| u == user_id) {
            AccessTier::Elevated
        } else {
            AccessTier::Standard
        }
    }

    pub fn budget_for(&self, tier: AccessTier) -> CrawlBudget {
        match tier {
            AccessTier::Standard => self.standard,
            AccessTier::Elevated => self.elevated,
        }
    }

    /// The quota day boundary as a fixed offset. Falls back to UTC when the
    /// configured value is out of range; `validate()` rejects that case.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

// ── Fetcher ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Static GET timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Render service timeout
    #[serde(default = "default_render_timeout")]
    pub render_timeout_secs: u64,

    /// Headless render service; the render stage is skipped when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_endpoint: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Minimum non-whitespace characters for extracted text to be accepted
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

fn default_request_timeout() -> u64 {
    10
}
fn default_render_timeout() -> u64 {
    20
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; LanternBot/0.1; +https://github.com/lantern-agent/lantern)".into()
}
fn default_min_content_chars() -> usize {
    100
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            render_timeout_secs: default_render_timeout(),
            render_endpoint: None,
            user_agent: default_user_agent(),
            min_content_chars: default_min_content_chars(),
        }
    }
}

// ── Cache ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

fn default_cache_capacity() -> usize {
    256
}
fn default_cache_ttl() -> u64 {
    600
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Crawl nodes keyed by URL and depth
    #[serde(default)]
    pub crawl: CachePolicy,

    /// Derived analyses and summaries
    #[serde(default)]
    pub summary: CachePolicy,

    /// Embedding vectors keyed by text
    #[serde(default)]
    pub embedding: CachePolicy,
}

// ── Memory ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite" or "in_memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// SQLite file; defaults to `~/.lantern/memory.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Most recent turns kept verbatim in the context
    #[serde(default = "default_short_term_turns")]
    pub short_term_turns: usize,

    /// Similar past interactions pulled into the context
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Minimum cosine similarity for recall
    #[serde(default = "default_recall_threshold")]
    pub recall_threshold: f32,

    /// Uncovered turns that trigger a new rolling summary
    #[serde(default = "default_summary_every")]
    pub summary_every: usize,

    /// Length cap for a rolling summary, in characters
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,

    /// Turns mirrored into the group log are truncated to this length
    #[serde(default = "default_max_turn_chars")]
    pub max_turn_chars: usize,

    /// Length cap for a user profile, in characters. 0 turns profiles off.
    #[serde(default = "default_profile_max_chars")]
    pub profile_max_chars: usize,
}

fn default_memory_backend() -> String {
    "sqlite".into()
}
fn default_short_term_turns() -> usize {
    8
}
fn default_recall_limit() -> usize {
    2
}
fn default_recall_threshold() -> f32 {
    0.75
}
fn default_summary_every() -> usize {
    40
}
fn default_summary_max_chars() -> usize {
    150
}
fn default_max_turn_chars() -> usize {
    3000
}
fn default_profile_max_chars() -> usize {
    200
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            short_term_turns: default_short_term_turns(),
            recall_limit: default_recall_limit(),
            recall_threshold: default_recall_threshold(),
            summary_every: default_summary_every(),
            summary_max_chars: default_summary_max_chars(),
            max_turn_chars: default_max_turn_chars(),
            profile_max_chars: default_profile_max_chars(),
        }
    }
}

impl MemoryConfig {
    pub fn database_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("memory.db"))
    }
}

// ── Context ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Character budget for the assembled context
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,

    /// Compaction stops once this many segments remain
    #[serde(default)]
    pub min_segments: usize,

    /// Segment kinds that survive compaction
    #[serde(default = "default_pinned_kinds")]
    pub pinned_kinds: Vec<SegmentKind>,

    /// Run the derived-analysis extraction on each reply
    #[serde(default = "default_true")]
    pub analysis_enabled: bool,
}

fn default_budget_chars() -> usize {
    5000
}
fn default_pinned_kinds() -> Vec<SegmentKind> {
    vec![
        SegmentKind::LongTermSummary,
        SegmentKind::GroupSummary,
        SegmentKind::UserProfile,
        SegmentKind::Topic,
        SegmentKind::Unresolved,
        SegmentKind::Expectation,
        SegmentKind::Tone,
        SegmentKind::Intents,
    ]
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_chars: default_budget_chars(),
            min_segments: 0,
            pinned_kinds: default_pinned_kinds(),
            analysis_enabled: true,
        }
    }
}

impl ContextConfig {
    pub fn is_pinned(&self, kind: SegmentKind) -> bool {
        self.pinned_kinds.contains(&kind)
    }
}

// ── Intervention ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionConfig {
    /// 0 = never speak unprompted, 10 = always
    #[serde(default = "default_intervention_level")]
    pub level: u8,

    /// Patterns that count as being called by name
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,

    /// Ask the model whether to join in
    #[serde(default = "default_true")]
    pub model_judgement: bool,

    /// Recent segments shown to the judge
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_intervention_level() -> u8 {
    2
}
fn default_triggers() -> Vec<String> {
    vec!["(?i)\\blantern\\b".into()]
}
fn default_history_window() -> usize {
    10
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            level: default_intervention_level(),
            triggers: default_triggers(),
            model_judgement: true,
            history_window: default_history_window(),
        }
    }
}

// ── Search ──

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Custom Search engine ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_id: Option<String>,

    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Hits whose URL contains one of these are dropped
    #[serde(default = "default_excluded_domains")]
    pub excluded_domains: Vec<String>,

    /// Hosts ranked first (official and news sources)
    #[serde(default = "default_priority_domains")]
    pub priority_domains: Vec<String>,

    /// Hosts ranked after priority ones (social, blogs)
    #[serde(default = "default_secondary_domains")]
    pub secondary_domains: Vec<String>,
}

fn default_search_endpoint() -> String {
    "https://www.googleapis.com/customsearch/v1".into()
}
fn default_max_results() -> usize {
    3
}
fn default_max_retries() -> u32 {
    2
}
fn default_excluded_domains() -> Vec<String> {
    ["login", "auth", "accounts.google.com", "ad.", "ads.", "doubleclick.net", "googlesyndication.com"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_priority_domains() -> Vec<String> {
    [".go.jp", ".gov", ".edu", ".ac.jp", "wikipedia.org", "nhk.or.jp", "reuters.com", "bbc.co.uk", "apnews.com"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_secondary_domains() -> Vec<String> {
    ["x.com", "twitter.com", "reddit.com", "note.com", "qiita.com", "zenn.dev", "medium.com"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            engine_id: None,
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
            timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            excluded_domains: default_excluded_domains(),
            priority_domains: default_priority_domains(),
            secondary_domains: default_secondary_domains(),
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_key", &redact(&self.api_key))
            .field("engine_id", &self.engine_id)
            .field("endpoint", &self.endpoint)
            .field("max_results", &self.max_results)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("excluded_domains", &self.excluded_domains)
            .field("priority_domains", &self.priority_domains)
            .field("secondary_domains", &self.secondary_domains)
            .finish()
    }
}

// ── Persona ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_persona_name() -> String {
    "Lantern".into()
}
fn default_system_prompt() -> String {
    "You are Lantern, a calm and curious conversation partner. Answer briefly, \
     say so when you do not know something, and never invent facts about web pages."
        .into()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            system_prompt: default_system_prompt(),
        }
    }
}

// ── Limits ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Consecutive replies to one bot before going quiet
    #[serde(default = "default_bot_max_turns")]
    pub bot_max_turns: u32,

    /// Replies to one bot per day
    #[serde(default = "default_bot_max_daily")]
    pub bot_max_daily: u32,

    /// Minimum gap between repeated notices in one channel
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_bot_max_turns() -> u32 {
    2
}
fn default_bot_max_daily() -> u32 {
    10
}
fn default_cooldown_secs() -> u64 {
    3600
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            bot_max_turns: default_bot_max_turns(),
            bot_max_daily: default_bot_max_daily(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.lantern/config.toml).
    ///
    /// Environment overrides:
    /// - `LANTERN_API_KEY` then `OPENAI_API_KEY` for the provider key
    /// - `LANTERN_MODEL`, `LANTERN_BASE_URL`
    /// - `GOOGLE_API_KEY`, `GOOGLE_CSE_ID` for search
    /// - `LANTERN_RENDER_ENDPOINT` for the fetcher's render stage
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup("LANTERN_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(model) = lookup("LANTERN_MODEL") {
            self.provider.model = model;
        }
        if let Some(base_url) = lookup("LANTERN_BASE_URL") {
            self.provider.base_url = base_url;
        }
        if self.search.api_key.is_none() {
            self.search.api_key = lookup("GOOGLE_API_KEY");
        }
        if self.search.engine_id.is_none() {
            self.search.engine_id = lookup("GOOGLE_CSE_ID");
        }
        if let Some(endpoint) = lookup("LANTERN_RENDER_ENDPOINT") {
            self.fetcher.render_endpoint = Some(endpoint);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lantern")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        for (name, budget) in [("standard", &self.crawl.standard), ("elevated", &self.crawl.elevated)] {
            if budget.max_calls_per_request == 0 || budget.max_calls_per_day == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "crawl.{name} call budgets must be > 0"
                )));
            }
        }

        let (s, e) = (&self.crawl.standard, &self.crawl.elevated);
        if s.max_depth > e.max_depth
            || s.max_links_per_page > e.max_links_per_page
            || s.max_calls_per_request > e.max_calls_per_request
            || s.max_calls_per_day > e.max_calls_per_day
        {
            return Err(ConfigError::ValidationError(
                "crawl.standard must not exceed crawl.elevated".into(),
            ));
        }

        if FixedOffset::east_opt(self.crawl.timezone_offset_minutes * 60).is_none() {
            return Err(ConfigError::ValidationError(
                "crawl.timezone_offset_minutes must be within ±24h".into(),
            ));
        }

        if self.intervention.level > 10 {
            return Err(ConfigError::ValidationError(
                "intervention.level must be between 0 and 10".into(),
            ));
        }

        for (name, policy) in [
            ("crawl", &self.cache.crawl),
            ("summary", &self.cache.summary),
            ("embedding", &self.cache.embedding),
        ] {
            if policy.capacity == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "cache.{name}.capacity must be > 0"
                )));
            }
        }

        if !(-1.0..=1.0).contains(&self.memory.recall_threshold) {
            return Err(ConfigError::ValidationError(
                "memory.recall_threshold must be between -1.0 and 1.0".into(),
            ));
        }

        if self.memory.summary_every == 0 {
            return Err(ConfigError::ValidationError(
                "memory.summary_every must be > 0".into(),
            ));
        }

        if self.provider.max_concurrent_requests == 0 {
            return Err(ConfigError::ValidationError(
                "provider.max_concurrent_requests must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if a completion API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
