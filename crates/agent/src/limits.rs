//! Process-lifetime limiters, owned by the pipeline.
//!
//! - [`Cooldown`]: at most one firing per key within a window
//! - [`BotConversationLimiter`]: caps replies to other bots, per conversation
//!   and per day
//!
//! Both drop expired entries whenever they are touched: a cooldown entry
//! lives for one window, a bot conversation count for one local day.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeDelta, Utc};
use lantern_config::LimitsConfig;
use lantern_core::clock::Clock;
use lantern_crawler::DailyCounter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

// ── Cooldown ──────────────────────────────────────────────────────────────

pub struct Cooldown {
    window: TimeDelta,
    clock: Arc<dyn Clock>,
    last: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Cooldown {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
            clock,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Fire for `key` unless it fired within the window. Returns whether it fired.
    pub fn try_fire(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut last = self.live_entries(now);
        if last.contains_key(key) {
            return false;
        }
        last.insert(key.to_string(), now);
        true
    }

    /// Whether `key` fired within the window.
    pub fn is_cooling(&self, key: &str) -> bool {
        self.live_entries(self.clock.now()).contains_key(key)
    }

    /// Keys currently inside their window.
    pub fn len(&self) -> usize {
        self.live_entries(self.clock.now()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_entries(
        &self,
        now: DateTime<Utc>,
    ) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        last.retain(|_, at| now - *at < self.window);
        last
    }
}

// ── Bot conversations ─────────────────────────────────────────────────────

/// Keeps two bots from talking to each other forever.
///
/// A bot gets at most `max_turns` consecutive replies in a channel until a
/// human speaks there, and at most `max_daily` replies per calendar day.
pub struct BotConversationLimiter {
    max_turns: u32,
    max_daily: u32,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    /// `(channel, bot)` → consecutive replies and the local day they were counted on
    consecutive: Mutex<HashMap<(String, String), (u32, NaiveDate)>>,
    daily: DailyCounter,
}

impl BotConversationLimiter {
    pub fn new(max_turns: u32, max_daily: u32, clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        Self {
            max_turns,
            max_daily,
            consecutive: Mutex::new(HashMap::new()),
            daily: DailyCounter::new(clock.clone(), offset),
            clock,
            offset,
        }
    }

    pub fn from_config(config: &LimitsConfig, clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        Self::new(config.bot_max_turns, config.bot_max_daily, clock, offset)
    }

    /// Count a reply to `bot_id` in `channel_id`, or refuse it.
    pub fn allow(&self, bot_id: &str, channel_id: &str) -> bool {
        let key = (channel_id.to_string(), bot_id.to_string());
        let today = self.today();
        let mut consecutive = self.live_conversations(today);

        let turns = consecutive.get(&key).map_or(0, |(turns, _)| *turns);
        if turns >= self.max_turns {
            debug!(bot_id, channel_id, turns, "Bot conversation turn limit reached");
            return false;
        }
        if !self.daily.try_increment(bot_id, self.max_daily) {
            debug!(bot_id, "Bot daily reply limit reached");
            return false;
        }

        consecutive.insert(key, (turns + 1, today));
        true
    }

    /// A human spoke in `channel_id`: every bot conversation there starts over.
    pub fn reset_conversation(&self, channel_id: &str) {
        self.consecutive
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(channel, _), _| channel != channel_id);
    }

    /// Replies to `bot_id` counted today.
    pub fn daily_count(&self, bot_id: &str) -> u32 {
        self.daily.count(bot_id)
    }

    /// Bot conversations with a count still standing today.
    pub fn tracked_conversations(&self) -> usize {
        self.live_conversations(self.today()).len()
    }

    fn today(&self) -> NaiveDate {
        self.clock.today(self.offset)
    }

    fn live_conversations(
        &self,
        today: NaiveDate,
    ) -> MutexGuard<'_, HashMap<(String, String), (u32, NaiveDate)>> {
        let mut consecutive = self.consecutive.lock().unwrap_or_else(|e| e.into_inner());
        consecutive.retain(|_, (_, day)| *day == today);
        consecutive
    }
}
