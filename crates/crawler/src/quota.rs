//! Per-identity, per-day counters.
//!
//! A record is keyed by identity and stamped with the calendar date (in a
//! fixed UTC offset) of its last increment. A record from an earlier date
//! reads as zero and is superseded on the next increment, so rollover needs
//! no background task.

use chrono::{FixedOffset, NaiveDate};
use lantern_config::CrawlConfig;
use lantern_core::clock::Clock;
use lantern_core::crawl::{AccessTier, Caller, CrawlBudget};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One identity's usage for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub identity: String,
    pub date: NaiveDate,
    pub count: u32,
}

/// Day-scoped counters keyed by identity.
pub struct DailyCounter {
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    records: Mutex<HashMap<String, QuotaRecord>>,
}

impl DailyCounter {
    pub fn new(clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        Self {
            clock,
            offset,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Today's count for an identity. Stale records read as zero.
    pub fn count(&self, identity: &str) -> u32 {
        let today = self.clock.today(self.offset);
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .get(identity)
            .filter(|r| r.date == today)
            .map_or(0, |r| r.count)
    }

    /// Increment today's count unless it already reached `limit`.
    /// Returns false without mutating when the limit is reached.
    pub fn try_increment(&self, identity: &str, limit: u32) -> bool {
        let today = self.clock.today(self.offset);
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        let stale_date = records.get(identity).map(|r| r.date).filter(|d| *d != today);
        let current = match records.get(identity) {
            Some(r) if r.date == today => r.count,
            _ => 0,
        };
        if current >= limit {
            return false;
        }

        if let Some(stale) = stale_date {
            debug!(identity, %stale, %today, "Daily counter rolled over");
        }
        records.insert(
            identity.to_string(),
            QuotaRecord {
                identity: identity.to_string(),
                date: today,
                count: current + 1,
            },
        );
        true
    }

    /// Clear today's count for an identity.
    pub fn reset(&self, identity: &str) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(identity);
    }

    /// The stored record, stale or not.
    pub fn record(&self, identity: &str) -> Option<QuotaRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned()
    }
}

/// Daily crawl-call allowance per caller, by budget profile.
pub struct QuotaLedger {
    counter: DailyCounter,
    standard_limit: u32,
    elevated_limit: u32,
}

impl QuotaLedger {
    pub fn new(
        standard: &CrawlBudget,
        elevated: &CrawlBudget,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            counter: DailyCounter::new(clock, offset),
            standard_limit: standard.max_calls_per_day,
            elevated_limit: elevated.max_calls_per_day,
        }
    }

    pub fn from_config(config: &CrawlConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(&config.standard, &config.elevated, clock, config.offset())
    }

    pub fn daily_limit(&self, tier: AccessTier) -> u32 {
        match tier {
            AccessTier::Standard => self.standard_limit,
            AccessTier::Elevated => self.elevated_limit,
        }
    }

    /// Calls left today for this caller.
    pub fn remaining(&self, caller: &Caller) -> u32 {
        self.daily_limit(caller.tier)
            .saturating_sub(self.counter.count(&caller.id))
    }

    /// Take one call from today's allowance. False (and no change) when exhausted.
    pub fn consume(&self, caller: &Caller) -> bool {
        self.counter
            .try_increment(&caller.id, self.daily_limit(caller.tier))
    }

    pub fn record(&self, caller: &Caller) -> Option<QuotaRecord> {
        self.counter.record(&caller.id)
    }
}
