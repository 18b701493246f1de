//! Per-counterparty inbound flood gate.
//!
//! Abuse protection only: drops messages that arrive faster than a minimum gap
//! or beyond a per-minute cap. It says nothing about fairness between
//! counterparties.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::lock_unpoisoned;

const INBOUND_WINDOW: Duration = Duration::from_secs(60);

pub const DEFAULT_INBOUND_MIN_GAP: Duration = Duration::from_secs(2);
pub const DEFAULT_INBOUND_MAX_PER_MINUTE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundGateConfig {
    pub min_gap: Duration,
    pub max_per_minute: usize,
}

impl Default for InboundGateConfig {
    fn default() -> Self {
        Self {
            min_gap: DEFAULT_INBOUND_MIN_GAP,
            max_per_minute: DEFAULT_INBOUND_MAX_PER_MINUTE,
        }
    }
}

/// Why an inbound message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundRejection {
    /// Arrived sooner than the minimum gap after the last accepted message.
    TooFast,
    /// The counterparty already used its per-minute allowance.
    PerMinuteCap,
}

impl InboundRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TooFast => "inbound_too_fast",
            Self::PerMinuteCap => "inbound_per_minute_cap",
        }
    }
}

/// Tracks accepted inbound timestamps per counterparty over the last minute.
#[derive(Debug)]
pub struct InboundRateGate<K> {
    config: InboundGateConfig,
    accepted: Mutex<HashMap<K, VecDeque<Instant>>>,
}

impl<K> Default for InboundRateGate<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(InboundGateConfig::default())
    }
}

impl<K> InboundRateGate<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(config: InboundGateConfig) -> Self {
        Self {
            config: InboundGateConfig {
                min_gap: config.min_gap,
                max_per_minute: config.max_per_minute.max(1),
            },
            accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> InboundGateConfig {
        self.config
    }

    /// Admits and timestamps one inbound message, or explains the drop.
    pub fn admit(&self, key: &K) -> Result<(), InboundRejection> {
        let now = Instant::now();
        let mut accepted = lock_unpoisoned(&self.accepted);
        let stamps = accepted.entry(key.clone()).or_default();
        while stamps
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= INBOUND_WINDOW)
        {
            stamps.pop_front();
        }

        if stamps
            .back()
            .is_some_and(|last| now.saturating_duration_since(*last) < self.config.min_gap)
        {
            return Err(InboundRejection::TooFast);
        }
        if stamps.len() >= self.config.max_per_minute {
            return Err(InboundRejection::PerMinuteCap);
        }
        stamps.push_back(now);
        Ok(())
    }

    /// Accepted messages from `key` within the trailing minute.
    pub fn recent_count(&self, key: &K) -> usize {
        let now = Instant::now();
        lock_unpoisoned(&self.accepted)
            .get(key)
            .map(|stamps| {
                stamps
                    .iter()
                    .filter(|stamp| now.saturating_duration_since(**stamp) < INBOUND_WINDOW)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn forget(&self, key: &K) {
        lock_unpoisoned(&self.accepted).remove(key);
    }
}
