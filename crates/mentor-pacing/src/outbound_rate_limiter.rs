//! Sliding-window admission control for outbound sends.
//!
//! One limiter models one outbound identity and is shared by every send path
//! (regular deliveries and greetings). Waiters take turns on an async lock
//! while the timestamp log sits behind a short synchronous lock, so
//! [`OutboundRateLimiter::stats`] never blocks behind a sleeping waiter.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::lock_unpoisoned;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3_600);
const DAY: Duration = Duration::from_secs(86_400);

pub const DEFAULT_MAX_SENDS_PER_MINUTE: usize = 8;
pub const DEFAULT_MAX_SENDS_PER_HOUR: usize = 40;
pub const DEFAULT_MAX_SENDS_PER_DAY: usize = 200;

/// Per-window caps, kept below the platform's own thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_per_minute: usize,
    pub max_per_hour: usize,
    pub max_per_day: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_minute: DEFAULT_MAX_SENDS_PER_MINUTE,
            max_per_hour: DEFAULT_MAX_SENDS_PER_HOUR,
            max_per_day: DEFAULT_MAX_SENDS_PER_DAY,
        }
    }
}

/// Counts of recorded sends in each trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub last_minute: usize,
    pub last_hour: usize,
    pub last_day: usize,
}

#[derive(Debug, Clone, Copy)]
struct WindowRule {
    label: &'static str,
    window: Duration,
    cap: usize,
    jitter_secs: (f64, f64),
}

impl WindowRule {
    /// Time until the oldest in-window entry leaves the window, when at capacity.
    fn required_wait(&self, log: &VecDeque<Instant>, now: Instant) -> Option<Duration> {
        if count_in_window(log, now, self.window) < self.cap {
            return None;
        }
        let oldest = log
            .iter()
            .find(|stamp| now.saturating_duration_since(**stamp) < self.window)?;
        Some((*oldest + self.window).saturating_duration_since(now))
    }

    fn jitter(&self) -> Duration {
        let (min, max) = self.jitter_secs;
        Duration::from_secs_f64(rand::thread_rng().gen_range(min..=max))
    }
}

fn count_in_window(log: &VecDeque<Instant>, now: Instant, window: Duration) -> usize {
    log.iter()
        .rev()
        .take_while(|stamp| now.saturating_duration_since(**stamp) < window)
        .count()
}

fn prune(log: &mut VecDeque<Instant>, now: Instant) {
    while log
        .front()
        .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= DAY)
    {
        log.pop_front();
    }
}

/// Process-wide outbound limiter over minute, hour and day windows.
#[derive(Debug)]
pub struct OutboundRateLimiter {
    config: RateLimitConfig,
    turn: tokio::sync::Mutex<()>,
    log: Mutex<VecDeque<Instant>>,
}

impl Default for OutboundRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl OutboundRateLimiter {
    /// Creates a limiter; caps of zero are raised to one.
    pub fn new(config: RateLimitConfig) -> Self {
        let config = RateLimitConfig {
            max_per_minute: config.max_per_minute.max(1),
            max_per_hour: config.max_per_hour.max(1),
            max_per_day: config.max_per_day.max(1),
        };
        Self {
            config,
            turn: tokio::sync::Mutex::new(()),
            log: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    // Coarsest first: a daily wait can also clear the hourly and minute windows.
    fn rules(&self) -> [WindowRule; 3] {
        [
            WindowRule {
                label: "day",
                window: DAY,
                cap: self.config.max_per_day,
                jitter_secs: (1.0, 5.0),
            },
            WindowRule {
                label: "hour",
                window: HOUR,
                cap: self.config.max_per_hour,
                jitter_secs: (1.0, 10.0),
            },
            WindowRule {
                label: "minute",
                window: MINUTE,
                cap: self.config.max_per_minute,
                jitter_secs: (0.5, 3.0),
            },
        ]
    }

    /// Blocks until one more send is admissible, records it, and returns the
    /// total time spent waiting.
    pub async fn acquire(&self) -> Duration {
        let _turn = self.turn.lock().await;
        let mut waited = Duration::ZERO;

        for rule in self.rules() {
            loop {
                let required = {
                    let mut log = lock_unpoisoned(&self.log);
                    let now = Instant::now();
                    prune(&mut log, now);
                    rule.required_wait(&log, now)
                };
                let Some(required) = required else {
                    break;
                };
                let wait = required + rule.jitter();
                if rule.label == "minute" {
                    tracing::info!(
                        window = rule.label,
                        cap = rule.cap,
                        wait_secs = wait.as_secs_f64(),
                        "outbound rate limit reached"
                    );
                } else {
                    tracing::warn!(
                        window = rule.label,
                        cap = rule.cap,
                        wait_secs = wait.as_secs_f64(),
                        "outbound rate limit reached"
                    );
                }
                tokio::time::sleep(wait).await;
                waited += wait;
            }
        }

        let mut log = lock_unpoisoned(&self.log);
        let now = Instant::now();
        prune(&mut log, now);
        log.push_back(now);
        waited
    }

    /// Snapshot of recorded sends in each trailing window.
    pub fn stats(&self) -> RateLimiterStats {
        let mut log = lock_unpoisoned(&self.log);
        let now = Instant::now();
        prune(&mut log, now);
        RateLimiterStats {
            last_minute: count_in_window(&log, now, MINUTE),
            last_hour: count_in_window(&log, now, HOUR),
            last_day: count_in_window(&log, now, DAY),
        }
    }
}
