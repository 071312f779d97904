//! Countdowns between cycles.
//!
//! A [`Countdown`] is a target instant polled once per second so the
//! remaining time can be surfaced while waiting. Waiting is cancelled as
//! soon as the engine's token fires.

use core_logic::random_duration;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::DailyConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownKind {
    /// Full cycle delay plus jitter
    Cycle,
    /// Short retry after a cycle without progress
    Retry,
    /// Login failed at cycle start
    RetryLogin,
}

impl fmt::Display for CountdownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountdownKind::Cycle => write!(f, "Cycle"),
            CountdownKind::Retry => write!(f, "Retry"),
            CountdownKind::RetryLogin => write!(f, "Retry Login"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub target: Instant,
    pub kind: CountdownKind,
}

impl Countdown {
    pub fn after(delay: Duration, kind: CountdownKind) -> Self {
        Self {
            target: Instant::now() + delay,
            kind,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.target.saturating_duration_since(Instant::now())
    }

    /// Waits for the target, calling `on_tick` with the remaining time about
    /// once per second. Returns `false` if cancelled first.
    pub async fn wait<F>(&self, token: &CancellationToken, mut on_tick: F) -> bool
    where
        F: FnMut(Duration),
    {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep_until(self.target);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = &mut deadline => return true,
                _ = ticker.tick() => {
                    let remaining = self.remaining();
                    if remaining.is_zero() {
                        return true;
                    }
                    on_tick(remaining);
                }
            }
        }
    }
}

/// `Next Cycle: 23h 59m 58s`
pub fn format_remaining(kind: CountdownKind, remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!(
        "Next {}: {}h {}m {}s",
        kind,
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// Per-engine cycle scheduling with a jitter that is drawn once and held
/// until the cycle it delays actually starts.
#[derive(Debug, Clone)]
pub struct CycleScheduler {
    cycle: Duration,
    jitter_min: Duration,
    jitter_max: Duration,
    jitter: Option<Duration>,
}

impl CycleScheduler {
    pub fn new(cycle: Duration, jitter_min: Duration, jitter_max: Duration) -> Self {
        Self {
            cycle,
            jitter_min,
            jitter_max,
            jitter: None,
        }
    }

    pub fn from_config(config: &DailyConfig) -> Self {
        let (jitter_min, jitter_max) = config.jitter_bounds();
        Self::new(config.cycle_duration(), jitter_min, jitter_max)
    }

    pub fn jitter(&self) -> Option<Duration> {
        self.jitter
    }

    /// Picks up new bounds; an already drawn jitter is kept.
    pub fn reconfigure(&mut self, config: &DailyConfig) {
        self.cycle = config.cycle_duration();
        (self.jitter_min, self.jitter_max) = config.jitter_bounds();
    }

    /// Countdown to `now + cycle + jitter`, drawing the jitter if unset.
    pub fn next_cycle(&mut self) -> Countdown {
        let (min, max) = (self.jitter_min, self.jitter_max);
        let jitter = *self.jitter.get_or_insert_with(|| random_duration(min, max));
        Countdown::after(self.cycle + jitter, CountdownKind::Cycle)
    }

    pub fn fixed(delay: Duration, kind: CountdownKind) -> Countdown {
        Countdown::after(delay, kind)
    }

    /// Called when `expired` ran out, right before the next cycle starts.
    pub fn begin_cycle(&mut self, expired: CountdownKind) {
        if expired == CountdownKind::Cycle {
            self.jitter = None;
        }
    }
}
