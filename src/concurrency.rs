//! Timer utilities for the engine's cooperative loop.
//!
//! `Ticker` is a cancellable periodic timer. Scheduling it records the period
//! only; the underlying `tokio` interval is created on the first `tick()`, so
//! the engine can be set up, paused or stopped outside a runtime. Rescheduling
//! restarts the period from the next `tick()` call.

use std::future;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

#[derive(Debug, Default)]
pub struct Ticker {
    period: Option<Duration>,
    interval: Option<Interval>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) ticking every `period`.
    pub fn schedule(&mut self, period: Duration) {
        self.period = Some(period);
        self.interval = None;
    }

    /// Stops ticking. `tick()` never completes until rescheduled.
    pub fn cancel(&mut self) {
        self.period = None;
        self.interval = None;
    }

    pub fn is_active(&self) -> bool {
        self.period.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Waits for the next tick. The first tick fires one full period after
    /// scheduling.
    pub async fn tick(&mut self) {
        let Some(period) = self.period else {
            return future::pending().await;
        };
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        interval.tick().await;
    }
}
