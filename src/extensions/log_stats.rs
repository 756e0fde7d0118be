//! Periodically logs crawl progress.
//!
//! Counts downloaded and received responses through the signal bus and, every
//! `log_stats_interval_secs` while the engine runs, logs the totals together
//! with the per-minute rate over the last interval. Declines to install when
//! the interval is unset or zero.

use super::ExtensionContext;
use crate::config::EngineConfig;
use crate::error::CrawlError;
use crate::signals::{Signal, SignalBus, SignalKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Default)]
struct Counters {
    downloaded: AtomicUsize,
    received: AtomicUsize,
    downloaded_prev: AtomicUsize,
    received_prev: AtomicUsize,
}

#[derive(Clone)]
pub struct LogStats {
    interval: Duration,
    counters: Arc<Counters>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl LogStats {
    pub fn new(config: &EngineConfig) -> Result<Self, CrawlError> {
        let secs = config
            .log_stats_interval_secs
            .filter(|secs| *secs > 0)
            .ok_or_else(|| {
                CrawlError::NotConfigured("log_stats: log_stats_interval_secs is not set".into())
            })?;
        Ok(Self {
            interval: Duration::from_secs(secs),
            counters: Arc::new(Counters::default()),
            task: Arc::new(Mutex::new(None)),
        })
    }

    /// Extension factory entry point.
    pub fn install(context: &mut ExtensionContext<'_>) -> Result<(), CrawlError> {
        let extension = Self::new(context.config)?;
        extension.connect(context.signals);
        Ok(())
    }

    pub fn connect(&self, bus: &mut SignalBus) {
        let this = self.clone();
        bus.connect(SignalKind::EngineStarted, move |_| this.start());
        let this = self.clone();
        bus.connect(SignalKind::EngineStopped, move |_| this.stop());
        let counters = Arc::clone(&self.counters);
        bus.connect(SignalKind::ResponseDownloaded, move |signal| {
            if let Signal::ResponseDownloaded { .. } = signal {
                counters.downloaded.fetch_add(1, Ordering::Relaxed);
            }
        });
        let counters = Arc::clone(&self.counters);
        bus.connect(SignalKind::ResponseReceived, move |signal| {
            if let Signal::ResponseReceived { .. } = signal {
                counters.received.fetch_add(1, Ordering::Relaxed);
            }
        });
    }

    fn start(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available, periodic stats logging disabled");
            return;
        };
        let this = self.clone();
        let period = self.interval;
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                info!("{}", this.report());
            }
        });
        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn is_logging(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Builds the progress line and starts a new measuring interval.
    pub fn report(&self) -> String {
        let multiplier = 60.0 / self.interval.as_secs_f64();
        let received = self.counters.received.load(Ordering::Relaxed);
        let downloaded = self.counters.downloaded.load(Ordering::Relaxed);
        let received_prev = self.counters.received_prev.swap(received, Ordering::Relaxed);
        let downloaded_prev = self
            .counters
            .downloaded_prev
            .swap(downloaded, Ordering::Relaxed);

        let received_speed = (received - received_prev) as f64 * multiplier;
        let downloaded_speed = (downloaded - downloaded_prev) as f64 * multiplier;
        format!(
            "Crawled {} pages (at {} pages/min). Raw speed {} downloads/min.",
            received, received_speed as u64, downloaded_speed as u64
        )
    }
}
