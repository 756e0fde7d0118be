//! # Statistics Module
//!
//! Collects counters about the engine's operation.
//!
//! ## Overview
//!
//! Stats are plain named counters (`engine/response_received_count`,
//! `downloader/exception_count`, ...). The engine talks to them through the
//! `StatsSink` trait so a different sink can be plugged in at build time; the
//! bundled `StatCollector` keeps them in a `DashMap` so the downloader's tasks
//! can update counters while the engine ticks.
//!
//! Per-item signal counts are fed through the signal bus (see
//! [`connect_signals`]); drops and faults are counted by the engine directly.
//! `dump_stats` is called exactly once, during `stop()`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::stats::{StatCollector, StatsSink, keys};
//!
//! let stats = StatCollector::new();
//! stats.inc_value(keys::RESPONSES_RECEIVED, 1);
//! println!("{}", stats.to_markdown_string());
//! ```

use crate::error::CrawlError;
use crate::signals::{Signal, SignalBus, SignalKind};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Well-known stat names.
pub mod keys {
    pub const REQUESTS_RECEIVED: &str = "engine/request_received_count";
    pub const REQUESTS_DROPPED: &str = "engine/request_dropped_count";
    pub const REQUESTS_FAILED: &str = "engine/request_error_count";
    pub const REQUESTS_RESCHEDULED: &str = "engine/request_rescheduled_count";
    pub const RESPONSES_SHORT_CIRCUITED: &str = "engine/response_short_circuit_count";
    pub const RESPONSES_DOWNLOADED: &str = "engine/response_downloaded_count";
    pub const RESPONSES_RECEIVED: &str = "engine/response_received_count";
    pub const RESPONSES_DROPPED: &str = "engine/response_dropped_count";
    pub const RESPONSES_FAILED: &str = "engine/response_error_count";
    pub const QUEUE_REJECTED: &str = "engine/queue_rejected_count";
    pub const SPIDER_CALLBACK_ERRORS: &str = "spider/callback_error_count";
    pub const SPIDER_ERRORS: &str = "spider/error_count";
    pub const DOWNLOADER_REQUESTS: &str = "downloader/request_count";
    pub const DOWNLOADER_EXCEPTIONS: &str = "downloader/exception_count";
    pub const DOWNLOADER_BYTES: &str = "downloader/response_bytes";
    pub const DOWNLOADER_STATUS_PREFIX: &str = "downloader/response_status_count/";
}

/// Sink for engine statistics.
pub trait StatsSink: Send + Sync {
    fn inc_value(&self, key: &str, count: usize);

    fn set_value(&self, key: &str, value: usize);

    fn get_value(&self, key: &str) -> Option<usize>;

    /// Flushes the collected stats. Called once, at shutdown.
    fn dump_stats(&self);
}

/// Subscribes `stats` to the per-item signals it counts.
pub fn connect_signals(stats: &Arc<dyn StatsSink>, bus: &mut SignalBus) {
    for kind in [
        SignalKind::RequestReceived,
        SignalKind::ResponseDownloaded,
        SignalKind::ResponseReceived,
    ] {
        let stats = Arc::clone(stats);
        bus.connect(kind, move |signal| match signal {
            Signal::RequestReceived { .. } => stats.inc_value(keys::REQUESTS_RECEIVED, 1),
            Signal::ResponseDownloaded { .. } => stats.inc_value(keys::RESPONSES_DOWNLOADED, 1),
            Signal::ResponseReceived { .. } => stats.inc_value(keys::RESPONSES_RECEIVED, 1),
            _ => {}
        });
    }
}

// Point-in-time copy used by the presentation methods.
struct StatsSnapshot {
    values: BTreeMap<String, usize>,
    elapsed: Duration,
}

impl StatsSnapshot {
    fn get(&self, key: &str) -> usize {
        self.values.get(key).copied().unwrap_or(0)
    }

    fn per_minute(&self, key: &str) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.get(key) as f64 * 60.0 / seconds
        } else {
            0.0
        }
    }

    fn formatted_bytes(&self) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * KB;
        const GB: usize = 1024 * MB;

        let bytes = self.get(keys::DOWNLOADER_BYTES);
        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }

    fn status_counts(&self) -> Vec<(&str, usize)> {
        self.values
            .iter()
            .filter_map(|(key, count)| {
                key.strip_prefix(keys::DOWNLOADER_STATUS_PREFIX)
                    .map(|code| (code, *count))
            })
            .collect()
    }
}

/// Default in-memory stats sink.
#[derive(Debug)]
pub struct StatCollector {
    start_time: Instant,
    values: DashMap<String, usize>,
    dumped: AtomicBool,
}

impl StatCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            values: DashMap::new(),
            dumped: AtomicBool::new(false),
        }
    }

    /// Records one response with `status`.
    pub fn record_response_status(&self, status: u16) {
        self.inc_value(&format!("{}{}", keys::DOWNLOADER_STATUS_PREFIX, status), 1);
    }

    /// Whether `dump_stats` has already run.
    pub fn is_dumped(&self) -> bool {
        self.dumped.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            values: self
                .values
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            elapsed: self.start_time.elapsed(),
        }
    }

    pub fn to_json_string(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string(&self.snapshot().values)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string_pretty(&self.snapshot().values)?)
    }

    pub fn to_markdown_string(&self) -> String {
        let snapshot = self.snapshot();
        let rows: String = snapshot
            .values
            .iter()
            .map(|(key, value)| format!("| {} | {} |", key, value))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"# Crawl Statistics Report

- **Duration**: {:?}
- **Speed**: {:.2} responses/min, {:.2} downloads/min
- **Downloaded**: {}

| Stat | Value |
|------|-------|
{}
"#,
            snapshot.elapsed,
            snapshot.per_minute(keys::RESPONSES_RECEIVED),
            snapshot.per_minute(keys::RESPONSES_DOWNLOADED),
            snapshot.formatted_bytes(),
            rows
        )
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSink for StatCollector {
    fn inc_value(&self, key: &str, count: usize) {
        *self.values.entry(key.to_string()).or_insert(0) += count;
    }

    fn set_value(&self, key: &str, value: usize) {
        self.values.insert(key.to_string(), value);
    }

    fn get_value(&self, key: &str) -> Option<usize> {
        self.values.get(key).map(|value| *value)
    }

    fn dump_stats(&self) {
        if self.dumped.swap(true, Ordering::SeqCst) {
            warn!("Stats were already dumped, ignoring repeated dump");
            return;
        }
        info!("Dumping crawl stats:{}", self);
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {:?}", snapshot.elapsed)?;
        writeln!(
            f,
            "  requests : received: {}, dropped: {}, failed: {}, rescheduled: {}",
            snapshot.get(keys::REQUESTS_RECEIVED),
            snapshot.get(keys::REQUESTS_DROPPED),
            snapshot.get(keys::REQUESTS_FAILED),
            snapshot.get(keys::REQUESTS_RESCHEDULED)
        )?;
        writeln!(
            f,
            "  response : downloaded: {}, received: {}, short-circuit: {}, dropped: {}, failed: {}",
            snapshot.get(keys::RESPONSES_DOWNLOADED),
            snapshot.get(keys::RESPONSES_RECEIVED),
            snapshot.get(keys::RESPONSES_SHORT_CIRCUITED),
            snapshot.get(keys::RESPONSES_DROPPED),
            snapshot.get(keys::RESPONSES_FAILED)
        )?;
        writeln!(
            f,
            "  download : requests: {}, exceptions: {}, bytes: {}",
            snapshot.get(keys::DOWNLOADER_REQUESTS),
            snapshot.get(keys::DOWNLOADER_EXCEPTIONS),
            snapshot.formatted_bytes()
        )?;
        writeln!(
            f,
            "  spider   : callback errors: {}, unhandled errors: {}",
            snapshot.get(keys::SPIDER_CALLBACK_ERRORS),
            snapshot.get(keys::SPIDER_ERRORS)
        )?;

        let status_counts = snapshot.status_counts();
        let status_string = if status_counts.is_empty() {
            "none".to_string()
        } else {
            status_counts
                .iter()
                .map(|(code, count)| format!("{}: {}", code, count))
                .collect::<Vec<String>>()
                .join(", ")
        };

        writeln!(f, "  status   : {}\n", status_string)
    }
}
