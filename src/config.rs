//! Engine configuration.
//!
//! `EngineConfig` is plain data: every field has a default, it deserializes
//! from JSON with missing fields filled in, and it is validated once, when the
//! engine is set up. Loading and merging settings from files is left to the
//! caller.

use crate::error::CrawlError;
use crate::scheduler::{PriorityOrder, TieBreak};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tick interval while running.
    pub queue_check_interval_ms: u64,
    /// Tick interval while paused.
    pub paused_check_interval_ms: u64,
    pub priority_order: PriorityOrder,
    pub tie_break: TieBreak,
    /// Run responses through the stages in reverse order.
    pub symmetric_pipeline: bool,
    pub max_concurrent_downloads: usize,
    /// How long the bundled downloader waits when the scheduler is empty.
    pub downloader_poll_interval_ms: u64,
    /// `None` or `0` disables periodic stats logging.
    pub log_stats_interval_secs: Option<u64>,
    /// Overrides the registration order of stages and extensions by name.
    /// Lower values run first.
    pub component_order: HashMap<String, i32>,
    /// Stages and extensions that are never installed.
    pub disabled_components: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            queue_check_interval_ms: 100,
            paused_check_interval_ms: 5_000,
            priority_order: PriorityOrder::default(),
            tie_break: TieBreak::default(),
            symmetric_pipeline: true,
            max_concurrent_downloads: num_cpus::get().max(16),
            downloader_poll_interval_ms: 10,
            log_stats_interval_secs: Some(60),
            component_order: HashMap::new(),
            disabled_components: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, CrawlError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn queue_check_interval(&self) -> Duration {
        Duration::from_millis(self.queue_check_interval_ms)
    }

    pub fn paused_check_interval(&self) -> Duration {
        Duration::from_millis(self.paused_check_interval_ms)
    }

    pub fn downloader_poll_interval(&self) -> Duration {
        Duration::from_millis(self.downloader_poll_interval_ms)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled_components.iter().any(|disabled| disabled == name)
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.queue_check_interval_ms == 0 {
            return Err(CrawlError::Configuration(
                "queue_check_interval_ms must be greater than 0.".to_string(),
            ));
        }
        if self.paused_check_interval_ms == 0 {
            return Err(CrawlError::Configuration(
                "paused_check_interval_ms must be greater than 0.".to_string(),
            ));
        }
        if self.max_concurrent_downloads == 0 {
            return Err(CrawlError::Configuration(
                "max_concurrent_downloads must be greater than 0.".to_string(),
            ));
        }
        if self.downloader_poll_interval_ms == 0 {
            return Err(CrawlError::Configuration(
                "downloader_poll_interval_ms must be greater than 0.".to_string(),
            ));
        }
        Ok(())
    }
}
