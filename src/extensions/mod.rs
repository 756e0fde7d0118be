//! Extensions hook into the engine through its signal bus.
//!
//! An extension is installed by a factory that receives an
//! `ExtensionContext` during `setup()`, after the stats sink and the queues
//! exist and before the pipeline is built. It subscribes whatever handlers it
//! needs and keeps its own state alive inside them. A factory that returns
//! `CrawlError::NotConfigured` is skipped.

pub mod log_stats;

pub use log_stats::LogStats;

use crate::config::EngineConfig;
use crate::error::CrawlError;
use crate::signals::SignalBus;
use crate::stats::StatsSink;
use std::sync::Arc;

pub struct ExtensionContext<'a> {
    pub config: &'a EngineConfig,
    pub signals: &'a mut SignalBus,
    pub stats: Arc<dyn StatsSink>,
}

pub type ExtensionFactory =
    Box<dyn FnOnce(&mut ExtensionContext<'_>) -> Result<(), CrawlError> + Send>;
