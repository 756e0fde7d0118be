//! # Builder Module
//!
//! Provides the `EngineBuilder`, a fluent API for assembling an `Engine`.
//!
//! ## Overview
//!
//! The builder only collects parts: the spider, the configuration, a
//! downloader (or a fetcher for the bundled `QueueDownloader`), an optional
//! stats sink, pipeline stages and extensions. Nothing is constructed until
//! `Engine::setup()` runs the factories in their fixed order.
//!
//! Stages and extensions are registered under a name. Their order is the
//! registration order unless `EngineConfig::component_order` assigns an
//! explicit position; names listed in `disabled_components` are skipped. The
//! `log_stats` extension is registered by default and declines to install when
//! its interval is unset.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! let mut engine = EngineBuilder::new(MySpider)
//!     .config(EngineConfig::default())
//!     .fetcher(MyHttpFetcher::default())
//!     .add_stage("duplicate_filter", |_| Ok(Box::new(DuplicateFilter::new())))
//!     .build();
//!
//! engine.setup()?;
//! engine.run().await?;
//! ```

use crate::config::EngineConfig;
use crate::crawler::{Engine, QueueDownloader};
use crate::downloader::{Downloader, DownloaderContext, DownloaderFactory, Fetcher};
use crate::error::CrawlError;
use crate::extensions::{ExtensionContext, ExtensionFactory, LogStats};
use crate::pipeline::PipelineStage;
use crate::spider::Spider;
use crate::stats::StatsSink;
use std::collections::HashSet;
use std::sync::Arc;

pub type StageFactory =
    Box<dyn FnOnce(&EngineConfig) -> Result<Box<dyn PipelineStage>, CrawlError> + Send>;

pub type StatsFactory =
    Box<dyn FnOnce(&EngineConfig) -> Result<Arc<dyn StatsSink>, CrawlError> + Send>;

/// A named, ordered factory.
pub struct Component<F> {
    pub name: String,
    pub factory: F,
}

/// Everything `Engine::setup()` consumes.
pub(crate) struct EngineParts {
    pub(crate) downloader: Option<DownloaderFactory>,
    pub(crate) stats: Option<StatsFactory>,
    pub(crate) stages: Vec<Component<StageFactory>>,
    pub(crate) extensions: Vec<Component<ExtensionFactory>>,
}

pub struct EngineBuilder<S: Spider> {
    spider: S,
    config: EngineConfig,
    parts: EngineParts,
}

impl<S: Spider> EngineBuilder<S> {
    /// Creates a builder for `spider` with the default configuration and the
    /// `log_stats` extension.
    pub fn new(spider: S) -> Self {
        Self {
            spider,
            config: EngineConfig::default(),
            parts: EngineParts {
                downloader: None,
                stats: None,
                stages: Vec::new(),
                extensions: Vec::new(),
            },
        }
        .add_extension("log_stats", LogStats::install)
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the normal tick interval.
    pub fn queue_check_interval_ms(mut self, millis: u64) -> Self {
        self.config.queue_check_interval_ms = millis;
        self
    }

    /// Sets the tick interval used while paused.
    pub fn paused_check_interval_ms(mut self, millis: u64) -> Self {
        self.config.paused_check_interval_ms = millis;
        self
    }

    /// Sets the maximum number of concurrent downloads.
    pub fn max_concurrent_downloads(mut self, limit: usize) -> Self {
        self.config.max_concurrent_downloads = limit;
        self
    }

    /// Uses the bundled `QueueDownloader` with `fetcher`.
    pub fn fetcher<F: Fetcher>(self, fetcher: F) -> Self {
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        self.downloader(move |context| {
            let downloader: Box<dyn Downloader> =
                Box::new(QueueDownloader::spawn(fetcher, context)?);
            Ok(downloader)
        })
    }

    /// Uses a custom downloader built from the engine's queues.
    pub fn downloader<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(DownloaderContext) -> Result<Box<dyn Downloader>, CrawlError> + Send + 'static,
    {
        self.parts.downloader = Some(Box::new(factory));
        self
    }

    /// Replaces the default `StatCollector`.
    pub fn stats<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&EngineConfig) -> Result<Arc<dyn StatsSink>, CrawlError> + Send + 'static,
    {
        self.parts.stats = Some(Box::new(factory));
        self
    }

    /// Adds a pipeline stage.
    pub fn add_stage<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce(&EngineConfig) -> Result<Box<dyn PipelineStage>, CrawlError> + Send + 'static,
    {
        self.parts.stages.push(Component {
            name: name.into(),
            factory: Box::new(factory),
        });
        self
    }

    /// Adds an extension.
    pub fn add_extension<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce(&mut ExtensionContext<'_>) -> Result<(), CrawlError> + Send + 'static,
    {
        self.parts.extensions.push(Component {
            name: name.into(),
            factory: Box::new(factory),
        });
        self
    }

    pub fn build(self) -> Engine<S> {
        Engine::new(self.spider, self.config, self.parts)
    }
}

/// Checks that every name in `component_order` refers to a registered
/// component.
pub(crate) fn validate_component_order(
    config: &EngineConfig,
    names: &[&str],
) -> Result<(), CrawlError> {
    let known: HashSet<&str> = names.iter().copied().collect();
    let mut unknown: Vec<&str> = config
        .component_order
        .keys()
        .map(String::as_str)
        .filter(|name| !known.contains(name))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    Err(CrawlError::Configuration(format!(
        "component_order names unknown components: {}",
        unknown.join(", ")
    )))
}

/// Drops disabled components and sorts the rest by configured order, then
/// registration order.
pub(crate) fn order_components<F>(
    components: Vec<Component<F>>,
    config: &EngineConfig,
) -> Vec<Component<F>> {
    let mut ordered: Vec<(i32, Component<F>)> = components
        .into_iter()
        .enumerate()
        .filter(|(_, component)| !config.is_disabled(&component.name))
        .map(|(index, component)| {
            let default_order = i32::try_from(index)
                .unwrap_or(i32::MAX / 100)
                .saturating_add(1)
                .saturating_mul(100);
            let order = config
                .component_order
                .get(&component.name)
                .copied()
                .unwrap_or(default_order);
            (order, component)
        })
        .collect();
    ordered.sort_by_key(|(order, _)| *order);
    ordered.into_iter().map(|(_, component)| component).collect()
}
