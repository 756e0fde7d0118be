//! A "prelude" for users of the `spider-engine` crate.
//!
//! This prelude re-exports the most commonly used traits and structs so that
//! they can be easily imported.
//!
//! # Example
//!
//! ```
//! use spider_engine::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Disposition,
    Engine,
    EngineBuilder,
    EngineConfig,
    EngineHandle,
    Request,
    Response,
    SpiderOutput,
    // Core traits
    Downloader,
    Fetcher,
    Spider,
    // Errors
    CrawlError,
    Failure,
    // Essential re-exports for trait implementation
    async_trait,
};

pub use crate::pipeline::{DuplicateFilter, PipelineStage, RequestAction, ResponseAction};
pub use crate::signals::{Signal, SignalKind};
pub use crate::stats::{StatCollector, StatsSink};
