//! # Crawler Module
//!
//! Implements the engine that orchestrates a crawl.
//!
//! ## Overview
//!
//! The crawler module provides the `Engine` and the pieces it drives: the
//! pipeline manager that runs stages over requests and responses, the
//! delivery of final results to spider code, and the bundled queue-driven
//! downloader.
//!
//! ## Key Components
//!
//! - **Engine**: owns the queues, pipeline and signal bus and runs the tick
//! - **EngineHandle**: pauses, unpauses or stops an engine driven by `run()`
//! - **PipelineManager**: applies pipeline stages in their configured order
//! - **QueueDownloader**: moves requests from the scheduler to the output
//!   queue through a `Fetcher`
//!
//! ## Architecture
//!
//! Engine state is only ever touched by the engine's own loop. The downloader
//! is the single concurrent component and talks to the engine exclusively
//! through the scheduler and the output queue.

mod core;
mod pipeline_manager;
mod request_handler;
mod response_parser;

pub use self::core::{Disposition, Engine, EngineHandle};
pub use pipeline_manager::PipelineManager;
pub use request_handler::QueueDownloader;
