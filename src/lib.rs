//! # spider-engine
//!
//! A cooperative crawl engine.
//!
//! Spiders hand requests to the `Engine`, which runs them through an ordered
//! pipeline of stages and pushes them onto a priority scheduler. A downloader
//! moves them from the scheduler to the output queue at its own pace; the
//! engine drains that queue on every tick, runs each response back through the
//! pipeline and delivers it to the request's callback.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! struct MySpider;
//!
//! impl Spider for MySpider {
//!     fn name(&self) -> &str { "my-spider" }
//!     fn start_urls(&self) -> Vec<&'static str> { vec!["https://example.com"] }
//!     fn parse(&mut self, response: Response) -> Result<SpiderOutput, CrawlError> {
//!         println!("{} -> {}", response.url, response.status);
//!         Ok(SpiderOutput::new())
//!     }
//! }
//!
//! async fn run_crawler(fetcher: impl Fetcher) -> Result<(), CrawlError> {
//!     let mut engine = EngineBuilder::new(MySpider).fetcher(fetcher).build();
//!     engine.setup()?;
//!     engine.run().await
//! }
//! ```

pub mod builder;
pub mod concurrency;
pub mod config;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod extensions;
pub mod pipeline;
pub mod prelude;
pub mod queue;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod signals;
pub mod spider;
pub mod state;
pub mod stats;

pub use builder::EngineBuilder;
pub use config::EngineConfig;
pub use crawler::{Disposition, Engine, EngineHandle};
pub use downloader::{Downloader, Fetcher};
pub use error::{CrawlError, Failure};
pub use request::Request;
pub use response::Response;
pub use scheduler::PriorityScheduler;
pub use spider::{Spider, SpiderOutput};
pub use state::EngineState;

pub use async_trait::async_trait;
pub use tokio;
