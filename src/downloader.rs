//! The downloader contract.
//!
//! The engine never calls into a downloader to fetch anything. A downloader is
//! handed the scheduler and the output queue when it is built, pulls requests
//! from the former at its own pace and concurrency, and pushes each result
//! onto the latter. The only thing the engine asks of it directly is
//! `close()`, during shutdown.
//!
//! `QueueDownloader` (in `crawler::request_handler`) is the bundled
//! implementation; it delegates the actual fetch to a [`Fetcher`].

use crate::config::EngineConfig;
use crate::error::{CrawlError, Failure};
use crate::queue::MemoryQueue;
use crate::request::Request;
use crate::response::Response;
use crate::scheduler::PriorityScheduler;
use crate::stats::StatsSink;
use async_trait::async_trait;
use std::sync::Arc;

/// Scheduler holding requests awaiting a fetch.
pub type RequestScheduler = PriorityScheduler<Request>;

/// Queue of fetch results awaiting the engine's tick.
pub type OutputQueue = MemoryQueue<Fetched>;

/// One entry of the output queue.
#[derive(Debug)]
pub enum Fetched {
    /// A fetched response and the request it was fetched for. The engine
    /// binds the two when it takes the entry off the queue.
    Response {
        request: Arc<Request>,
        response: Response,
    },
    /// The fetch itself failed; delivered straight to the failure continuation.
    Failed(Failure),
}

pub trait Downloader: Send + Sync {
    /// Stops accepting work and releases resources. Idempotent.
    fn close(&self) -> Result<(), CrawlError>;

    /// Number of fetches currently in progress.
    fn in_flight(&self) -> usize {
        0
    }
}

/// Performs a single fetch.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, request: Arc<Request>) -> Result<Response, CrawlError>;
}

/// Everything a downloader is built from.
pub struct DownloaderContext {
    pub scheduler: Arc<RequestScheduler>,
    pub output: Arc<OutputQueue>,
    pub stats: Arc<dyn StatsSink>,
    pub config: EngineConfig,
}

pub type DownloaderFactory =
    Box<dyn FnOnce(DownloaderContext) -> Result<Box<dyn Downloader>, CrawlError> + Send>;
