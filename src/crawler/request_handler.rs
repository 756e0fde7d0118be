//! Contains the bundled downloader.
//!
//! `QueueDownloader` runs one driver task that keeps pulling requests from the
//! scheduler while download permits are available, spawning one task per
//! fetch. Each finished fetch pushes either `Fetched::Response` or
//! `Fetched::Failed` onto the output queue, where the engine picks it up on
//! its next tick.
//!
//! Concurrency is bounded by a `tokio` semaphore sized from
//! `max_concurrent_downloads`. When the scheduler is empty the driver sleeps
//! for `downloader_poll_interval_ms` before looking again.
//!
//! Responses are pushed unbound, together with their request; the engine does
//! the binding. `in_flight()` counts a request from the moment it is popped
//! until its task finishes or is aborted.
//!
//! `close()` closes the semaphore and aborts the driver task; in-flight fetches
//! are aborted with it.

use crate::downloader::{
    Downloader, DownloaderContext, Fetched, Fetcher, OutputQueue, RequestScheduler,
};
use crate::error::{CrawlError, Failure};
use crate::queue::Queue;
use crate::stats::{StatsSink, keys};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, trace, warn};

pub struct QueueDownloader {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    driver: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl QueueDownloader {
    /// Spawns the driver task on the current `tokio` runtime.
    pub fn spawn(fetcher: Arc<dyn Fetcher>, context: DownloaderContext) -> Result<Self, CrawlError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            CrawlError::Configuration(format!("QueueDownloader needs a tokio runtime: {}", e))
        })?;

        let max_concurrent_downloads = context.config.max_concurrent_downloads;
        let semaphore = Arc::new(Semaphore::new(max_concurrent_downloads));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let driver = runtime.spawn(drive(
            fetcher,
            context.scheduler,
            context.output,
            context.stats,
            Arc::clone(&semaphore),
            Arc::clone(&in_flight),
            context.config.downloader_poll_interval(),
        ));
        debug!(
            "Downloader started with max_concurrent_downloads: {}",
            max_concurrent_downloads
        );

        Ok(Self {
            semaphore,
            in_flight,
            driver: Mutex::new(Some(driver)),
            closed: AtomicBool::new(false),
        })
    }
}

impl Downloader for QueueDownloader {
    fn close(&self) -> Result<(), CrawlError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            trace!("Downloader already closed");
            return Ok(());
        }
        self.semaphore.close();
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        debug!(
            "Downloader closed with {} fetch(es) in flight",
            self.in_flight.load(Ordering::SeqCst)
        );
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for QueueDownloader {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.abort();
        }
    }
}

// Counts one fetch as in flight for as long as it lives. Dropping it, on
// completion or when the task is aborted, releases the count.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn drive(
    fetcher: Arc<dyn Fetcher>,
    scheduler: Arc<RequestScheduler>,
    output: Arc<OutputQueue>,
    stats: Arc<dyn StatsSink>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    poll_interval: Duration,
) {
    let mut tasks = JoinSet::new();

    loop {
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    error!("A download task failed: {:?}", e);
                }
            }
        }

        if scheduler.is_closed() {
            trace!("Scheduler closed, exiting downloader task");
            break;
        }

        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                trace!("Download semaphore closed, exiting downloader task");
                break;
            }
        };

        // Counted before the pop so a popped request is never invisible.
        let guard = InFlight::enter(&in_flight);
        let Some(request) = scheduler.pop() else {
            drop(guard);
            drop(permit);
            tokio::time::sleep(poll_interval).await;
            continue;
        };

        let request = Arc::new(request);
        let fetcher = Arc::clone(&fetcher);
        let output = Arc::clone(&output);
        let stats = Arc::clone(&stats);

        tasks.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            trace!("Fetching {}", request.url);
            stats.inc_value(keys::DOWNLOADER_REQUESTS, 1);

            let fetched = match fetcher.fetch(Arc::clone(&request)).await {
                Ok(response) => {
                    stats.inc_value(keys::DOWNLOADER_BYTES, response.body.len());
                    stats.inc_value(
                        &format!("{}{}", keys::DOWNLOADER_STATUS_PREFIX, response.status),
                        1,
                    );
                    Fetched::Response {
                        request: Arc::clone(&request),
                        response,
                    }
                }
                Err(e) => {
                    error!("Download error for URL {}: {}", request.url, e);
                    stats.inc_value(keys::DOWNLOADER_EXCEPTIONS, 1);
                    Fetched::Failed(Failure::new(Some(Arc::clone(&request)), e))
                }
            };

            if output.push(fetched).is_err() {
                warn!("Output queue closed, discarding result for {}", request.url);
            }
        });
    }

    trace!("Downloader task finished");
}
