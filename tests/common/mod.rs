#![allow(dead_code)]

use parking_lot::Mutex;
use spider_engine::downloader::{DownloaderContext, Fetched, OutputQueue, RequestScheduler};
use spider_engine::prelude::*;
use spider_engine::queue::Queue;
use std::sync::Arc;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Spider that records what reaches its default continuations.
pub struct Recording {
    pub seeds: Vec<&'static str>,
    pub log: Log,
}

impl Recording {
    pub fn new(log: &Log) -> Self {
        Self {
            seeds: Vec::new(),
            log: Arc::clone(log),
        }
    }

    pub fn seeded(log: &Log, seeds: Vec<&'static str>) -> Self {
        Self {
            seeds,
            log: Arc::clone(log),
        }
    }
}

impl Spider for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    fn start_urls(&self) -> Vec<&'static str> {
        self.seeds.clone()
    }

    fn parse(&mut self, response: Response) -> Result<SpiderOutput, CrawlError> {
        let origin = response
            .request()
            .map(|request| request.url.to_string())
            .unwrap_or_default();
        self.log.lock().push(format!("parse {} <- {}", response.url, origin));
        Ok(SpiderOutput::new())
    }

    fn handle_error(&mut self, failure: Failure) -> Result<SpiderOutput, CrawlError> {
        self.log.lock().push(format!("error {}", failure));
        Ok(SpiderOutput::new())
    }
}

/// How `StubDownloader::close` ends.
#[derive(Clone, Copy, Default)]
pub enum Close {
    #[default]
    Clean,
    Fail,
    Panic,
}

/// Downloader double: hands its queues out so a test can move requests by
/// hand, and records `close()`.
#[derive(Clone, Default)]
pub struct StubDownloader {
    queues: Arc<Mutex<Option<(Arc<RequestScheduler>, Arc<OutputQueue>)>>>,
    log: Option<Log>,
    close: Close,
}

impl StubDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recording(log: &Log) -> Self {
        Self {
            queues: Arc::default(),
            log: Some(Arc::clone(log)),
            close: Close::Clean,
        }
    }

    /// Factory to pass to `EngineBuilder::downloader`.
    pub fn factory(
        &self,
    ) -> impl FnOnce(DownloaderContext) -> Result<Box<dyn Downloader>, CrawlError> + Send + 'static
    {
        let this = self.clone();
        move |context| {
            *this.queues.lock() = Some((context.scheduler, context.output));
            Ok(Box::new(this) as Box<dyn Downloader>)
        }
    }

    pub fn scheduler(&self) -> Arc<RequestScheduler> {
        let queues = self.queues.lock();
        let (scheduler, _) = queues.as_ref().expect("downloader not built");
        Arc::clone(scheduler)
    }

    pub fn output(&self) -> Arc<OutputQueue> {
        let queues = self.queues.lock();
        let (_, output) = queues.as_ref().expect("downloader not built");
        Arc::clone(output)
    }

    /// Makes `close()` fail the given way after recording it.
    pub fn closing(mut self, close: Close) -> Self {
        self.close = close;
        self
    }

    /// Echoes every scheduled request back as a 200 response. Like a real
    /// downloader, it leaves the response unbound.
    pub fn pump(&self) -> usize {
        let scheduler = self.scheduler();
        let output = self.output();
        let mut moved = 0;
        while let Some(request) = scheduler.pop() {
            let response = Response::new(request.url.clone(), 200, request.url.to_string());
            output
                .push(Fetched::Response {
                    request: Arc::new(request),
                    response,
                })
                .expect("output closed");
            moved += 1;
        }
        moved
    }

    /// Pushes an unbound response for `request` with no fetch involved.
    pub fn push_response(&self, request: Request, status: u16) {
        let response = Response::new(request.url.clone(), status, "");
        self.output()
            .push(Fetched::Response {
                request: Arc::new(request),
                response,
            })
            .expect("output closed");
    }
}

impl Downloader for StubDownloader {
    fn close(&self) -> Result<(), CrawlError> {
        if let Some(log) = &self.log {
            log.lock().push("downloader closed".to_string());
        }
        match self.close {
            Close::Clean => Ok(()),
            Close::Fail => Err(CrawlError::Download("connection pool wedged".to_string())),
            Close::Panic => panic!("downloader close panicked"),
        }
    }
}

pub fn request(url: &str) -> Request {
    Request::parse(url).expect("valid url")
}
