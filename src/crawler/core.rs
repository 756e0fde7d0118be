//! The `Engine`, the central orchestrator of a crawl.
//!
//! The engine owns the signal bus, the stats sink, the request scheduler, the
//! output queue, the downloader and the pipeline. All of its own work happens
//! on one cooperative loop:
//!
//! - `download(request)` is the only way work enters the engine. The request
//!   runs through the pipeline's request chain and is then either scheduled,
//!   answered directly through the output queue, or dropped.
//! - The downloader moves requests from the scheduler to the output queue on
//!   its own tasks.
//! - On every tick, `process_queue()` drains the output queue. Each response
//!   is bound to the request it was fetched for, runs through the response
//!   chain and is delivered to the spider, rescheduled or dropped.
//!
//! Faults raised by stages, continuations or signal handlers are isolated to
//! the item that caused them; a tick never aborts half way.
//!
//! `run()` drives the tick with a `Ticker` and listens for commands sent
//! through an `EngineHandle`. Tests and embedders that want full control can
//! call `process_queue()` directly instead.

use crate::builder::{Component, EngineParts, order_components, validate_component_order};
use crate::concurrency::Ticker;
use crate::config::EngineConfig;
use crate::crawler::pipeline_manager::PipelineManager;
use crate::crawler::response_parser::{deliver_failure, deliver_response, guard};
use crate::downloader::{Downloader, DownloaderContext, Fetched, OutputQueue, RequestScheduler};
use crate::error::{CrawlError, Failure};
use crate::extensions::ExtensionContext;
use crate::pipeline::{RequestOutcome, ResponseOutcome};
use crate::queue::Queue;
use crate::request::Request;
use crate::response::Response;
use crate::signals::{Signal, SignalBus};
use crate::spider::{Spider, SpiderOutput};
use crate::state::EngineState;
use crate::stats::{self, StatCollector, StatsSink, keys};
use kanal::{AsyncReceiver, AsyncSender, unbounded_async};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// What `download` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A stage dropped it.
    Dropped,
    /// Pushed onto the scheduler.
    Scheduled,
    /// A stage answered it; the response was pushed onto the output queue.
    ShortCircuited,
    /// The request chain faulted; the failure continuation was called.
    Failed,
    /// The target queue was closed.
    Rejected,
}

#[derive(Debug)]
enum Command {
    Pause,
    Unpause,
    Stop(String),
}

enum LoopEvent {
    Tick,
    Command(Command),
}

/// Cloneable remote control for an engine driven by `Engine::run`.
#[derive(Clone)]
pub struct EngineHandle {
    commands: AsyncSender<Command>,
}

impl EngineHandle {
    pub async fn pause(&self) -> Result<(), CrawlError> {
        self.send(Command::Pause).await
    }

    pub async fn unpause(&self) -> Result<(), CrawlError> {
        self.send(Command::Unpause).await
    }

    pub async fn stop(&self, reason: impl Into<String>) -> Result<(), CrawlError> {
        self.send(Command::Stop(reason.into())).await
    }

    async fn send(&self, command: Command) -> Result<(), CrawlError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CrawlError::EngineClosed)
    }
}

// Everything built by `setup()`.
struct Components {
    signals: SignalBus,
    stats: Arc<dyn StatsSink>,
    scheduler: Arc<RequestScheduler>,
    output: Arc<OutputQueue>,
    downloader: Box<dyn Downloader>,
    extensions: Vec<String>,
    pipeline: PipelineManager,
}

pub struct Engine<S: Spider> {
    spider: S,
    config: EngineConfig,
    state: EngineState,
    ticker: Ticker,
    pending: Option<EngineParts>,
    parts: Option<Components>,
    commands_tx: AsyncSender<Command>,
    commands_rx: AsyncReceiver<Command>,
}

impl<S: Spider> Engine<S> {
    pub(crate) fn new(spider: S, config: EngineConfig, pending: EngineParts) -> Self {
        let (commands_tx, commands_rx) = unbounded_async();
        Engine {
            spider,
            config,
            state: EngineState::NotStarted,
            ticker: Ticker::new(),
            pending: Some(pending),
            parts: None,
            commands_tx,
            commands_rx,
        }
    }

    /// Builds every component, in order: signal bus, stats sink, scheduler
    /// and output queue and downloader, extensions, pipeline.
    ///
    /// Components whose factory returns `CrawlError::NotConfigured` are
    /// skipped. Any other error aborts setup.
    pub fn setup(&mut self) -> Result<(), CrawlError> {
        let Some(pending) = self.pending.as_ref() else {
            return Err(CrawlError::AlreadySetUp);
        };
        self.config.validate()?;
        let names: Vec<&str> = pending
            .stages
            .iter()
            .map(|c| c.name.as_str())
            .chain(pending.extensions.iter().map(|c| c.name.as_str()))
            .collect();
        validate_component_order(&self.config, &names)?;

        let Some(EngineParts {
            downloader,
            stats,
            stages,
            extensions,
        }) = self.pending.take()
        else {
            return Err(CrawlError::AlreadySetUp);
        };

        let mut signals = SignalBus::new();

        let stats: Arc<dyn StatsSink> = match stats {
            Some(factory) => factory(&self.config)?,
            None => Arc::new(StatCollector::new()),
        };
        stats::connect_signals(&stats, &mut signals);

        let scheduler = Arc::new(RequestScheduler::with_policy(
            self.config.priority_order,
            self.config.tie_break,
        ));
        let output = Arc::new(OutputQueue::new());
        let downloader_factory = downloader.ok_or_else(|| {
            CrawlError::Configuration("no downloader or fetcher configured".to_string())
        })?;
        let downloader = downloader_factory(DownloaderContext {
            scheduler: Arc::clone(&scheduler),
            output: Arc::clone(&output),
            stats: Arc::clone(&stats),
            config: self.config.clone(),
        })?;
        debug!(
            "Scheduler ready ({:?}, {:?} ties), downloader installed",
            self.config.priority_order, self.config.tie_break
        );

        let mut installed_extensions = Vec::new();
        for Component { name, factory } in order_components(extensions, &self.config) {
            let mut context = ExtensionContext {
                config: &self.config,
                signals: &mut signals,
                stats: Arc::clone(&stats),
            };
            match factory(&mut context) {
                Ok(()) => {
                    debug!("Extension '{}' installed", name);
                    installed_extensions.push(name);
                }
                Err(e) if e.is_not_configured() => {
                    info!("Extension '{}' not installed: {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }

        let mut installed_stages = Vec::new();
        for Component { name, factory } in order_components(stages, &self.config) {
            match factory(&self.config) {
                Ok(stage) => {
                    debug!("Pipeline stage '{}' installed", name);
                    installed_stages.push(stage);
                }
                Err(e) if e.is_not_configured() => {
                    info!("Pipeline stage '{}' not installed: {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }
        let pipeline = PipelineManager::new(installed_stages, self.config.symmetric_pipeline);

        info!(
            "Engine set up for spider '{}' with {} stage(s) and {} extension(s)",
            self.spider.name(),
            pipeline.len(),
            installed_extensions.len()
        );

        self.parts = Some(Components {
            signals,
            stats,
            scheduler,
            output,
            downloader,
            extensions: installed_extensions,
            pipeline,
        });
        Ok(())
    }

    /// Emits `engine_started`, starts ticking and feeds the spider's seed
    /// requests through `download`.
    pub fn start(&mut self) -> Result<(), CrawlError> {
        if self.parts.is_none() {
            return Err(CrawlError::NotSetUp);
        }
        if self.state != EngineState::NotStarted {
            return Err(self.invalid_state("start"));
        }
        self.state = EngineState::Running;
        if let Some(parts) = self.parts.as_mut() {
            emit(&mut parts.signals, Signal::EngineStarted);
        }
        self.ticker.schedule(self.config.queue_check_interval());
        info!("Engine started for spider '{}'", self.spider.name());

        let seeds = match guard("start_requests", || self.spider.start_requests()) {
            Ok(seeds) => seeds,
            Err(e) => {
                error!("Failed to create start requests: {}", e);
                self.count(keys::SPIDER_ERRORS);
                Vec::new()
            }
        };
        debug!("Seeding {} start request(s)", seeds.len());
        for request in seeds {
            self.download(request);
        }
        Ok(())
    }

    /// Shuts the engine down. Stopping an already stopped engine does
    /// nothing.
    ///
    /// Teardown is best effort: a failing downloader close is logged and the
    /// remaining steps still run, so `engine_stopped` is always emitted.
    pub fn stop(&mut self, reason: &str) -> Result<(), CrawlError> {
        match self.state {
            EngineState::Stopped => {
                trace!("Engine already stopped, ignoring stop ({})", reason);
                return Ok(());
            }
            EngineState::NotStarted => return Err(self.invalid_state("stop")),
            EngineState::Running | EngineState::Paused => {}
        }
        let Some(parts) = self.parts.as_mut() else {
            return Err(CrawlError::NotSetUp);
        };

        debug!("Stopping engine ({})", reason);
        emit(&mut parts.signals, Signal::EngineStopping);
        self.state = EngineState::Stopped;
        self.ticker.cancel();

        if let Err(e) = guard("downloader close", || parts.downloader.close()) {
            warn!("Failed to close downloader: {}", e);
        }
        parts.scheduler.close();
        parts.output.close();

        info!("Engine stopped ({})", reason);
        if let Err(e) = guard("stats dump", || {
            parts.stats.dump_stats();
            Ok(())
        }) {
            warn!("Failed to dump stats: {}", e);
        }
        emit(&mut parts.signals, Signal::EngineStopped);
        Ok(())
    }

    /// Slows the tick down to the paused interval. Nothing is dequeued until
    /// `unpause()`.
    pub fn pause(&mut self) -> Result<(), CrawlError> {
        match self.state {
            EngineState::Paused => Ok(()),
            EngineState::Running => {
                self.state = EngineState::Paused;
                self.ticker.schedule(self.config.paused_check_interval());
                info!("Engine paused");
                Ok(())
            }
            _ => Err(self.invalid_state("pause")),
        }
    }

    pub fn unpause(&mut self) -> Result<(), CrawlError> {
        match self.state {
            EngineState::Running => Ok(()),
            EngineState::Paused => {
                self.state = EngineState::Running;
                self.ticker.schedule(self.config.queue_check_interval());
                info!("Engine unpaused");
                Ok(())
            }
            _ => Err(self.invalid_state("unpause")),
        }
    }

    /// Introduces a request into the engine.
    ///
    /// Exactly one of these happens: the request is dropped, pushed onto the
    /// scheduler, or answered by a stage and the response pushed onto the
    /// output queue. A fault in the request chain goes to the request's
    /// failure continuation instead.
    ///
    /// Requests produced by that continuation are admitted from a worklist
    /// before this returns, so a chain of failing follow-ups never grows the
    /// call stack.
    pub fn download(&mut self, request: Request) -> Disposition {
        let mut follow_ups = VecDeque::new();
        let disposition = self.admit(request, &mut follow_ups);
        self.drain(follow_ups);
        disposition
    }

    // The request chain for one request. Spider output produced on the way
    // is queued on `follow_ups` instead of being downloaded here.
    fn admit(&mut self, request: Request, follow_ups: &mut VecDeque<Request>) -> Disposition {
        let Some(parts) = self.parts.as_mut() else {
            warn!("Engine is not set up, rejecting request for {}", request.url);
            return Disposition::Rejected;
        };

        let origin = Arc::new(request.clone());
        match guard("request pipeline", || parts.pipeline.process_request(request)) {
            Ok(RequestOutcome::Dropped { stage }) => {
                debug!("Request for {} dropped by stage '{}'", origin.url, stage);
                parts.stats.inc_value(keys::REQUESTS_DROPPED, 1);
                Disposition::Dropped
            }
            Ok(RequestOutcome::Schedule(request)) => {
                emit(&mut parts.signals, Signal::RequestReceived { request: &request });
                let url = request.url.clone();
                match parts.scheduler.push(request) {
                    Ok(()) => {
                        trace!("Scheduled {}", url);
                        Disposition::Scheduled
                    }
                    Err(e) => {
                        warn!("Could not schedule {}: {}", url, e);
                        parts.stats.inc_value(keys::QUEUE_REJECTED, 1);
                        Disposition::Rejected
                    }
                }
            }
            Ok(RequestOutcome::Respond(response)) => {
                let url = response.url.clone();
                let fetched = Fetched::Response {
                    request: origin,
                    response,
                };
                match parts.output.push(fetched) {
                    Ok(()) => {
                        trace!("Short-circuited {}", url);
                        parts.stats.inc_value(keys::RESPONSES_SHORT_CIRCUITED, 1);
                        Disposition::ShortCircuited
                    }
                    Err(e) => {
                        warn!("Could not queue response for {}: {}", url, e);
                        parts.stats.inc_value(keys::QUEUE_REJECTED, 1);
                        Disposition::Rejected
                    }
                }
            }
            Err(e) => {
                error!("Request pipeline failed for {}: {}", origin.url, e);
                parts.stats.inc_value(keys::REQUESTS_FAILED, 1);
                let result = deliver_failure(&mut self.spider, Failure::new(Some(origin), e));
                self.collect(result, follow_ups);
                Disposition::Failed
            }
        }
    }

    fn drain(&mut self, mut follow_ups: VecDeque<Request>) {
        while let Some(request) = follow_ups.pop_front() {
            self.admit(request, &mut follow_ups);
        }
    }

    /// One tick: drains the output queue while the engine is running.
    /// Returns the number of items taken off the queue.
    ///
    /// Each response is bound to the request it was fetched for before any
    /// stage or signal handler sees it.
    pub fn process_queue(&mut self) -> usize {
        let mut processed = 0;
        while self.state == EngineState::Running {
            let Some(fetched) = self.parts.as_ref().and_then(|parts| parts.output.pop()) else {
                break;
            };
            processed += 1;

            let mut follow_ups = VecDeque::new();
            match fetched {
                Fetched::Failed(failure) => {
                    debug!("Delivering download failure: {}", failure);
                    let result = deliver_failure(&mut self.spider, failure);
                    self.collect(result, &mut follow_ups);
                }
                Fetched::Response {
                    request,
                    mut response,
                } => {
                    response.bind_request(request);
                    self.process_response(response, &mut follow_ups);
                }
            }
            self.drain(follow_ups);
        }
        if processed > 0 {
            trace!("Tick processed {} item(s)", processed);
        }
        processed
    }

    // Runs the response chain and hands the result to the spider.
    fn process_response(&mut self, response: Response, follow_ups: &mut VecDeque<Request>) {
        let Some(parts) = self.parts.as_mut() else {
            return;
        };
        emit(
            &mut parts.signals,
            Signal::ResponseDownloaded {
                response: &response,
            },
        );

        let request = response.request().cloned();
        let url = response.url.clone();
        let result = match guard("response pipeline", || parts.pipeline.process_response(response)) {
            Ok(ResponseOutcome::Dropped { stage }) => {
                debug!("Response for {} dropped by stage '{}'", url, stage);
                parts.stats.inc_value(keys::RESPONSES_DROPPED, 1);
                return;
            }
            Ok(ResponseOutcome::Reschedule(request)) => {
                debug!("Response for {} rescheduled as {}", url, request.url);
                parts.stats.inc_value(keys::REQUESTS_RESCHEDULED, 1);
                follow_ups.push_back(request);
                return;
            }
            Ok(ResponseOutcome::Deliver(response)) => {
                emit(
                    &mut parts.signals,
                    Signal::ResponseReceived {
                        response: &response,
                    },
                );
                deliver_response(&mut self.spider, parts.stats.as_ref(), response)
            }
            Err(e) => {
                error!("Response pipeline failed for {}: {}", url, e);
                parts.stats.inc_value(keys::RESPONSES_FAILED, 1);
                deliver_failure(&mut self.spider, Failure::new(request, e))
            }
        };
        self.collect(result, follow_ups);
    }

    // Post-processing hook: new requests are queued for `download`,
    // unhandled errors are logged and counted.
    fn collect(
        &self,
        result: Result<SpiderOutput, CrawlError>,
        follow_ups: &mut VecDeque<Request>,
    ) {
        match result {
            Ok(output) => follow_ups.extend(output.requests),
            Err(e) => {
                error!("Unhandled spider error: {}", e);
                self.count(keys::SPIDER_ERRORS);
            }
        }
    }

    /// Starts the engine if needed, then ticks and applies handle commands
    /// until it is stopped.
    pub async fn run(&mut self) -> Result<(), CrawlError> {
        if self.state == EngineState::NotStarted {
            self.start()?;
        }

        // The engine holds a sender of its own, so the command channel
        // cannot disconnect while `run` borrows it.
        while self.state != EngineState::Stopped {
            let event = tokio::select! {
                _ = self.ticker.tick() => LoopEvent::Tick,
                Ok(command) = self.commands_rx.recv() => LoopEvent::Command(command),
            };

            match event {
                LoopEvent::Tick => {
                    self.process_queue();
                }
                LoopEvent::Command(command) => self.apply(command),
            }
        }
        Ok(())
    }

    fn apply(&mut self, command: Command) {
        trace!("Applying command {:?}", command);
        let result = match command {
            Command::Pause => self.pause(),
            Command::Unpause => self.unpause(),
            Command::Stop(reason) => self.stop(&reason),
        };
        if let Err(e) = result {
            warn!("Ignoring engine command: {}", e);
        }
    }

    fn count(&self, key: &str) {
        if let Some(parts) = &self.parts {
            parts.stats.inc_value(key, 1);
        }
    }

    fn invalid_state(&self, action: &'static str) -> CrawlError {
        CrawlError::InvalidState {
            action,
            state: self.state.to_string(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            commands: self.commands_tx.clone(),
        }
    }

    pub fn spider(&self) -> &S {
        &self.spider
    }

    pub fn spider_mut(&mut self) -> &mut S {
        &mut self.spider
    }

    /// The stats sink, once set up.
    pub fn stats(&self) -> Option<Arc<dyn StatsSink>> {
        self.parts.as_ref().map(|parts| Arc::clone(&parts.stats))
    }

    pub fn scheduler(&self) -> Option<&RequestScheduler> {
        self.parts.as_ref().map(|parts| parts.scheduler.as_ref())
    }

    pub fn output_queue(&self) -> Option<&OutputQueue> {
        self.parts.as_ref().map(|parts| parts.output.as_ref())
    }

    /// Names of the installed pipeline stages, in declared order.
    pub fn pipeline_stages(&self) -> Vec<&str> {
        self.parts
            .as_ref()
            .map(|parts| parts.pipeline.stage_names())
            .unwrap_or_default()
    }

    /// Names of the installed extensions, in installation order.
    pub fn extensions(&self) -> &[String] {
        self.parts
            .as_ref()
            .map(|parts| parts.extensions.as_slice())
            .unwrap_or_default()
    }

    /// `true` when nothing is queued and the downloader has no fetch in
    /// flight.
    pub fn is_idle(&self) -> bool {
        self.parts.as_ref().is_none_or(|parts| {
            !parts.scheduler.has_items()
                && !parts.output.has_items()
                && parts.downloader.in_flight() == 0
        })
    }
}

// Sends a signal, containing panics raised by handlers.
fn emit(signals: &mut SignalBus, signal: Signal<'_>) {
    if let Err(e) = guard("signal handler", || {
        signals.send(signal);
        Ok(())
    }) {
        error!("Handler for {:?} failed: {}", signal.kind(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EngineBuilder;
    use crate::pipeline::{PipelineStage, RequestAction};

    struct Quiet;

    impl Spider for Quiet {
        fn name(&self) -> &str {
            "quiet"
        }

        fn parse(&mut self, _response: Response) -> Result<SpiderOutput, CrawlError> {
            Ok(SpiderOutput::new())
        }
    }

    struct Idle;

    impl Downloader for Idle {
        fn close(&self) -> Result<(), CrawlError> {
            Ok(())
        }
    }

    fn engine() -> Engine<Quiet> {
        EngineBuilder::new(Quiet)
            .downloader(|_| Ok(Box::new(Idle) as Box<dyn Downloader>))
            .build()
    }

    #[test]
    fn lifecycle_transitions() {
        let mut engine = engine();
        assert!(matches!(engine.start(), Err(CrawlError::NotSetUp)));
        engine.setup().unwrap();
        assert!(matches!(engine.setup(), Err(CrawlError::AlreadySetUp)));
        assert!(matches!(
            engine.stop("early"),
            Err(CrawlError::InvalidState { action: "stop", .. })
        ));

        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(engine.start().is_err());

        engine.pause().unwrap();
        engine.pause().unwrap();
        assert_eq!(engine.state(), EngineState::Paused);
        engine.unpause().unwrap();
        assert_eq!(engine.state(), EngineState::Running);

        engine.stop("done").unwrap();
        engine.stop("again").unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.pause().is_err());
        assert!(engine.unpause().is_err());
    }

    #[test]
    fn pause_slows_the_ticker() {
        let mut engine = engine();
        engine.setup().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.ticker.period(), Some(engine.config.queue_check_interval()));
        engine.pause().unwrap();
        assert_eq!(engine.ticker.period(), Some(engine.config.paused_check_interval()));
        engine.unpause().unwrap();
        assert_eq!(engine.ticker.period(), Some(engine.config.queue_check_interval()));
        engine.stop("done").unwrap();
        assert!(!engine.ticker.is_active());
    }

    struct Exploding;

    impl PipelineStage for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn process_request(&mut self, _request: Request) -> Result<RequestAction, CrawlError> {
            panic!("stage exploded");
        }
    }

    #[test]
    fn panicking_request_stage_is_a_failed_download() {
        let mut engine = EngineBuilder::new(Quiet)
            .downloader(|_| Ok(Box::new(Idle) as Box<dyn Downloader>))
            .add_stage("exploding", |_| Ok(Box::new(Exploding) as Box<dyn PipelineStage>))
            .build();
        engine.setup().unwrap();
        engine.start().unwrap();

        let request = Request::parse("https://example.com").unwrap();
        assert_eq!(engine.download(request), Disposition::Failed);

        let stats = engine.stats().unwrap();
        assert_eq!(stats.get_value(keys::REQUESTS_FAILED), Some(1));
        // `Quiet` keeps the default `handle_error`, which reports the failure.
        assert_eq!(stats.get_value(keys::SPIDER_ERRORS), Some(1));
        assert!(engine.is_idle());
    }

    #[test]
    fn download_before_setup_is_rejected() {
        let mut engine = engine();
        let request = Request::parse("https://example.com").unwrap();
        assert_eq!(engine.download(request), Disposition::Rejected);
    }
}
