mod common;

use common::{Close, Log, Recording, StubDownloader, log, request};
use spider_engine::downloader::Fetched;
use spider_engine::extensions::ExtensionContext;
use spider_engine::prelude::*;
use spider_engine::queue::Queue;
use spider_engine::EngineState;
use spider_engine::stats::keys;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Drops `/drop`, answers `/cached` itself, passes everything else.
struct Router;

impl PipelineStage for Router {
    fn name(&self) -> &str {
        "router"
    }

    fn process_request(&mut self, request: Request) -> Result<RequestAction, CrawlError> {
        match request.url.path() {
            "/drop" => Ok(RequestAction::Drop),
            "/cached" => Ok(RequestAction::ShortCircuit(Response::new(
                request.url.clone(),
                200,
                "cached",
            ))),
            _ => Ok(RequestAction::Continue(request)),
        }
    }
}

/// Records every call it sees.
struct Spy {
    name: String,
    log: Log,
}

impl Spy {
    fn boxed(name: &str, log: &Log) -> Box<dyn PipelineStage> {
        Box::new(Spy {
            name: name.to_string(),
            log: Arc::clone(log),
        })
    }
}

impl PipelineStage for Spy {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_request(&mut self, request: Request) -> Result<RequestAction, CrawlError> {
        self.log.lock().push(format!("{} request {}", self.name, request.url));
        Ok(RequestAction::Continue(request))
    }

    fn process_response(&mut self, response: Response) -> Result<ResponseAction, CrawlError> {
        self.log.lock().push(format!("{} response {}", self.name, response.url));
        Ok(ResponseAction::Continue(response))
    }
}

/// Faults on responses for `/bad`, reschedules `/old` as `/new`.
struct Inspector;

impl PipelineStage for Inspector {
    fn name(&self) -> &str {
        "inspector"
    }

    fn process_response(&mut self, response: Response) -> Result<ResponseAction, CrawlError> {
        match response.url.path() {
            "/bad" => Err(CrawlError::stage("inspector", "boom")),
            "/old" => Ok(ResponseAction::Reschedule(request("https://example.com/new"))),
            _ => Ok(ResponseAction::Continue(response)),
        }
    }
}

fn quiet_config() -> EngineConfig {
    EngineConfig {
        log_stats_interval_secs: None,
        ..EngineConfig::default()
    }
}

fn started(builder: EngineBuilder<Recording>) -> Engine<Recording> {
    let mut engine = builder.config(quiet_config()).build();
    engine.setup().unwrap();
    engine.start().unwrap();
    engine
}

#[test]
fn download_has_exactly_one_effect() {
    let log = log();
    let downloader = StubDownloader::new();
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log))
            .downloader(downloader.factory())
            .add_stage("router", |_| Ok(Box::new(Router) as Box<dyn PipelineStage>)),
    );

    assert_eq!(
        engine.download(request("https://example.com/drop")),
        Disposition::Dropped
    );
    assert_eq!(
        engine.download(request("https://example.com/page")),
        Disposition::Scheduled
    );
    assert_eq!(
        engine.download(request("https://example.com/cached")),
        Disposition::ShortCircuited
    );

    assert_eq!(downloader.scheduler().len(), 1);
    assert_eq!(downloader.output().len(), 1);

    let stats = engine.stats().unwrap();
    assert_eq!(stats.get_value(keys::REQUESTS_RECEIVED), Some(1));
    assert_eq!(stats.get_value(keys::REQUESTS_DROPPED), Some(1));
    assert_eq!(stats.get_value(keys::RESPONSES_SHORT_CIRCUITED), Some(1));
}

#[test]
fn short_circuit_skips_later_stages_and_binds_the_request() {
    let log = log();
    let calls = common::log();
    let downloader = StubDownloader::new();
    let spy_calls = Arc::clone(&calls);
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log))
            .downloader(downloader.factory())
            .add_stage("router", |_| Ok(Box::new(Router) as Box<dyn PipelineStage>))
            .add_stage("spy", move |_| Ok(Spy::boxed("spy", &spy_calls))),
    );

    engine.download(request("https://example.com/cached"));
    assert!(calls.lock().is_empty());

    let output = downloader.output();
    match output.pop() {
        Some(Fetched::Response { request, response }) => {
            assert_eq!(response.text(), "cached");
            assert_eq!(request.url.as_str(), "https://example.com/cached");
            output
                .push(Fetched::Response { request, response })
                .unwrap();
        }
        other => panic!("expected a short-circuited response, got {:?}", other),
    }

    engine.process_queue();
    assert_eq!(
        *log.lock(),
        vec!["parse https://example.com/cached <- https://example.com/cached"]
    );

    engine.download(request("https://example.com/page"));
    assert_eq!(
        *calls.lock(),
        vec![
            "spy response https://example.com/cached",
            "spy request https://example.com/page"
        ]
    );
}

#[test]
fn responses_visit_stages_in_reverse_when_symmetric() {
    for (symmetric, expected) in [
        (true, ["a request", "b request", "b response", "a response"]),
        (false, ["a request", "b request", "a response", "b response"]),
    ] {
        let log = log();
        let calls = common::log();
        let downloader = StubDownloader::new();
        let (a, b) = (Arc::clone(&calls), Arc::clone(&calls));
        let mut engine = EngineBuilder::new(Recording::new(&log))
            .config(EngineConfig {
                symmetric_pipeline: symmetric,
                ..quiet_config()
            })
            .downloader(downloader.factory())
            .add_stage("a", move |_| Ok(Spy::boxed("a", &a)))
            .add_stage("b", move |_| Ok(Spy::boxed("b", &b)))
            .build();
        engine.setup().unwrap();
        engine.start().unwrap();

        engine.download(request("https://example.com/"));
        downloader.pump();
        assert_eq!(engine.process_queue(), 1);

        let seen: Vec<String> = calls
            .lock()
            .iter()
            .map(|call| call.trim_end_matches(" https://example.com/").to_string())
            .collect();
        assert_eq!(seen, expected);
        assert_eq!(log.lock().len(), 1);
    }
}

#[test]
fn paused_engine_does_not_drain_the_output_queue() {
    let log = log();
    let downloader = StubDownloader::new();
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log)).downloader(downloader.factory()),
    );

    for path in ["a", "b", "c"] {
        engine.download(request(&format!("https://example.com/{}", path)));
    }
    assert_eq!(downloader.pump(), 3);

    engine.pause().unwrap();
    for _ in 0..5 {
        assert_eq!(engine.process_queue(), 0);
        assert_eq!(downloader.output().len(), 3);
    }
    assert!(log.lock().is_empty());

    engine.unpause().unwrap();
    assert_eq!(engine.process_queue(), 3);
    assert!(!downloader.output().has_items());
    assert_eq!(log.lock().len(), 3);
    assert!(engine.is_idle());
}

/// Stats sink double that notes whether the queues were already closed when
/// it was flushed.
struct OrderedStats {
    events: Log,
    inner: StatCollector,
    downloader: StubDownloader,
}

impl StatsSink for OrderedStats {
    fn inc_value(&self, key: &str, count: usize) {
        self.inner.inc_value(key, count);
    }

    fn set_value(&self, key: &str, value: usize) {
        self.inner.set_value(key, value);
    }

    fn get_value(&self, key: &str) -> Option<usize> {
        self.inner.get_value(key)
    }

    fn dump_stats(&self) {
        self.events.lock().push(format!(
            "stats dumped (scheduler closed: {}, output closed: {})",
            self.downloader.scheduler().is_closed(),
            self.downloader.output().is_closed()
        ));
    }
}

// Stops an engine whose downloader closes the given way and returns what
// happened, in order.
fn teardown_events(close: Close) -> Vec<String> {
    let log = log();
    let events = common::log();
    let downloader = StubDownloader::recording(&events).closing(close);

    let sink = OrderedStats {
        events: Arc::clone(&events),
        inner: StatCollector::new(),
        downloader: downloader.clone(),
    };
    let watched = Arc::clone(&events);
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log))
            .downloader(downloader.factory())
            .stats(move |_| Ok(Arc::new(sink) as Arc<dyn StatsSink>))
            .add_extension("stop_order", move |context: &mut ExtensionContext<'_>| {
                let stopping = Arc::clone(&watched);
                context.signals.connect(SignalKind::EngineStopping, move |_| {
                    stopping.lock().push("stopping".to_string());
                });
                let stopped = Arc::clone(&watched);
                context.signals.connect(SignalKind::EngineStopped, move |_| {
                    stopped.lock().push("stopped".to_string());
                });
                Ok(())
            }),
    );

    engine.stop("finished").unwrap();
    engine.stop("finished again").unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.extensions(), ["stop_order".to_string()]);

    events.lock().clone()
}

const TEARDOWN: [&str; 4] = [
    "stopping",
    "downloader closed",
    "stats dumped (scheduler closed: true, output closed: true)",
    "stopped",
];

#[test]
fn stop_tears_down_before_flushing_stats_and_signalling() {
    assert_eq!(teardown_events(Close::Clean), TEARDOWN);
}

#[test]
fn failing_downloader_close_does_not_cut_teardown_short() {
    assert_eq!(teardown_events(Close::Fail), TEARDOWN);
}

#[test]
fn panicking_downloader_close_does_not_cut_teardown_short() {
    assert_eq!(teardown_events(Close::Panic), TEARDOWN);
}

#[test]
fn callback_fault_does_not_stop_the_tick() {
    let log = log();
    let downloader = StubDownloader::new();
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log)).downloader(downloader.factory()),
    );

    let errbacks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errbacks);
    let broken = request("https://example.com/broken")
        .with_callback(|_| Err(CrawlError::Spider("bad".into())))
        .with_errback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(SpiderOutput::new())
        });
    downloader.push_response(broken, 200);
    downloader.push_response(request("https://example.com/fine"), 200);

    assert_eq!(engine.process_queue(), 2);
    assert_eq!(errbacks.load(Ordering::SeqCst), 1);
    assert_eq!(
        *log.lock(),
        vec!["parse https://example.com/fine <- https://example.com/fine"]
    );
    let stats = engine.stats().unwrap();
    assert_eq!(stats.get_value(keys::SPIDER_CALLBACK_ERRORS), Some(1));
    assert_eq!(stats.get_value(keys::RESPONSES_RECEIVED), Some(2));
}

#[test]
fn response_stage_fault_goes_to_the_failure_continuation() {
    let log = log();
    let downloader = StubDownloader::new();
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log))
            .downloader(downloader.factory())
            .add_stage("inspector", |_| Ok(Box::new(Inspector) as Box<dyn PipelineStage>)),
    );

    downloader.push_response(request("https://example.com/bad"), 200);
    downloader.push_response(request("https://example.com/good"), 200);

    assert_eq!(engine.process_queue(), 2);
    assert_eq!(
        *log.lock(),
        vec![
            "error Pipeline stage 'inspector' failed: boom (https://example.com/bad)",
            "parse https://example.com/good <- https://example.com/good",
        ]
    );
    let stats = engine.stats().unwrap();
    assert_eq!(stats.get_value(keys::RESPONSES_FAILED), Some(1));
    assert_eq!(stats.get_value(keys::RESPONSES_DOWNLOADED), Some(2));
}

#[test]
fn unbound_responses_are_bound_before_reaching_the_callback() {
    let log = log();
    let downloader = StubDownloader::new();
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log)).downloader(downloader.factory()),
    );

    let origins = common::log();
    let seen = Arc::clone(&origins);
    let page = request("https://example.com/page").with_callback(move |response| {
        let origin = response
            .request()
            .map(|request| request.url.to_string())
            .unwrap_or_else(|| "unbound".to_string());
        seen.lock().push(origin);
        Ok(SpiderOutput::new())
    });
    downloader.push_response(page, 200);

    assert_eq!(engine.process_queue(), 1);
    assert_eq!(*origins.lock(), vec!["https://example.com/page"]);
    assert!(log.lock().is_empty());
}

#[test]
fn failed_fetch_goes_to_the_failure_continuation() {
    let log = log();
    let downloader = StubDownloader::new();
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log)).downloader(downloader.factory()),
    );

    let failure = Failure::new(
        Some(Arc::new(request("https://example.com/slow"))),
        CrawlError::Download("timed out".into()),
    );
    downloader.output().push(Fetched::Failed(failure)).unwrap();

    assert_eq!(engine.process_queue(), 1);
    assert_eq!(
        *log.lock(),
        vec!["error Download error: timed out (https://example.com/slow)"]
    );
}

#[test]
fn rescheduled_response_reenters_download() {
    let log = log();
    let downloader = StubDownloader::new();
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log))
            .downloader(downloader.factory())
            .add_stage("inspector", |_| Ok(Box::new(Inspector) as Box<dyn PipelineStage>)),
    );

    downloader.push_response(request("https://example.com/old"), 301);
    assert_eq!(engine.process_queue(), 1);

    let scheduled = downloader.scheduler().pop().expect("rescheduled request");
    assert_eq!(scheduled.url.as_str(), "https://example.com/new");
    assert!(log.lock().is_empty());
    let stats = engine.stats().unwrap();
    assert_eq!(stats.get_value(keys::REQUESTS_RESCHEDULED), Some(1));
    assert_eq!(stats.get_value(keys::RESPONSES_RECEIVED), None);
}

#[test]
fn callback_output_is_downloaded() {
    let log = log();
    let downloader = StubDownloader::new();
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log)).downloader(downloader.factory()),
    );

    let listing = request("https://example.com/list").with_callback(|_| {
        Ok(SpiderOutput::new()
            .with_request(request("https://example.com/item/1").with_priority(1))
            .with_request(request("https://example.com/item/2").with_priority(5)))
    });
    downloader.push_response(listing, 200);
    engine.process_queue();

    let scheduler = downloader.scheduler();
    assert_eq!(scheduler.pop().unwrap().url.path(), "/item/2");
    assert_eq!(scheduler.pop().unwrap().url.path(), "/item/1");
}

#[test]
fn seeded_request_reaches_the_callback_after_two_ticks() {
    let log = log();
    let downloader = StubDownloader::new();
    let mut engine = started(
        EngineBuilder::new(Recording::seeded(&log, vec!["https://example.com/seed"]))
            .downloader(downloader.factory()),
    );

    assert_eq!(engine.process_queue(), 0);
    assert_eq!(downloader.pump(), 1);
    assert_eq!(engine.process_queue(), 1);

    assert_eq!(
        *log.lock(),
        vec!["parse https://example.com/seed <- https://example.com/seed"]
    );
}

fn declining_stage(_: &EngineConfig) -> Result<Box<dyn PipelineStage>, CrawlError> {
    Err(CrawlError::NotConfigured("declining: missing setting".into()))
}

#[test]
fn declined_components_are_skipped() {
    let log = log();
    let calls = common::log();
    let spy_calls = Arc::clone(&calls);
    let engine = started(
        EngineBuilder::new(Recording::new(&log))
            .downloader(StubDownloader::new().factory())
            .add_stage("declining", declining_stage)
            .add_stage("spy", move |_| Ok(Spy::boxed("spy", &spy_calls))),
    );

    assert_eq!(engine.pipeline_stages(), vec!["spy"]);
    // `log_stats` declines without an interval.
    assert!(engine.extensions().is_empty());
}

#[test]
fn fatal_setup_errors_abort_setup() {
    let log = log();

    let mut engine = EngineBuilder::new(Recording::new(&log)).build();
    assert!(matches!(engine.setup(), Err(CrawlError::Configuration(_))));

    let mut engine = EngineBuilder::new(Recording::new(&log))
        .downloader(StubDownloader::new().factory())
        .add_stage("broken", |_| {
            Err::<Box<dyn PipelineStage>, _>(CrawlError::Configuration("bad stage".into()))
        })
        .build();
    assert!(matches!(engine.setup(), Err(CrawlError::Configuration(_))));
    assert!(matches!(engine.start(), Err(CrawlError::NotSetUp)));

    let mut config = quiet_config();
    config.queue_check_interval_ms = 0;
    let mut engine = EngineBuilder::new(Recording::new(&log))
        .config(config)
        .downloader(StubDownloader::new().factory())
        .build();
    assert!(matches!(engine.setup(), Err(CrawlError::Configuration(_))));

    let mut config = quiet_config();
    config.component_order.insert("nonexistent".into(), 1);
    let mut engine = EngineBuilder::new(Recording::new(&log))
        .config(config)
        .downloader(StubDownloader::new().factory())
        .build();
    assert!(matches!(engine.setup(), Err(CrawlError::Configuration(_))));
}

#[test]
fn components_follow_configured_order() {
    let log = log();
    let calls = common::log();
    let (a, b, c) = (Arc::clone(&calls), Arc::clone(&calls), Arc::clone(&calls));

    let mut config = quiet_config();
    config.component_order.insert("b".into(), 10);
    config.disabled_components.push("c".into());

    let mut engine = EngineBuilder::new(Recording::new(&log))
        .config(config)
        .downloader(StubDownloader::new().factory())
        .add_stage("a", move |_| Ok(Spy::boxed("a", &a)))
        .add_stage("b", move |_| Ok(Spy::boxed("b", &b)))
        .add_stage("c", move |_| Ok(Spy::boxed("c", &c)))
        .build();
    engine.setup().unwrap();

    assert_eq!(engine.pipeline_stages(), vec!["b", "a"]);
}

#[test]
fn duplicate_filter_drops_repeated_urls() {
    let log = log();
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log))
            .downloader(StubDownloader::new().factory())
            .add_stage("duplicate_filter", |_| {
                Ok(Box::new(DuplicateFilter::new()) as Box<dyn PipelineStage>)
            }),
    );

    assert_eq!(
        engine.download(request("https://example.com/a")),
        Disposition::Scheduled
    );
    assert_eq!(
        engine.download(request("https://example.com/a")),
        Disposition::Dropped
    );
    assert_eq!(
        engine.download(request("https://example.com/a#section")),
        Disposition::Dropped
    );
    assert_eq!(
        engine.download(request("https://example.com/a").with_meta("dont_filter", true)),
        Disposition::Scheduled
    );
}

#[test]
fn work_after_stop_is_rejected() {
    let log = log();
    let downloader = StubDownloader::new();
    let mut engine = started(
        EngineBuilder::new(Recording::new(&log))
            .downloader(downloader.factory())
            .add_stage("router", |_| Ok(Box::new(Router) as Box<dyn PipelineStage>)),
    );

    downloader.push_response(request("https://example.com/late"), 200);
    engine.stop("shutdown").unwrap();

    assert_eq!(
        engine.download(request("https://example.com/page")),
        Disposition::Rejected
    );
    assert_eq!(
        engine.download(request("https://example.com/cached")),
        Disposition::Rejected
    );
    assert_eq!(engine.process_queue(), 0);
    assert!(log.lock().is_empty());
    assert_eq!(
        engine.stats().unwrap().get_value(keys::QUEUE_REJECTED),
        Some(2)
    );
}

/// Refuses every request.
struct Refusing;

impl PipelineStage for Refusing {
    fn name(&self) -> &str {
        "refusing"
    }

    fn process_request(&mut self, _request: Request) -> Result<RequestAction, CrawlError> {
        Err(CrawlError::stage("refusing", "no"))
    }
}

/// Answers every failure with one more request until it runs out.
struct Persistent {
    remaining: usize,
    failures: usize,
}

impl Spider for Persistent {
    fn name(&self) -> &str {
        "persistent"
    }

    fn parse(&mut self, _response: Response) -> Result<SpiderOutput, CrawlError> {
        Ok(SpiderOutput::new())
    }

    fn handle_error(&mut self, _failure: Failure) -> Result<SpiderOutput, CrawlError> {
        self.failures += 1;
        if self.remaining == 0 {
            return Ok(SpiderOutput::new());
        }
        self.remaining -= 1;
        let next = request(&format!("https://example.com/retry/{}", self.remaining));
        Ok(SpiderOutput::new().with_request(next))
    }
}

#[test]
fn long_failure_chains_are_handled_iteratively() {
    const CHAIN: usize = 200_000;
    let downloader = StubDownloader::new();
    let spider = Persistent {
        remaining: CHAIN,
        failures: 0,
    };
    let mut engine = EngineBuilder::new(spider)
        .config(quiet_config())
        .downloader(downloader.factory())
        .add_stage("refusing", |_| Ok(Box::new(Refusing) as Box<dyn PipelineStage>))
        .build();
    engine.setup().unwrap();
    engine.start().unwrap();

    assert_eq!(
        engine.download(request("https://example.com/first")),
        Disposition::Failed
    );
    assert_eq!(engine.spider().failures, CHAIN + 1);
    assert_eq!(engine.spider().remaining, 0);
    let stats = engine.stats().unwrap();
    assert_eq!(stats.get_value(keys::REQUESTS_FAILED), Some(CHAIN + 1));
    assert!(!downloader.scheduler().has_items());
}
