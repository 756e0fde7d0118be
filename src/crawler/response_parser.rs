//! Delivery of final responses and failures to spider code.
//!
//! A delivered response goes to the request's success continuation, or to
//! `Spider::parse` when the request has none. If that continuation faults, the
//! fault is captured and handed to the failure continuation (or
//! `Spider::handle_error`) instead. Panics raised by user code are captured
//! the same way, so one bad item never unwinds through the engine's tick.

use crate::error::{CrawlError, Failure};
use crate::response::Response;
use crate::spider::{Spider, SpiderOutput};
use crate::stats::{StatsSink, keys};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

/// Runs `f`, turning a panic into `CrawlError::Spider`.
pub(crate) fn guard<T>(
    what: &str,
    f: impl FnOnce() -> Result<T, CrawlError>,
) -> Result<T, CrawlError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(CrawlError::Spider(format!(
            "{} panicked: {}",
            what,
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Calls the success continuation, falling back to the failure continuation
/// if it faults.
pub(crate) fn deliver_response<S: Spider>(
    spider: &mut S,
    stats: &dyn StatsSink,
    response: Response,
) -> Result<SpiderOutput, CrawlError> {
    let request = response.request().cloned();
    let callback = request.as_ref().and_then(|request| request.callback().cloned());

    let result = match callback {
        Some(callback) => guard("callback", || callback(response)),
        None => guard("parse", || spider.parse(response)),
    };

    result.or_else(|e| {
        warn!("Spider callback failed: {}", e);
        stats.inc_value(keys::SPIDER_CALLBACK_ERRORS, 1);
        deliver_failure(spider, Failure::new(request, e))
    })
}

/// Calls the failure continuation.
pub(crate) fn deliver_failure<S: Spider>(
    spider: &mut S,
    failure: Failure,
) -> Result<SpiderOutput, CrawlError> {
    let errback = failure
        .request
        .as_ref()
        .and_then(|request| request.errback().cloned());

    match errback {
        Some(errback) => guard("errback", || errback(failure)),
        None => guard("handle_error", || spider.handle_error(failure)),
    }
}
