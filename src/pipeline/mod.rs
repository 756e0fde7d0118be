//! Pipeline stages and the actions they return.
//!
//! A pipeline stage sits between the engine and the downloader. Every request
//! entering the engine through `download` passes through each stage's
//! `process_request`, and every response the downloader hands back passes
//! through each stage's `process_response`, before the spider sees it.
//!
//! Stages answer with an explicit action instead of returning "a request, a
//! response or nothing":
//!
//! - requests: `Continue`, `Replace`, `ShortCircuit` (answer with a response
//!   and skip the fetch), `Drop`;
//! - responses: `Continue`, `Replace`, `Reschedule` (turn the response back
//!   into a request, e.g. a redirect or retry), `Drop`.
//!
//! Returning `Err` is a fault. The chain does not catch it; the engine routes
//! it to the request's failure continuation.
//!
//! A stage constructor may return `CrawlError::NotConfigured` to decline
//! installation; the engine skips it and keeps building the pipeline.

pub mod dedup;

pub use dedup::DuplicateFilter;

use crate::error::CrawlError;
use crate::request::Request;
use crate::response::Response;

/// What a stage wants done with an outbound request.
#[derive(Debug)]
pub enum RequestAction {
    /// Pass the request to the next stage unchanged.
    Continue(Request),
    /// Pass a different request to the next stage.
    Replace(Request),
    /// Skip the remaining stages and the fetch, deliver this response.
    ShortCircuit(Response),
    /// Discard the request.
    Drop,
}

/// What a stage wants done with an inbound response.
#[derive(Debug)]
pub enum ResponseAction {
    Continue(Response),
    Replace(Response),
    /// Skip the remaining stages and schedule this request instead.
    Reschedule(Request),
    Drop,
}

/// Result of running a request through the whole chain.
#[derive(Debug)]
pub enum RequestOutcome {
    Schedule(Request),
    Respond(Response),
    Dropped { stage: String },
}

/// Result of running a response through the whole chain.
#[derive(Debug)]
pub enum ResponseOutcome {
    Deliver(Response),
    Reschedule(Request),
    Dropped { stage: String },
}

/// A request/response transformation step.
pub trait PipelineStage: Send {
    fn name(&self) -> &str;

    fn process_request(&mut self, request: Request) -> Result<RequestAction, CrawlError> {
        Ok(RequestAction::Continue(request))
    }

    fn process_response(&mut self, response: Response) -> Result<ResponseAction, CrawlError> {
        Ok(ResponseAction::Continue(response))
    }
}
