//! # Spider Module
//!
//! Defines the `Spider` trait implemented by user crawlers.
//!
//! ## Overview
//!
//! A spider seeds the crawl with its start requests and handles every response
//! that reaches final delivery. Per-request continuations set with
//! `Request::with_callback` / `Request::with_errback` take precedence; when a
//! request has none, the engine falls back to [`Spider::parse`] and
//! [`Spider::handle_error`].
//!
//! Whatever a continuation returns is a `SpiderOutput`; the requests it holds
//! are fed back into the engine through `download`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! struct BlogSpider;
//!
//! impl Spider for BlogSpider {
//!     fn name(&self) -> &str {
//!         "blog"
//!     }
//!
//!     fn start_urls(&self) -> Vec<&'static str> {
//!         vec!["https://example.com/blog"]
//!     }
//!
//!     fn parse(&mut self, response: Response) -> Result<SpiderOutput, CrawlError> {
//!         let mut output = SpiderOutput::new();
//!         // follow links found in response.text() ...
//!         Ok(output)
//!     }
//! }
//! ```

use crate::error::{CrawlError, Failure};
use crate::request::Request;
use crate::response::Response;
use url::Url;

/// Requests produced by a continuation.
#[derive(Debug, Default)]
pub struct SpiderOutput {
    pub requests: Vec<Request>,
}

impl SpiderOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_request(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn with_request(mut self, request: Request) -> Self {
        self.add_request(request);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl From<Vec<Request>> for SpiderOutput {
    fn from(requests: Vec<Request>) -> Self {
        Self { requests }
    }
}

/// Defines the contract for a spider.
pub trait Spider: Send + 'static {
    fn name(&self) -> &str;

    /// Returns the initial URLs to start crawling from.
    fn start_urls(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Generates the initial requests to start crawling.
    fn start_requests(&mut self) -> Result<Vec<Request>, CrawlError> {
        let urls: Result<Vec<Url>, url::ParseError> =
            self.start_urls().into_iter().map(Url::parse).collect();
        Ok(urls?.into_iter().map(Request::new).collect())
    }

    /// Default success continuation.
    fn parse(&mut self, response: Response) -> Result<SpiderOutput, CrawlError>;

    /// Default failure continuation. Returning `Err` reports the failure as
    /// unhandled.
    fn handle_error(&mut self, failure: Failure) -> Result<SpiderOutput, CrawlError> {
        Err(CrawlError::Spider(failure.to_string()))
    }
}
