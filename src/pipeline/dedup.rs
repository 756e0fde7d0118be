//! Request stage that drops requests for URLs already seen.
//!
//! Fingerprints (URL without fragment) are kept in a bounded `moka` cache.
//! Requests carrying the `dont_filter` meta flag always pass and are not
//! recorded.

use super::{PipelineStage, RequestAction};
use crate::error::CrawlError;
use crate::request::{DONT_FILTER, Request};
use moka::sync::Cache;
use tracing::debug;

const DEFAULT_CAPACITY: u64 = 100_000;

pub struct DuplicateFilter {
    seen: Cache<String, ()>,
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            seen: Cache::builder().max_capacity(capacity).build(),
        }
    }

    pub fn has_seen(&self, request: &Request) -> bool {
        self.seen.contains_key(&request.fingerprint())
    }
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for DuplicateFilter {
    fn name(&self) -> &str {
        "duplicate_filter"
    }

    fn process_request(&mut self, request: Request) -> Result<RequestAction, CrawlError> {
        if request.meta_flag(DONT_FILTER) {
            return Ok(RequestAction::Continue(request));
        }
        let fingerprint = request.fingerprint();
        if self.seen.contains_key(&fingerprint) {
            debug!("Filtered duplicate request: {}", request.url);
            return Ok(RequestAction::Drop);
        }
        self.seen.insert(fingerprint, ());
        Ok(RequestAction::Continue(request))
    }
}
