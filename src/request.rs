//! The `Request` work descriptor.
//!
//! A request names a URL to fetch, the priority it is scheduled under, a bag
//! of free-form metadata and, optionally, the continuations the engine calls
//! once the request reaches final delivery. Requests are immutable by
//! convention once they enter the engine: stages that want a different request
//! build a new one (usually via [`Request::replace_url`] or the `with_*`
//! methods on a clone).

use crate::error::{CrawlError, Failure};
use crate::response::Response;
use crate::scheduler::Prioritized;
use crate::spider::SpiderOutput;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Success continuation: receives the final response.
pub type Callback = Arc<dyn Fn(Response) -> Result<SpiderOutput, CrawlError> + Send + Sync>;

/// Failure continuation: receives the captured fault.
pub type Errback = Arc<dyn Fn(Failure) -> Result<SpiderOutput, CrawlError> + Send + Sync>;

/// Meta key that exempts a request from duplicate filtering.
pub const DONT_FILTER: &str = "dont_filter";

#[derive(Clone)]
pub struct Request {
    pub url: Url,
    pub priority: i32,
    pub meta: Map<String, Value>,
    callback: Option<Callback>,
    errback: Option<Errback>,
}

impl Request {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            priority: 0,
            meta: Map::new(),
            callback: None,
            errback: None,
        }
    }

    /// Parses `url` and builds a request for it.
    pub fn parse(url: &str) -> Result<Self, CrawlError> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Response) -> Result<SpiderOutput, CrawlError> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_errback<F>(mut self, errback: F) -> Self
    where
        F: Fn(Failure) -> Result<SpiderOutput, CrawlError> + Send + Sync + 'static,
    {
        self.errback = Some(Arc::new(errback));
        self
    }

    /// Builds a new request for `url` that keeps this request's priority,
    /// metadata and continuations.
    pub fn replace_url(&self, url: Url) -> Self {
        Self {
            url,
            ..self.clone()
        }
    }

    pub fn callback(&self) -> Option<&Callback> {
        self.callback.as_ref()
    }

    pub fn errback(&self) -> Option<&Errback> {
        self.errback.as_ref()
    }

    pub fn meta_flag(&self, key: &str) -> bool {
        self.meta.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Identity used for duplicate detection: the URL without its fragment.
    pub fn fingerprint(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }
}

impl Prioritized for Request {
    type Priority = i32;

    fn priority(&self) -> i32 {
        self.priority
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url.as_str())
            .field("priority", &self.priority)
            .field("meta", &self.meta)
            .field("callback", &self.callback.is_some())
            .field("errback", &self.errback.is_some())
            .finish()
    }
}
