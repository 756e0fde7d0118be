//! The `Response` produced by a fetch or synthesized by a pipeline stage.
//!
//! Every response that reaches the spider is bound to the request that
//! produced it. Only the engine binds: when it takes a downloaded response
//! off the output queue, or when a request stage short-circuits. The binding
//! happens once and there is no public setter, so neither downloaders nor
//! pipeline stages can rebind a response.

use crate::request::Request;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

#[derive(Clone)]
pub struct Response {
    pub url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    request: Option<Arc<Request>>,
}

impl Response {
    /// Creates a response that is not yet bound to a request.
    pub fn new(url: Url, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url,
            status,
            headers: HashMap::new(),
            body: body.into(),
            request: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_request(
        request: Arc<Request>,
        status: u16,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            url: request.url.clone(),
            status,
            headers: HashMap::new(),
            body: body.into(),
            request: Some(request),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// The request this response originated from, once bound.
    pub fn request(&self) -> Option<&Arc<Request>> {
        self.request.as_ref()
    }

    /// Binds the originating request. Returns `false` and leaves the existing
    /// binding untouched if the response was already bound.
    pub(crate) fn bind_request(&mut self, request: Arc<Request>) -> bool {
        if self.request.is_some() {
            return false;
        }
        self.request = Some(request);
        true
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("url", &self.url.as_str())
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("request", &self.request.as_ref().map(|r| r.url.as_str()))
            .finish()
    }
}
