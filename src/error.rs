//! # Error Module
//!
//! Defines `CrawlError`, the single error type flowing through the engine,
//! and `Failure`, the value handed to a request's failure continuation.
//!
//! Errors are classified by how the engine reacts to them:
//!
//! - `NotConfigured` is returned by component constructors that decline to be
//!   installed. The engine skips the component and carries on.
//! - `Configuration`, `NotSetUp` and `AlreadySetUp` are fatal and abort
//!   `setup()` / `start()`.
//! - `Stage`, `Spider`, `Download` and `Other` are per-item faults. They are
//!   isolated to the item that produced them and routed to its failure
//!   continuation.
//! - `QueueClosed` is expected after `stop()` and is logged, not propagated.

use crate::request::Request;
use std::sync::Arc;

/// Errors produced by the engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("Component not configured: {0}")]
    NotConfigured(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Queue is closed")]
    QueueClosed,

    #[error("Invalid engine state: cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("Engine has not been set up")]
    NotSetUp,

    #[error("Engine has already been set up")]
    AlreadySetUp,

    #[error("Engine is no longer accepting commands")]
    EngineClosed,

    #[error("Pipeline stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Spider error: {0}")]
    Spider(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Shorthand for a stage fault.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        CrawlError::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for the non-fatal "decline to install" signal.
    pub fn is_not_configured(&self) -> bool {
        matches!(self, CrawlError::NotConfigured(_))
    }
}

/// A captured fault together with the request it belongs to.
#[derive(Debug, Clone)]
pub struct Failure {
    pub request: Option<Arc<Request>>,
    pub error: Arc<CrawlError>,
}

impl Failure {
    pub fn new(request: Option<Arc<Request>>, error: CrawlError) -> Self {
        Self {
            request,
            error: Arc::new(error),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.request {
            Some(request) => write!(f, "{} ({})", self.error, request.url),
            None => write!(f, "{}", self.error),
        }
    }
}
