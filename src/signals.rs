//! # Signals Module
//!
//! A synchronous publish/subscribe registry owned by a single engine.
//!
//! Handlers are registered per `SignalKind` and called in registration order
//! every time the engine sends a matching `Signal`. Payloads are typed: a
//! handler subscribed to `ResponseReceived` is handed `Signal::ResponseReceived`
//! carrying the response, nothing needs to be downcast.
//!
//! Handlers run inline on the engine's task and must not block.

use crate::request::Request;
use crate::response::Response;
use std::collections::HashMap;
use tracing::trace;

/// Identifies a signal for subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    EngineStarted,
    EngineStopping,
    EngineStopped,
    RequestReceived,
    ResponseDownloaded,
    ResponseReceived,
}

/// A signal together with its payload.
#[derive(Debug, Clone, Copy)]
pub enum Signal<'a> {
    EngineStarted,
    EngineStopping,
    EngineStopped,
    RequestReceived { request: &'a Request },
    ResponseDownloaded { response: &'a Response },
    ResponseReceived { response: &'a Response },
}

impl Signal<'_> {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::EngineStarted => SignalKind::EngineStarted,
            Signal::EngineStopping => SignalKind::EngineStopping,
            Signal::EngineStopped => SignalKind::EngineStopped,
            Signal::RequestReceived { .. } => SignalKind::RequestReceived,
            Signal::ResponseDownloaded { .. } => SignalKind::ResponseDownloaded,
            Signal::ResponseReceived { .. } => SignalKind::ResponseReceived,
        }
    }
}

pub type SignalHandler = Box<dyn FnMut(&Signal<'_>) + Send>;

/// Opaque id returned by [`SignalBus::connect`], used to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct SignalBus {
    handlers: HashMap<SignalKind, Vec<(HandlerId, SignalHandler)>>,
    next_id: u64,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to `kind`. Handlers fire in subscription order.
    pub fn connect<F>(&mut self, kind: SignalKind, handler: F) -> HandlerId
    where
        F: FnMut(&Signal<'_>) + Send + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Removes a handler. Returns `false` if it was not connected.
    pub fn disconnect(&mut self, kind: SignalKind, id: HandlerId) -> bool {
        let Some(handlers) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    pub fn send(&mut self, signal: Signal<'_>) {
        let kind = signal.kind();
        if let Some(handlers) = self.handlers.get_mut(&kind) {
            trace!("Sending {:?} to {} handler(s)", kind, handlers.len());
            for (_, handler) in handlers.iter_mut() {
                handler(&signal);
            }
        }
    }

    pub fn handler_count(&self, kind: SignalKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}
