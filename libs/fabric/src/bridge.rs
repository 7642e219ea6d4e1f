//! Event bridge
//!
//! Runs on a connection's native dispatch queue and turns each native
//! callback into exactly one task on the host [`EventLoop`]. Because the
//! native queue is serial and the host queue is FIFO, listeners see
//! callbacks in the order the native side produced them.
//!
//! The bridge only holds a [`Weak`] reference to whatever it delivers to.
//! A task whose target is gone, or whose connection was stopped after the
//! task was queued, is dropped without a trace beyond a log line.
//!
//! A full host queue never loses a callback. Off the tokio runtime the
//! bridge waits for room. A bridge driven from a runtime thread cannot
//! wait there, so from then on it hands every post to a relay queue of its
//! own that does the waiting, which keeps the order intact.
//!
//! [`EventLoop`]: crate::runtime::EventLoop

use std::sync::{Arc, Weak};

use servlink_core::Value;
use tracing::{error, trace, warn};

use crate::codec;
use crate::connection::Gate;
use crate::native::{NativeError, NativeObject};
use crate::runtime::LoopHandle;
use crate::transport::{DispatchQueue, NativeHandler};

/// What a single native callback turned into
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Inbound message, already decoded
    Event(Value),
    /// Recoverable native error, described as a value
    Error(Value),
    /// The native side ended the connection
    Invalidated(NativeError),
}

/// Receiver of deliveries on the host event loop
pub trait DeliveryTarget: Send + Sync + 'static {
    fn deliver(&self, delivery: Delivery);
}

/// Native-side half of the bridge for one connection
pub struct EventBridge {
    service: Arc<str>,
    target: Weak<dyn DeliveryTarget>,
    events: LoopHandle,
    gate: Arc<Gate>,
    finished: bool,
    relay: Option<DispatchQueue>,
}

impl EventBridge {
    pub fn new(
        service: impl Into<Arc<str>>,
        target: Weak<dyn DeliveryTarget>,
        events: LoopHandle,
        gate: Arc<Gate>,
    ) -> Self {
        Self {
            service: service.into(),
            target,
            events,
            gate,
            finished: false,
            relay: None,
        }
    }

    /// Box the bridge up as the connection's native handler
    pub fn into_handler(mut self) -> NativeHandler {
        Box::new(move |object| self.handle(object))
    }

    /// Handle one native callback
    pub fn handle(&mut self, object: NativeObject) {
        if self.finished || !self.gate.is_open() {
            trace!(service = %self.service, "Native callback after stop dropped");
            return;
        }

        let delivery = self.classify(object);
        let target = self.target.clone();
        let gate = Arc::clone(&self.gate);
        let service = Arc::clone(&self.service);

        let task = move || {
            if !gate.is_open() {
                trace!(service = %service, "Late delivery dropped");
                return;
            }
            match target.upgrade() {
                Some(target) => target.deliver(delivery),
                None => trace!(service = %service, "Delivery target gone"),
            }
        };

        if self.relay.is_none() && tokio::runtime::Handle::try_current().is_ok() {
            match DispatchQueue::new(format!("{}.relay", self.service)) {
                Ok(relay) => self.relay = Some(relay),
                Err(e) => {
                    error!(service = %self.service, error = %e, "Failed to start delivery relay");
                    return;
                }
            }
        }

        match &self.relay {
            Some(relay) => {
                let events = self.events.clone();
                let service = Arc::clone(&self.service);
                let relayed = relay.dispatch(move || {
                    if let Err(e) = events.post(task) {
                        error!(service = %service, error = %e, "Failed to queue delivery");
                    }
                });
                if !relayed {
                    error!(service = %self.service, "Delivery relay gone");
                }
            }
            None => {
                if let Err(e) = self.events.post(task) {
                    error!(service = %self.service, error = %e, "Failed to queue delivery");
                }
            }
        }
    }

    fn classify(&mut self, object: NativeObject) -> Delivery {
        match object {
            NativeObject::Error(e) if e.is_terminal() => {
                // Nothing follows an invalidation.
                self.finished = true;
                Delivery::Invalidated(e)
            }
            NativeObject::Error(e) => {
                if let NativeError::Other(detail) = &e {
                    warn!(service = %self.service, detail = %detail, "Unrecognized native error");
                }
                Delivery::Error(Value::String(e.to_string()))
            }
            other => {
                let decoded = codec::decode_with_diagnostics(&other);
                for diagnostic in &decoded.diagnostics {
                    warn!(service = %self.service, %diagnostic, "Inbound payload degraded");
                }
                Delivery::Event(decoded.value)
            }
        }
    }
}
