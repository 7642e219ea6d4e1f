//! Public façade
//!
//! [`ServiceConnection`] is what applications hold: one per service name,
//! with `setup`, `send_message` and `stop`, and the `event` and `error`
//! streams through [`EventEmitter`].

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use servlink_core::Value;
use tracing::{debug, warn};

use crate::bridge::{Delivery, DeliveryTarget, EventBridge};
use crate::config::ConnectOptions;
use crate::connection::{Connection, State};
use crate::emitter::{EventEmitter, Listeners, Stream};
use crate::error::{Error, Result};
use crate::runtime::LoopHandle;
use crate::transport::Endpoint;

struct Inner {
    service_name: Arc<str>,
    connection: Mutex<Connection>,
    listeners: Listeners,
    endpoint: Arc<dyn Endpoint>,
    events: LoopHandle,
    options: ConnectOptions,
}

impl DeliveryTarget for Inner {
    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Event(payload) => {
                self.listeners.emit(Stream::Event, &payload);
            }
            Delivery::Error(payload) => {
                self.listeners.emit(Stream::Error, &payload);
            }
            Delivery::Invalidated(reason) => {
                // Lock released before listeners run; they may call back in.
                let stopped = self.connection.lock().invalidate(&reason);
                if let Some(e) = stopped {
                    warn!(service = %self.service_name, error = %e, "Connection invalidated");
                    self.listeners
                        .emit(Stream::Error, &Value::String(reason.to_string()));
                }
            }
        }
    }
}

/// Connection to one named service
///
/// Listeners run on the host [`EventLoop`](crate::runtime::EventLoop) the
/// connection was built with, one at a time and in native arrival order.
/// Dropping the façade stops the connection; callbacks still in flight are
/// discarded.
pub struct ServiceConnection {
    inner: Arc<Inner>,
}

impl ServiceConnection {
    /// Create a connection in state `Created` with default options
    pub fn new(
        service_name: impl Into<String>,
        endpoint: Arc<dyn Endpoint>,
        events: LoopHandle,
    ) -> Result<Self> {
        Self::with_options(service_name, endpoint, events, ConnectOptions::default())
    }

    pub fn builder(service_name: impl Into<String>) -> ServiceConnectionBuilder {
        ServiceConnectionBuilder::new(service_name)
    }

    fn with_options(
        service_name: impl Into<String>,
        endpoint: Arc<dyn Endpoint>,
        events: LoopHandle,
        options: ConnectOptions,
    ) -> Result<Self> {
        let connection = Connection::create(service_name)?;
        let service_name: Arc<str> = Arc::from(connection.service_name());

        Ok(Self {
            inner: Arc::new(Inner {
                service_name,
                connection: Mutex::new(connection),
                listeners: Listeners::new(),
                endpoint,
                events,
                options,
            }),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn state(&self) -> State {
        self.inner.connection.lock().state()
    }

    /// Open the native connection and start delivering callbacks
    pub fn setup(&self) -> Result<()> {
        let mut connection = self.inner.connection.lock();
        if connection.state() != State::Created {
            return Err(Error::AlreadySetup);
        }

        let weak = Arc::downgrade(&self.inner);
        let target: Weak<dyn DeliveryTarget> = weak;
        let bridge = EventBridge::new(
            Arc::clone(&self.inner.service_name),
            target,
            self.inner.events.clone(),
            connection.gate(),
        );

        connection.setup(
            self.inner.endpoint.as_ref(),
            &self.inner.options,
            bridge.into_handler(),
        )
    }

    /// Encode `payload` and send it without waiting for delivery
    pub fn send_message(&self, payload: &Value) -> Result<()> {
        self.inner.connection.lock().send_message(payload)
    }

    /// Serialize `payload` into a [`Value`] and send it
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let mut connection = self.inner.connection.lock();
        if connection.state() != State::Active {
            return Err(Error::NotActive {
                state: connection.state(),
            });
        }

        let value = servlink_core::to_value(payload)?;
        connection.send_message(&value)
    }

    /// Stop the connection; calling it again is a no-op
    pub fn stop(&self) {
        if self.inner.connection.lock().stop() {
            debug!(service = %self.inner.service_name, "Service connection stopped");
        }
    }
}

impl EventEmitter for ServiceConnection {
    fn listeners(&self) -> &Listeners {
        &self.inner.listeners
    }
}

impl fmt::Debug for ServiceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConnection")
            .field("service_name", &self.inner.service_name)
            .field("state", &self.state())
            .field("listeners", &self.inner.listeners)
            .finish()
    }
}

/// Builder for a [`ServiceConnection`]
pub struct ServiceConnectionBuilder {
    service_name: String,
    endpoint: Option<Arc<dyn Endpoint>>,
    events: Option<LoopHandle>,
    options: ConnectOptions,
}

impl ServiceConnectionBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            endpoint: None,
            events: None,
            options: ConnectOptions::default(),
        }
    }

    /// Set the endpoint services are reached through
    pub fn endpoint(mut self, endpoint: Arc<dyn Endpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set the host loop listeners run on
    pub fn event_loop(mut self, events: LoopHandle) -> Self {
        self.events = Some(events);
        self
    }

    /// Look the service up in the system (`true`) or session namespace
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.options.privileged = privileged;
        self
    }

    /// Label for the connection's dispatch queue
    pub fn queue_label(mut self, label: impl Into<String>) -> Self {
        self.options.queue_label = Some(label.into());
        self
    }

    pub fn build(self) -> Result<ServiceConnection> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| Error::Custom("Endpoint not set".to_string()))?;
        let events = self
            .events
            .ok_or_else(|| Error::Custom("Event loop not set".to_string()))?;

        ServiceConnection::with_options(self.service_name, endpoint, events, self.options)
    }
}
