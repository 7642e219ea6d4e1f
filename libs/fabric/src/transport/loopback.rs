//! In-process service bus
//!
//! Services register under a name in one of two namespaces; clients reach
//! them through [`Bus`] as an [`Endpoint`]. Every message is copied through
//! the wire encoding on the way, so neither side ever shares an object with
//! the other. Each service runs its handler on its own dispatch queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::codec::wire;
use crate::config::{ConnectOptions, Namespace};
use crate::error::{Error, Result};
use crate::native::{NativeError, NativeObject};
use crate::transport::queue::{DispatchQueue, HandlerQueue};
use crate::transport::{Endpoint, NativeConnection, NativeHandler};

/// Service-side behavior
///
/// All methods run on the service's dispatch queue.
pub trait ServiceHandler: Send + Sync + 'static {
    /// A client resumed a connection to this service
    fn on_connect(&self, _peer: Peer) {}

    /// A client sent a message
    fn on_message(&self, peer: &Peer, message: NativeObject);

    /// A client cancelled its connection
    fn on_disconnect(&self, _peer: &Peer) {}
}

impl<F> ServiceHandler for F
where
    F: Fn(&Peer, NativeObject) + Send + Sync + 'static,
{
    fn on_message(&self, peer: &Peer, message: NativeObject) {
        self(peer, message)
    }
}

/// The service's view of one connected client
#[derive(Clone)]
pub struct Peer {
    id: u64,
    client: Arc<HandlerQueue>,
}

impl Peer {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the client can still receive callbacks
    pub fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }

    /// Send a message to the client
    pub fn send(&self, message: &NativeObject) -> Result<()> {
        let copy = wire::copy(message)?;
        if self.client.deliver(copy) {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    /// Tell the client the service went away; the connection stays usable
    pub fn interrupt(&self) -> Result<()> {
        if self
            .client
            .deliver(NativeObject::Error(NativeError::ConnectionInterrupted))
        {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    /// End the client's connection for good
    pub fn invalidate(&self) {
        self.client
            .finish(NativeObject::Error(NativeError::ConnectionInvalid));
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

struct Service {
    name: String,
    handler: Arc<dyn ServiceHandler>,
    queue: DispatchQueue,
    peers: Mutex<HashMap<u64, Peer>>,
}

impl Service {
    fn connect(self: &Arc<Self>, peer: Peer) {
        self.peers.lock().insert(peer.id, peer.clone());
        let handler = Arc::clone(&self.handler);
        self.queue.dispatch(move || handler.on_connect(peer));
    }

    fn message(&self, peer: &Peer, message: NativeObject) {
        let handler = Arc::clone(&self.handler);
        let peer = peer.clone();
        self.queue
            .dispatch(move || handler.on_message(&peer, message));
    }

    fn disconnect(&self, peer: &Peer) {
        if self.peers.lock().remove(&peer.id).is_none() {
            return;
        }
        let handler = Arc::clone(&self.handler);
        let peer = peer.clone();
        self.queue.dispatch(move || handler.on_disconnect(&peer));
    }
}

#[derive(Default)]
struct BusInner {
    services: Mutex<HashMap<(Namespace, String), Arc<Service>>>,
    next_peer: AtomicU64,
}

/// In-process registry of named services
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service in the system namespace
    pub fn register(&self, name: impl Into<String>, handler: impl ServiceHandler) -> Result<()> {
        self.register_in(Namespace::System, name, handler)
    }

    /// Register a service in a specific namespace
    pub fn register_in(
        &self,
        namespace: Namespace,
        name: impl Into<String>,
        handler: impl ServiceHandler,
    ) -> Result<()> {
        let name = name.into();
        let mut services = self.inner.services.lock();
        let key = (namespace, name.clone());
        if services.contains_key(&key) {
            return Err(Error::ServiceExists(name));
        }

        let service = Service {
            queue: DispatchQueue::new(format!("{name}.service"))?,
            name: name.clone(),
            handler: Arc::new(handler),
            peers: Mutex::new(HashMap::new()),
        };
        services.insert(key, Arc::new(service));
        debug!(service = %name, ?namespace, "Service registered");
        Ok(())
    }

    /// Remove a system service, invalidating every connected client
    pub fn unregister(&self, name: &str) -> bool {
        self.unregister_in(Namespace::System, name)
    }

    /// Remove a service, invalidating every connected client
    pub fn unregister_in(&self, namespace: Namespace, name: &str) -> bool {
        let removed = self
            .inner
            .services
            .lock()
            .remove(&(namespace, name.to_string()));

        match removed {
            Some(service) => {
                let peers: Vec<Peer> = service.peers.lock().drain().map(|(_, p)| p).collect();
                debug!(service = %service.name, peers = peers.len(), "Service unregistered");
                for peer in peers {
                    peer.invalidate();
                }
                true
            }
            None => false,
        }
    }

    fn lookup(&self, namespace: Namespace, name: &str) -> Option<Arc<Service>> {
        self.inner
            .services
            .lock()
            .get(&(namespace, name.to_string()))
            .cloned()
    }
}

impl Endpoint for Bus {
    fn connect(
        &self,
        service_name: &str,
        options: &ConnectOptions,
        handler: NativeHandler,
    ) -> Result<Box<dyn NativeConnection>> {
        let client = HandlerQueue::new(options.queue_label_for(service_name), handler)?;
        Ok(Box::new(LoopbackConnection {
            bus: self.clone(),
            service_name: service_name.to_string(),
            namespace: options.namespace(),
            client,
            link: Link::Suspended,
        }))
    }
}

enum Link {
    Suspended,
    Connected { service: Arc<Service>, peer: Peer },
    Unreachable,
    Cancelled,
}

struct LoopbackConnection {
    bus: Bus,
    service_name: String,
    namespace: Namespace,
    client: Arc<HandlerQueue>,
    link: Link,
}

impl NativeConnection for LoopbackConnection {
    fn resume(&mut self) {
        if !matches!(self.link, Link::Suspended) {
            return;
        }

        match self.bus.lookup(self.namespace, &self.service_name) {
            Some(service) => {
                let peer = Peer {
                    id: self.bus.inner.next_peer.fetch_add(1, Ordering::Relaxed),
                    client: Arc::clone(&self.client),
                };
                service.connect(peer.clone());
                self.link = Link::Connected { service, peer };
            }
            None => {
                debug!(service = %self.service_name, "No such service");
                self.client
                    .finish(NativeObject::Error(NativeError::ConnectionInvalid));
                self.link = Link::Unreachable;
            }
        }
    }

    fn send_message(&mut self, message: NativeObject) {
        let Link::Connected { service, peer } = &self.link else {
            trace!(service = %self.service_name, "Message dropped, connection not live");
            return;
        };
        if !peer.is_connected() {
            trace!(service = %self.service_name, "Message dropped, peer invalidated");
            return;
        }

        match wire::copy(&message) {
            Ok(copy) => service.message(peer, copy),
            Err(e) => warn!(service = %self.service_name, error = %e, "Message dropped"),
        }
    }

    fn cancel(&mut self) {
        if let Link::Connected { service, peer } = &self.link {
            service.disconnect(peer);
        }
        self.client.cancel();
        self.link = Link::Cancelled;
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        if !matches!(self.link, Link::Cancelled) {
            self.cancel();
        }
    }
}
