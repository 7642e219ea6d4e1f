use crate::config::ConnectOptions;
use crate::error::Result;
use crate::native::NativeObject;

pub mod loopback;
pub mod queue;
pub mod unix;

pub use self::loopback::{Bus, Peer, ServiceHandler};
pub use self::queue::DispatchQueue;
pub use self::unix::{UnixEndpoint, UnixTransport, UnixTransportListener};

/// Callback receiving everything the native side delivers for one
/// connection: inbound messages and error objects alike
///
/// Always invoked on the connection's own dispatch queue.
pub type NativeHandler = Box<dyn FnMut(NativeObject) + Send + 'static>;

/// Service-name-addressed connection primitive
pub trait Endpoint: Send + Sync {
    /// Open a connection to `service_name`
    ///
    /// The returned connection is suspended: `handler` is not called before
    /// [`NativeConnection::resume`].
    fn connect(
        &self,
        service_name: &str,
        options: &ConnectOptions,
        handler: NativeHandler,
    ) -> Result<Box<dyn NativeConnection>>;
}

/// One open native connection
///
/// None of these calls block; work is handed to the connection's queue.
pub trait NativeConnection: Send {
    /// Start delivering callbacks and sending messages
    fn resume(&mut self);

    /// Send a message without waiting for delivery
    fn send_message(&mut self, message: NativeObject);

    /// Tear the connection down and release the handler
    fn cancel(&mut self);
}

/// Framed transport for native objects
///
/// Each transport instance represents a single connection.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send one object over the transport
    async fn send(&mut self, message: &NativeObject) -> Result<()>;

    /// Receive one object from the transport
    async fn receive(&mut self) -> Result<NativeObject>;

    /// Close the transport connection
    async fn close(&mut self) -> Result<()>;
}

/// Accepts incoming transports
#[async_trait::async_trait]
pub trait TransportListener: Send + Sync {
    type Transport: Transport;

    async fn accept(&self) -> Result<Self::Transport>;

    async fn close(&mut self) -> Result<()>;
}
