//! Servlink Fabric - service connection bridge
//!
//! Opens connections to named services, translates [`Value`] payloads to
//! and from native objects, and delivers inbound events and errors to
//! listeners on a single host event loop, in the order the native side
//! produced them.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use servlink_fabric::config::DEFAULT_EVENT_QUEUE_CAPACITY;
//! use servlink_fabric::{event_loop, Bus, EventEmitter, ServiceConnection, Stream, Value};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Bus::new();
//! let (events, event_loop) = event_loop(DEFAULT_EVENT_QUEUE_CAPACITY);
//! event_loop.spawn();
//!
//! let conn = ServiceConnection::new("com.example.svc", Arc::new(bus), events)?;
//! conn.on(Stream::Event, |payload| println!("event: {payload}"));
//! conn.on(Stream::Error, |payload| eprintln!("error: {payload}"));
//!
//! conn.setup()?;
//!
//! let mut message = Value::map();
//! message.insert("kMsgId", 1);
//! conn.send_message(&message)?;
//!
//! conn.stop();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod codec;
pub mod config;
pub mod connection;
pub mod emitter;
pub mod error;
pub mod native;
pub mod runtime;
pub mod service;
pub mod transport;

// Re-exports for convenience
pub use config::{ConnectOptions, Namespace};
pub use connection::{Connection, State};
pub use emitter::{EventEmitter, Stream, SubscriptionId};
pub use error::{Error, Result};
pub use native::{NativeError, NativeObject};
pub use runtime::{event_loop, EventLoop, LoopHandle};
pub use service::{ServiceConnection, ServiceConnectionBuilder};
pub use servlink_core::Value;
pub use transport::{Bus, Endpoint, Peer, UnixEndpoint};
