//! Publish/subscribe capability
//!
//! Types that own a [`Listeners`] registry get `on`, `once`, `off`, and
//! `emit` by implementing [`EventEmitter`].

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use servlink_core::Value;

use crate::error::Error;

/// Observable stream of a service connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Event,
    Error,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Event => "event",
            Stream::Error => "error",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(Stream::Event),
            "error" => Ok(Stream::Error),
            other => Err(Error::Custom(format!("Unknown stream: {other}"))),
        }
    }
}

/// Listener callback
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by `on`/`once`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    stream: Stream,
    once: bool,
    listener: Listener,
}

/// Registry of listeners, in subscription order
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, stream: Stream, once: bool, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push(Entry {
            id,
            stream,
            once,
            listener,
        });
        id
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    pub fn count(&self, stream: Stream) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.stream == stream)
            .count()
    }

    /// Remove every listener of `stream`, or all listeners for `None`
    pub fn clear(&self, stream: Option<Stream>) {
        let mut entries = self.entries.lock();
        match stream {
            Some(stream) => entries.retain(|e| e.stream != stream),
            None => entries.clear(),
        }
    }

    /// Call every listener of `stream` with `payload`
    ///
    /// Listeners run outside the registry lock, so they may subscribe or
    /// unsubscribe while being called. Returns how many were called.
    pub fn emit(&self, stream: Stream, payload: &Value) -> usize {
        let snapshot: Vec<Listener> = {
            let mut entries = self.entries.lock();
            let snapshot = entries
                .iter()
                .filter(|e| e.stream == stream)
                .map(|e| Arc::clone(&e.listener))
                .collect();
            entries.retain(|e| !(e.once && e.stream == stream));
            snapshot
        };

        for listener in &snapshot {
            listener(payload);
        }
        snapshot.len()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("event", &self.count(Stream::Event))
            .field("error", &self.count(Stream::Error))
            .finish()
    }
}

/// Publish/subscribe surface
pub trait EventEmitter {
    fn listeners(&self) -> &Listeners;

    /// Subscribe to every payload on `stream`
    fn on<F>(&self, stream: Stream, listener: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners().add(stream, false, Arc::new(listener))
    }

    /// Subscribe to the next payload on `stream` only
    fn once<F>(&self, stream: Stream, listener: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners().add(stream, true, Arc::new(listener))
    }

    fn off(&self, id: SubscriptionId) -> bool {
        self.listeners().remove(id)
    }

    fn listener_count(&self, stream: Stream) -> usize {
        self.listeners().count(stream)
    }

    fn emit(&self, stream: Stream, payload: &Value) -> usize {
        self.listeners().emit(stream, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Emitter {
        listeners: Listeners,
    }

    impl EventEmitter for Emitter {
        fn listeners(&self) -> &Listeners {
            &self.listeners
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Listener) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |tag: &str| -> Listener {
                let log = Arc::clone(&log);
                let tag = tag.to_string();
                Arc::new(move |v: &Value| log.lock().push(format!("{tag}:{v}")))
            }
        };
        (log, make)
    }

    #[test]
    fn listeners_run_in_subscription_order_per_stream() {
        let emitter = Emitter::default();
        let (log, make) = recorder();

        let a = make("a");
        let b = make("b");
        let e = make("e");
        emitter.on(Stream::Event, move |v| a(v));
        emitter.on(Stream::Event, move |v| b(v));
        emitter.on(Stream::Error, move |v| e(v));

        assert_eq!(emitter.emit(Stream::Event, &Value::Int(1)), 2);
        assert_eq!(emitter.emit(Stream::Error, &Value::from("x")), 1);
        assert_eq!(*log.lock(), vec!["a:1", "b:1", "e:\"x\""]);
    }

    #[test]
    fn once_fires_a_single_time() {
        let emitter = Emitter::default();
        let (log, make) = recorder();
        let o = make("o");
        emitter.once(Stream::Event, move |v| o(v));

        assert_eq!(emitter.listener_count(Stream::Event), 1);
        emitter.emit(Stream::Event, &Value::Int(1));
        emitter.emit(Stream::Event, &Value::Int(2));
        assert_eq!(*log.lock(), vec!["o:1"]);
        assert_eq!(emitter.listener_count(Stream::Event), 0);
    }

    #[test]
    fn off_unsubscribes() {
        let emitter = Emitter::default();
        let id = emitter.on(Stream::Error, |_| {});
        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        assert_eq!(emitter.emit(Stream::Error, &Value::Null), 0);
    }

    #[test]
    fn listener_may_subscribe_during_emit() {
        let emitter = Arc::new(Emitter::default());
        let inner = Arc::clone(&emitter);
        emitter.once(Stream::Event, move |_| {
            inner.on(Stream::Event, |_| {});
        });

        emitter.emit(Stream::Event, &Value::Null);
        assert_eq!(emitter.listener_count(Stream::Event), 1);
    }

    #[test]
    fn stream_names_parse() {
        assert_eq!("event".parse::<Stream>().unwrap(), Stream::Event);
        assert_eq!(Stream::Error.to_string(), "error");
        assert!("close".parse::<Stream>().is_err());
    }
}
