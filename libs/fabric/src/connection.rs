//! Connection state machine
//!
//! A [`Connection`] owns at most one native handle and moves through
//! `Created -> Active -> Stopped`, never backwards.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use servlink_core::Value;
use tracing::debug;

use crate::codec;
use crate::config::{ConnectOptions, MAX_SERVICE_NAME_LEN};
use crate::error::{Error, Result};
use crate::native::NativeError;
use crate::transport::{Endpoint, NativeConnection, NativeHandler};

/// Lifecycle state of a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Created,
    Active,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Created => f.write_str("created"),
            State::Active => f.write_str("active"),
            State::Stopped => f.write_str("stopped"),
        }
    }
}

/// Whether callbacks for a connection may still be delivered
///
/// Opened by `setup`, closed synchronously by `stop` or invalidation. The
/// event bridge checks it both before queueing a callback and again right
/// before delivering it.
#[derive(Debug, Default)]
pub struct Gate {
    open: AtomicBool,
}

impl Gate {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Close the gate, returning whether it was open
    fn close(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }
}

/// Check a service name before anything native is touched
pub fn validate_service_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.trim().is_empty() {
        "must not be blank"
    } else if name.contains('\0') {
        "must not contain NUL"
    } else if name.len() > MAX_SERVICE_NAME_LEN {
        "too long"
    } else {
        return Ok(());
    };

    Err(Error::InvalidServiceName {
        name: name.to_string(),
        reason,
    })
}

/// One service connection and its native handle
pub struct Connection {
    service_name: String,
    state: State,
    handle: Option<Box<dyn NativeConnection>>,
    gate: Arc<Gate>,
}

impl Connection {
    /// Allocate a connection in state `Created`
    ///
    /// No native resources are acquired until [`Connection::setup`].
    pub fn create(service_name: impl Into<String>) -> Result<Self> {
        let service_name = service_name.into();
        validate_service_name(&service_name)?;

        Ok(Self {
            service_name,
            state: State::Created,
            handle: None,
            gate: Arc::new(Gate::default()),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Delivery gate shared with the event bridge
    pub fn gate(&self) -> Arc<Gate> {
        Arc::clone(&self.gate)
    }

    /// Open the native connection, register `handler`, and resume
    ///
    /// Only valid once, from `Created`. A failure to connect leaves the
    /// connection in `Created`.
    pub fn setup(
        &mut self,
        endpoint: &dyn Endpoint,
        options: &ConnectOptions,
        handler: NativeHandler,
    ) -> Result<()> {
        if self.state != State::Created {
            return Err(Error::AlreadySetup);
        }

        let mut handle = endpoint.connect(&self.service_name, options, handler)?;
        self.gate.open();
        handle.resume();
        self.handle = Some(handle);
        self.state = State::Active;

        debug!(service = %self.service_name, "Connection active");
        Ok(())
    }

    /// Encode `payload` and hand it to the native send primitive
    ///
    /// Fire and forget: success means the message was handed over, not
    /// that it arrived.
    pub fn send_message(&mut self, payload: &Value) -> Result<()> {
        let handle = match (self.state, self.handle.as_mut()) {
            (State::Active, Some(handle)) => handle,
            (state, _) => return Err(Error::NotActive { state }),
        };

        let message = codec::encode_message(payload)?;
        handle.send_message(message);
        Ok(())
    }

    /// Cancel and release the native connection
    ///
    /// Idempotent. Returns `true` only for the call that actually stopped an
    /// active connection.
    pub fn stop(&mut self) -> bool {
        if self.state != State::Active {
            return false;
        }
        self.teardown();
        debug!(service = %self.service_name, "Connection stopped");
        true
    }

    /// Stop because the native side invalidated the connection
    ///
    /// Returns the error describing the invalidation if this moved the
    /// connection to `Stopped`.
    pub(crate) fn invalidate(&mut self, reason: &NativeError) -> Option<Error> {
        if self.state != State::Active {
            return None;
        }
        self.teardown();
        Some(Error::NativeInvalidation {
            service: self.service_name.clone(),
            reason: reason.to_string(),
        })
    }

    fn teardown(&mut self) {
        self.gate.close();
        if let Some(mut handle) = self.handle.take() {
            handle.cancel();
        }
        self.state = State::Stopped;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("service_name", &self.service_name)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;
    use crate::native::NativeObject;

    /// Endpoint recording every native call
    #[derive(Default)]
    struct Recorder {
        connects: AtomicUsize,
        log: Arc<Mutex<Vec<String>>>,
    }

    struct RecordedConnection {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl NativeConnection for RecordedConnection {
        fn resume(&mut self) {
            self.log.lock().push("resume".into());
        }

        fn send_message(&mut self, message: NativeObject) {
            self.log.lock().push(format!("send {}", message.type_name()));
        }

        fn cancel(&mut self) {
            self.log.lock().push("cancel".into());
        }
    }

    impl Endpoint for Recorder {
        fn connect(
            &self,
            _service_name: &str,
            _options: &ConnectOptions,
            _handler: NativeHandler,
        ) -> Result<Box<dyn NativeConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordedConnection {
                log: Arc::clone(&self.log),
            }))
        }
    }

    fn handler() -> NativeHandler {
        Box::new(|_| {})
    }

    fn active(recorder: &Recorder) -> Connection {
        let mut conn = Connection::create("com.example.svc").unwrap();
        conn.setup(recorder, &ConnectOptions::default(), handler())
            .unwrap();
        conn
    }

    #[test]
    fn create_rejects_bad_names() {
        for name in ["", "   ", "a\0b"] {
            assert!(matches!(
                Connection::create(name),
                Err(Error::InvalidServiceName { .. })
            ));
        }
        let long = "x".repeat(MAX_SERVICE_NAME_LEN + 1);
        assert!(Connection::create(long).is_err());
        assert!(Connection::create("x".repeat(MAX_SERVICE_NAME_LEN)).is_ok());
    }

    #[test]
    fn send_before_setup_touches_nothing() {
        let recorder = Recorder::default();
        let mut conn = Connection::create("com.example.svc").unwrap();

        let err = conn.send_message(&Value::map()).unwrap_err();
        assert!(matches!(err, Error::NotActive { state: State::Created }));
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 0);
        assert!(recorder.log.lock().is_empty());
    }

    #[test]
    fn setup_resumes_and_activates() {
        let recorder = Recorder::default();
        let conn = active(&recorder);

        assert_eq!(conn.state(), State::Active);
        assert!(conn.gate().is_open());
        assert_eq!(*recorder.log.lock(), vec!["resume".to_string()]);
    }

    #[test]
    fn second_setup_is_rejected() {
        let recorder = Recorder::default();
        let mut conn = active(&recorder);

        let err = conn
            .setup(&recorder, &ConnectOptions::default(), handler())
            .unwrap_err();
        assert!(matches!(err, Error::AlreadySetup));
        assert_eq!(conn.state(), State::Active);
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsupported_payload_sends_nothing() {
        let recorder = Recorder::default();
        let mut conn = active(&recorder);

        let mut payload = Value::map();
        payload.insert("ratio", f64::NAN);
        let err = conn.send_message(&payload).unwrap_err();
        assert!(matches!(err, Error::UnsupportedValue { ref path, .. } if path == "ratio"));
        assert_eq!(*recorder.log.lock(), vec!["resume".to_string()]);
    }

    #[test]
    fn stop_is_idempotent() {
        let recorder = Recorder::default();
        let mut conn = active(&recorder);

        assert!(conn.stop());
        assert!(!conn.stop());
        assert!(!conn.stop());
        assert_eq!(conn.state(), State::Stopped);
        assert!(!conn.gate().is_open());
        assert_eq!(
            *recorder.log.lock(),
            vec!["resume".to_string(), "cancel".to_string()]
        );

        let err = conn.send_message(&Value::map()).unwrap_err();
        assert!(matches!(err, Error::NotActive { state: State::Stopped }));
    }

    #[test]
    fn stop_before_setup_is_a_no_op() {
        let mut conn = Connection::create("com.example.svc").unwrap();
        assert!(!conn.stop());
        assert_eq!(conn.state(), State::Created);
    }

    #[test]
    fn invalidation_stops_once() {
        let recorder = Recorder::default();
        let mut conn = active(&recorder);

        let err = conn.invalidate(&NativeError::ConnectionInvalid);
        assert!(matches!(err, Some(Error::NativeInvalidation { .. })));
        assert_eq!(conn.state(), State::Stopped);
        assert!(conn.invalidate(&NativeError::ConnectionInvalid).is_none());
        assert!(!conn.stop());
    }

    #[test]
    fn drop_cancels_active_handle() {
        let recorder = Recorder::default();
        drop(active(&recorder));
        assert_eq!(
            *recorder.log.lock(),
            vec!["resume".to_string(), "cancel".to_string()]
        );
    }
}
