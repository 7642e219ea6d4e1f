//! Serial dispatch queues
//!
//! Every native connection owns one queue. All of its callbacks run there,
//! one at a time and in submission order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, trace};

use crate::error::Result;
use crate::native::NativeObject;
use crate::transport::NativeHandler;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Named serial queue backed by a dedicated worker thread
///
/// The worker exits once every clone of the queue is dropped and the
/// remaining jobs have run.
#[derive(Clone)]
pub struct DispatchQueue {
    label: Arc<str>,
    tx: mpsc::UnboundedSender<Job>,
}

impl DispatchQueue {
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label: Arc<str> = Arc::from(label.into());
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let worker_label = Arc::clone(&label);
        thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(queue = %worker_label, "Dispatch queue job panicked");
                    }
                }
                trace!(queue = %worker_label, "Dispatch queue drained");
            })?;

        Ok(Self { label, tx })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Submit a job; returns `false` if the worker is gone
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("label", &self.label)
            .finish()
    }
}

/// A connection's event handler together with the queue it runs on
///
/// Once closed, no new callbacks are accepted and the handler is released
/// on the queue after everything already submitted has run.
pub(crate) struct HandlerQueue {
    queue: DispatchQueue,
    handler: Mutex<Option<NativeHandler>>,
    closed: AtomicBool,
}

impl HandlerQueue {
    pub(crate) fn new(label: impl Into<String>, handler: NativeHandler) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            queue: DispatchQueue::new(label)?,
            handler: Mutex::new(Some(handler)),
            closed: AtomicBool::new(false),
        }))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue one callback; returns `false` once closed
    pub(crate) fn deliver(self: &Arc<Self>, object: NativeObject) -> bool {
        if self.is_closed() {
            return false;
        }
        let this = Arc::clone(self);
        self.queue.dispatch(move || this.invoke(object))
    }

    /// Queue a last callback and close
    pub(crate) fn finish(self: &Arc<Self>, object: NativeObject) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let this = Arc::clone(self);
        self.queue.dispatch(move || {
            this.invoke(object);
            this.release();
        })
    }

    /// Close without a final callback
    pub(crate) fn cancel(self: &Arc<Self>) {
        self.closed.store(true, Ordering::Release);
        let this = Arc::clone(self);
        self.queue.dispatch(move || this.release());
    }

    fn invoke(&self, object: NativeObject) {
        if let Some(handler) = self.handler.lock().as_mut() {
            handler(object);
        }
    }

    fn release(&self) {
        self.handler.lock().take();
    }
}
