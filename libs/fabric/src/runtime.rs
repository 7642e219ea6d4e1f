//! Host event loop
//!
//! The application side runs listeners from a single queue, one task at a
//! time. Native callbacks reach it through a [`LoopHandle`]; whoever owns
//! the [`EventLoop`] decides where and when tasks run.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Unit of work for the event loop
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Create a bounded host queue
pub fn event_loop(capacity: usize) -> (LoopHandle, EventLoop) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (LoopHandle { tx }, EventLoop { rx })
}

/// Sending half of the host queue
#[derive(Debug, Clone)]
pub struct LoopHandle {
    tx: mpsc::Sender<Task>,
}

impl LoopHandle {
    /// Queue a task
    ///
    /// Off the tokio runtime (native dispatch queues) this waits for room
    /// in the queue. On a runtime thread it cannot wait, and a full queue is
    /// an error.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        let task: Task = Box::new(task);

        if tokio::runtime::Handle::try_current().is_ok() {
            self.tx.try_send(task).map_err(|e| match e {
                TrySendError::Full(_) => Error::Custom("Event queue full".to_string()),
                TrySendError::Closed(_) => Error::LoopClosed,
            })
        } else {
            self.tx.blocking_send(task).map_err(|_| Error::LoopClosed)
        }
    }

    /// Whether the event loop has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of the host queue; runs tasks one at a time
pub struct EventLoop {
    rx: mpsc::Receiver<Task>,
}

impl EventLoop {
    /// Run tasks until every [`LoopHandle`] is gone
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            run_task(task);
        }
        debug!("Event loop finished");
    }

    /// Wait for the next task and run it
    ///
    /// Returns `false` once every [`LoopHandle`] is gone.
    pub async fn turn(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                run_task(task);
                true
            }
            None => false,
        }
    }

    /// Run every task already queued, without waiting for more
    pub fn run_until_idle(&mut self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(task) => {
                    run_task(task);
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Run the loop as a tokio task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("Event loop task panicked");
    }
}
