//! Serial execution queue backed by a named worker thread

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs dispatched jobs one at a time, in dispatch order
///
/// Dropping the queue lets already-dispatched jobs finish, then joins the
/// worker (unless the drop happens on the worker itself).
pub struct SerialQueue {
    label: String,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl SerialQueue {
    pub fn new(label: impl Into<String>) -> std::io::Result<Self> {
        let label = label.into();
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let thread_label = label.clone();
        let worker = std::thread::Builder::new()
            .name(label.clone())
            .spawn(move || run_jobs(&thread_label, receiver))?;

        log::debug!("Started serial queue {}", label);
        Ok(Self {
            label,
            worker_id: worker.thread().id(),
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue a job behind everything already dispatched
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            if sender.send(Box::new(job)).is_err() {
                log::warn!("Serial queue {} is gone, job dropped", self.label);
            }
        }
    }

    /// True when called from the queue's worker thread
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.worker_id
    }

    /// Block until every job dispatched before this call has run
    ///
    /// Returns immediately when called from the worker itself.
    pub fn barrier(&self) {
        if self.is_current() {
            return;
        }
        let (done, wait) = crossbeam_channel::bounded::<()>(1);
        self.dispatch(move || {
            let _ = done.send(());
        });
        let _ = wait.recv();
    }
}

fn run_jobs(label: &str, receiver: Receiver<Job>) {
    for job in receiver {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!("Job on serial queue {} panicked", label);
        }
    }
    log::debug!("Serial queue {} drained", label);
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if std::thread::current().id() != self.worker_id {
                let _ = worker.join();
            }
        }
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.label)
            .finish()
    }
}
