//! Serialized per-context executors and the task handles they return.
//!
//! # Responsibility
//! - Run submitted work one job at a time, in submission order, on a private
//!   thread owned by one context.
//! - Hand results back either to a blocked caller or to a completion callback
//!   running on that same thread.
//!
//! # Invariants
//! - Work submitted from the executor's own thread runs inline, so nested
//!   blocking calls never wait on themselves.
//! - A completion callback runs exactly once.
//! - A panicking job is logged and the executor keeps draining its queue.

use super::config::ErrorReporter;
use super::context::ContextKind;
use crate::db::DbError;
use crate::error::{StoreError, StoreResult};
use log::{debug, error};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, ThreadId};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
pub(crate) struct ExecutorHandle {
    sender: mpsc::Sender<Job>,
    thread: ThreadId,
    context: ContextKind,
}

impl ExecutorHandle {
    pub(crate) fn spawn(label: String, context: ContextKind) -> StoreResult<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_label = label.clone();
        let handle = thread::Builder::new()
            .name(label)
            .spawn(move || run_jobs(&thread_label, &receiver))
            .map_err(|err| StoreError::Db(DbError::Io(err)))?;

        Ok(Self {
            sender,
            thread: handle.thread().id(),
            context,
        })
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Queues `job`, handing it back when the executor has stopped.
    fn enqueue(&self, job: Job) -> Result<(), Job> {
        self.sender.send(job).map_err(|mpsc::SendError(job)| job)
    }
}

fn run_jobs(label: &str, receiver: &mpsc::Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                "event=executor_panic module=stack status=error executor={} payload={}",
                label,
                panic_message(payload.as_ref())
            );
        }
    }
    debug!("event=executor_stop module=stack status=ok executor={label}");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle to one unit of work submitted to a context.
///
/// Consume it exactly one way: [`Task::wait`] blocks the calling thread,
/// [`Task::on_complete`] delivers the result to a callback on the context
/// thread, [`Task::on_success`] runs a callback only when the work succeeded.
/// Dropping the handle lets the work finish unobserved.
#[must_use = "a task does nothing observable unless waited on or given a callback"]
pub struct Task<T> {
    receiver: mpsc::Receiver<StoreResult<T>>,
    executor: Option<ExecutorHandle>,
    context: ContextKind,
    reporter: ErrorReporter,
}

impl<T: Send + 'static> Task<T> {
    pub(crate) fn submit<F>(executor: &ExecutorHandle, reporter: ErrorReporter, work: F) -> Self
    where
        F: FnOnce() -> StoreResult<T> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        if executor.is_current() {
            let _ = sender.send(work());
        } else {
            // A rejected job drops its sender, which `wait` reports as unavailable.
            let _ = executor.enqueue(Box::new(move || {
                let _ = sender.send(work());
            }));
        }

        Self {
            receiver,
            executor: Some(executor.clone()),
            context: executor.context,
            reporter,
        }
    }

    /// Task that already holds its result, used when no executor could be
    /// resolved for the context.
    pub(crate) fn ready(
        context: ContextKind,
        reporter: ErrorReporter,
        result: StoreResult<T>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        let _ = sender.send(result);
        Self {
            receiver,
            executor: None,
            context,
            reporter,
        }
    }

    /// Context the work was submitted to.
    pub fn context(&self) -> ContextKind {
        self.context
    }

    /// Blocks until the work has run and returns its result.
    pub fn wait(self) -> StoreResult<T> {
        let context = self.context;
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(StoreError::ExecutorUnavailable(context)))
    }

    /// Runs `completion` with the result on the context thread, once.
    ///
    /// When the context has no live executor the callback runs on the calling
    /// thread instead; callers must not rely on thread affinity.
    pub fn on_complete<F>(self, completion: F)
    where
        F: FnOnce(StoreResult<T>) + Send + 'static,
    {
        let Self {
            receiver,
            executor,
            context,
            ..
        } = self;

        let job: Job = Box::new(move || {
            let result = receiver
                .recv()
                .unwrap_or_else(|_| Err(StoreError::ExecutorUnavailable(context)));
            completion(result);
        });

        match executor {
            Some(executor) => {
                if let Err(job) = executor.enqueue(job) {
                    job();
                }
            }
            None => job(),
        }
    }

    /// Runs `handler` with the value only when the work succeeds.
    ///
    /// A failure skips `handler` and goes to the stack error handler instead.
    pub fn on_success<F>(self, handler: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let reporter = self.reporter.clone();
        self.on_complete(move |result| match result {
            Ok(value) => handler(value),
            Err(err) => reporter.report(&err),
        });
    }
}
