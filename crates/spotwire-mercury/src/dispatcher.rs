//! Single ordered worker that owns one piece of state.
//!
//! Submitted tasks run one at a time, in submission order, on a dedicated
//! thread that exclusively owns the state. Each task reports through its own
//! [`TaskHandle`]; a failing or panicking task never affects its neighbours.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, trace, warn};

/// What happens to queued tasks when the dispatcher closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Run everything already queued before the worker exits.
    #[default]
    Drain,
    /// Resolve queued tasks that have not started with [`TaskError::Rejected`].
    Reject,
}

/// Dispatcher worker configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name given to the worker thread.
    pub thread_name: String,
    /// Queue handling on close.
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: "spotwire-dispatch".to_string(),
            shutdown_policy: ShutdownPolicy::Drain,
        }
    }
}

/// Submission failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher was closed.
    #[error("dispatcher is closed")]
    Rejected,

    /// The worker thread could not be started.
    #[error("failed to spawn dispatcher worker: {0}")]
    Spawn(String),
}

/// Outcome of one task, delivered only through that task's handle.
#[derive(Debug, thiserror::Error)]
pub enum TaskError<E> {
    /// The task returned an error.
    #[error("task failed: {0}")]
    Failed(E),

    /// The task panicked; the worker carried on.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was still queued when a rejecting shutdown began.
    #[error("task rejected at shutdown")]
    Rejected,

    /// The worker went away without resolving the task.
    #[error("dispatcher worker is gone")]
    WorkerGone,
}

type Job<S> = Box<dyn FnOnce(Option<&mut S>) + Send>;

struct Task<S> {
    ordinal: u64,
    job: Job<S>,
}

struct Inlet<S> {
    sender: Option<Sender<Task<S>>>,
    next_ordinal: u64,
}

/// Runs submitted closures against owned state, strictly in order.
pub struct SequentialDispatcher<S> {
    inlet: Mutex<Inlet<S>>,
    rejecting: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: DispatcherConfig,
}

impl<S: Send + 'static> SequentialDispatcher<S> {
    /// Start the worker thread, moving `state` onto it.
    pub fn new(state: S, config: DispatcherConfig) -> Result<Self, DispatchError> {
        let (tx, rx) = crossbeam::channel::unbounded();
        let rejecting = Arc::new(AtomicBool::new(false));
        let worker_rejecting = Arc::clone(&rejecting);

        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_worker(state, rx, worker_rejecting))
            .map_err(|err| DispatchError::Spawn(err.to_string()))?;

        debug!(thread = %config.thread_name, policy = ?config.shutdown_policy, "dispatcher started");

        Ok(Self {
            inlet: Mutex::new(Inlet {
                sender: Some(tx),
                next_ordinal: 0,
            }),
            rejecting,
            worker: Mutex::new(Some(worker)),
            config,
        })
    }

    /// Queue `work` behind everything submitted so far.
    ///
    /// Returns immediately. Fails with [`DispatchError::Rejected`] once the
    /// dispatcher is closed.
    pub fn submit<T, E, F>(&self, work: F) -> Result<TaskHandle<T, E>, DispatchError>
    where
        F: FnOnce(&mut S) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (respond, outcome) = crossbeam::channel::bounded(1);
        let job: Job<S> = Box::new(move |state: Option<&mut S>| {
            let result = match state {
                None => Err(TaskError::Rejected),
                Some(state) => match catch_unwind(AssertUnwindSafe(|| work(state))) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(TaskError::Failed(err)),
                    Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
                },
            };
            let _ = respond.send(result);
        });

        // Ordinal allocation and enqueue happen under one lock, so queue
        // order and ordinal order agree.
        let mut inlet = self.inlet.lock().unwrap_or_else(PoisonError::into_inner);
        let ordinal = inlet.next_ordinal;
        let sender = inlet.sender.as_ref().ok_or(DispatchError::Rejected)?;
        sender
            .send(Task { ordinal, job })
            .map_err(|_| DispatchError::Rejected)?;
        inlet.next_ordinal += 1;

        Ok(TaskHandle { ordinal, outcome })
    }

    /// Stop accepting work. Queued tasks are drained or rejected per the
    /// configured [`ShutdownPolicy`]. Idempotent.
    pub fn close(&self) {
        let mut inlet = self.inlet.lock().unwrap_or_else(PoisonError::into_inner);
        if inlet.sender.is_none() {
            return;
        }
        if self.config.shutdown_policy == ShutdownPolicy::Reject {
            self.rejecting.store(true, Ordering::SeqCst);
        }
        inlet.sender = None;
        debug!(
            thread = %self.config.thread_name,
            submitted = inlet.next_ordinal,
            "dispatcher closed"
        );
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inlet
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sender
            .is_none()
    }

    /// Close and wait for the worker to finish its queue.
    ///
    /// A no-op when called from the worker thread itself.
    pub fn join(&self) {
        self.close();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(thread = %self.config.thread_name, "dispatcher worker panicked");
        }
    }

    /// Worker configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}

impl<S> fmt::Debug for SequentialDispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inlet = self.inlet.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SequentialDispatcher")
            .field("thread_name", &self.config.thread_name)
            .field("shutdown_policy", &self.config.shutdown_policy)
            .field("submitted", &inlet.next_ordinal)
            .field("closed", &inlet.sender.is_none())
            .finish()
    }
}

impl<S> Drop for SequentialDispatcher<S> {
    fn drop(&mut self) {
        let inlet = self.inlet.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inlet.sender.is_some() && self.config.shutdown_policy == ShutdownPolicy::Reject {
            self.rejecting.store(true, Ordering::SeqCst);
        }
        inlet.sender = None;

        let handle = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run_worker<S>(mut state: S, rx: Receiver<Task<S>>, rejecting: Arc<AtomicBool>) {
    let mut expected = 0u64;
    while let Ok(task) = rx.recv() {
        debug_assert_eq!(task.ordinal, expected, "dispatcher tasks out of order");
        expected = task.ordinal + 1;

        if rejecting.load(Ordering::SeqCst) {
            trace!(ordinal = task.ordinal, "rejecting queued task");
            (task.job)(None);
        } else {
            trace!(ordinal = task.ordinal, "running task");
            (task.job)(Some(&mut state));
        }
    }
    debug!(completed = expected, "dispatcher worker exiting");
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

/// Awaitable result of one submitted task.
pub struct TaskHandle<T, E> {
    ordinal: u64,
    outcome: Receiver<Result<T, TaskError<E>>>,
}

impl<T, E> TaskHandle<T, E> {
    /// Position of this task in submission order.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// Block until the task has run (or was rejected).
    pub fn wait(self) -> Result<T, TaskError<E>> {
        self.outcome.recv().unwrap_or(Err(TaskError::WorkerGone))
    }

    /// Block for at most `timeout`. `None` means the task has not finished.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, TaskError<E>>> {
        match self.outcome.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(TaskError::WorkerGone)),
        }
    }

    /// Non-blocking poll.
    pub fn try_wait(&self) -> Option<Result<T, TaskError<E>>> {
        match self.outcome.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TaskError::WorkerGone)),
        }
    }
}

impl<T, E> fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("ordinal", &self.ordinal)
            .finish()
    }
}
