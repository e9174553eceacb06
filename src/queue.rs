//! Serial execution queues
//!
//! Every context owns a serial queue: a named thread draining a job channel in order. The
//! stack's main queue plays the role of the UI thread. Jobs run under `catch_unwind` so a
//! panicking job never takes its queue down with it.
//!
//! A thread waiting in `perform_and_wait` is blocked until its job finishes, so the job may act
//! for the waiting queue: work sent back to any queue up the chain of waiters runs inline.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, sync_channel, Sender};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    /// Threads blocked waiting on the job this thread is running
    static WAITERS: RefCell<Vec<ThreadId>> = RefCell::new(Vec::new());
}

/// Installs a job's waiter chain on the running thread and restores the previous one on drop
struct WaiterScope {
    previous: Vec<ThreadId>,
}

impl WaiterScope {
    fn enter(chain: Vec<ThreadId>) -> Self {
        let previous = WAITERS.with(|waiters| std::mem::replace(&mut *waiters.borrow_mut(), chain));
        Self { previous }
    }
}

impl Drop for WaiterScope {
    fn drop(&mut self) {
        let previous = std::mem::take(&mut self.previous);
        WAITERS.with(|waiters| *waiters.borrow_mut() = previous);
    }
}

/// The calling thread's waiter chain extended with the calling thread itself
fn chain_for_callee() -> Vec<ThreadId> {
    let mut chain = WAITERS.with(|waiters| waiters.borrow().clone());
    chain.push(thread::current().id());
    chain
}

struct QueueInner {
    label: String,
    sender: Sender<Job>,
    thread_id: ThreadId,
    is_main: bool,
}

/// Handle to a serial queue; clones share the same thread
#[derive(Clone)]
pub struct SerialQueue {
    inner: Arc<QueueInner>,
}

impl SerialQueue {
    /// Spawn a background serial queue
    pub fn spawn(label: impl Into<String>) -> Self {
        Self::spawn_inner(label.into(), false)
    }

    fn spawn_inner(label: String, is_main: bool) -> Self {
        let (sender, receiver) = channel::<Job>();
        let handle = thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .unwrap_or_else(|e| panic!("failed to spawn queue thread '{label}': {e}"));
        let thread_id = handle.thread().id();
        debug!(queue = %label, main = is_main, "serial queue started");
        Self {
            inner: Arc::new(QueueInner {
                label,
                sender,
                thread_id,
                is_main,
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_main(&self) -> bool {
        self.inner.is_main
    }

    /// Whether the calling thread may act as this queue
    ///
    /// True on the queue's own thread, and inside a job this queue's thread is blocked waiting on.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
            || WAITERS.with(|waiters| waiters.borrow().contains(&self.inner.thread_id))
    }

    /// Enqueue `job` and return immediately
    pub fn perform<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let label = self.inner.label.clone();
        let wrapped: Job = Box::new(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                error!(queue = %label, panic = %panic_message(&payload), "queued job panicked");
            }
        });
        if self.inner.sender.send(wrapped).is_err() {
            error!(queue = %self.inner.label, "queue thread has stopped; job dropped");
        }
    }

    /// Run `job` on this queue and wait for its result
    ///
    /// Runs inline when the caller may already act as this queue. A panic inside `job` resumes on
    /// the caller.
    pub fn perform_and_wait<F, R>(&self, job: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return job();
        }

        let (result_tx, result_rx) = sync_channel::<thread::Result<R>>(1);
        let chain = chain_for_callee();
        let wrapped: Job = Box::new(move || {
            let scope = WaiterScope::enter(chain);
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            drop(scope);
            let _ = result_tx.send(outcome);
        });
        if self.inner.sender.send(wrapped).is_err() {
            panic!("queue '{}' has stopped", self.inner.label);
        }
        match result_rx.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => panic!("queue '{}' dropped a job without running it", self.inner.label),
        }
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.inner.label)
            .field("main", &self.inner.is_main)
            .finish()
    }
}

/// The queue treated as the UI thread
#[derive(Clone, Debug)]
pub struct MainQueue(SerialQueue);

impl MainQueue {
    pub fn spawn() -> Self {
        MainQueue(SerialQueue::spawn_inner("main".to_string(), true))
    }

    pub fn queue(&self) -> &SerialQueue {
        &self.0
    }

    pub fn is_current(&self) -> bool {
        self.0.is_current()
    }

    pub fn perform<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.perform(job)
    }

    pub fn perform_and_wait<F, R>(&self, job: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.0.perform_and_wait(job)
    }
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::spawn()
    }
}

/// Where asynchronous results are delivered
#[derive(Clone, Debug, Default)]
pub enum CallbackQueue {
    /// The background thread that finished the work
    #[default]
    Background,
    /// The stack's main queue
    Main,
    /// Any other serial queue
    Queue(SerialQueue),
}

impl CallbackQueue {
    pub(crate) fn deliver<F>(&self, main: &MainQueue, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            CallbackQueue::Background => callback(),
            CallbackQueue::Main => main.perform(callback),
            CallbackQueue::Queue(queue) => queue.perform(callback),
        }
    }
}

/// Run `work` on a fresh background thread
pub(crate) fn spawn_background<F>(name: &str, work: F)
where
    F: FnOnce() + Send + 'static,
{
    let spawned = thread::Builder::new().name(name.to_string()).spawn(work);
    if let Err(e) = spawned {
        error!(thread = %name, error = %e, "failed to spawn background worker");
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
