//! Dedicated render-thread scheduler.
//!
//! A [`RenderScheduler`] owns exactly one worker thread together with a piece
//! of thread-confined state `S` (for the renderer this is the GPU context and
//! everything allocated against it). The state is built *on* the worker by the
//! `init` closure passed to [`RenderScheduler::spawn`] and never leaves it;
//! other threads only ever hand the worker closures that receive `&mut S`.
//!
//! ```text
//!   producer threads ──run_async──┐
//!                                 ▼
//!   owner ──run_sync──▶ [ FIFO queue ] ──▶ worker thread (owns S)
//!     ▲                                         │
//!     └────────── completion signal ◀───────────┘
//! ```
//!
//! Tasks execute strictly in submission order. `run_sync` blocks on a one-slot
//! completion channel that the worker fills after the task returns.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("failed to spawn render thread '{name}': {reason}")]
    Spawn { name: String, reason: String },
    #[error("render thread '{0}' is shut down")]
    Closed(String),
    #[error("synchronous task submitted from render thread '{0}' would deadlock")]
    Reentrant(String),
    #[error("render thread '{name}' did not complete task within {timeout:?}")]
    Timeout { name: String, timeout: Duration },
    #[error("render thread '{0}' terminated abnormally")]
    WorkerLost(String),
}

type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

enum Message<S> {
    Run(Task<S>),
    Shutdown,
}

struct Shared {
    name: String,
    worker: ThreadId,
    closed: AtomicBool,
}

/// Cloneable submission handle for threads that do not own the scheduler.
///
/// Submitters observe shutdown: once [`RenderScheduler::shutdown`] has begun,
/// every submission fails with [`SchedulerError::Closed`].
pub struct TaskSubmitter<S> {
    sender: Sender<Message<S>>,
    shared: Arc<Shared>,
}

impl<S> Clone for TaskSubmitter<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> fmt::Debug for TaskSubmitter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSubmitter")
            .field("thread", &self.shared.name)
            .field("closed", &self.shared.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl<S: 'static> TaskSubmitter<S> {
    /// Queues `task` behind every previously submitted task and returns
    /// immediately.
    pub fn run_async<F>(&self, task: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.ensure_open()?;
        self.sender
            .send(Message::Run(Box::new(task)))
            .map_err(|_| SchedulerError::Closed(self.shared.name.clone()))
    }

    /// Queues `task` and blocks until the worker has run it to completion,
    /// returning the task's result.
    pub fn run_sync<F, R>(&self, task: F) -> Result<R, SchedulerError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let done = self.submit_with_signal(task)?;
        done.recv()
            .map_err(|_| self.lost_or_closed())
    }

    /// Same as [`run_sync`](Self::run_sync) but gives up waiting after
    /// `timeout`. The task stays queued and still runs in order.
    pub fn run_sync_timeout<F, R>(&self, task: F, timeout: Duration) -> Result<R, SchedulerError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let done = self.submit_with_signal(task)?;
        match done.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(SchedulerError::Timeout {
                name: self.shared.name.clone(),
                timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(self.lost_or_closed()),
        }
    }

    /// True when called from the worker thread.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.shared.worker
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of tasks waiting in the queue.
    pub fn pending(&self) -> usize {
        self.sender.len()
    }

    pub fn thread_name(&self) -> &str {
        &self.shared.name
    }

    fn submit_with_signal<F, R>(&self, task: F) -> Result<Receiver<R>, SchedulerError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_worker_thread() {
            return Err(SchedulerError::Reentrant(self.shared.name.clone()));
        }
        let (done_tx, done_rx) = bounded(1);
        self.run_async(move |state| {
            let value = task(state);
            // The waiter may have timed out and dropped its end.
            let _ = done_tx.send(value);
        })?;
        Ok(done_rx)
    }

    fn ensure_open(&self) -> Result<(), SchedulerError> {
        if self.is_closed() {
            Err(SchedulerError::Closed(self.shared.name.clone()))
        } else {
            Ok(())
        }
    }

    fn lost_or_closed(&self) -> SchedulerError {
        if self.is_closed() {
            SchedulerError::Closed(self.shared.name.clone())
        } else {
            SchedulerError::WorkerLost(self.shared.name.clone())
        }
    }
}

/// Owner of the render thread.
///
/// Dropping the scheduler performs the same shutdown as
/// [`shutdown`](Self::shutdown) but discards the outcome.
pub struct RenderScheduler<S: 'static> {
    submitter: TaskSubmitter<S>,
    join_handle: Option<JoinHandle<()>>,
}

impl<S: 'static> RenderScheduler<S> {
    /// Spawns the worker thread and builds its state with `init` on that
    /// thread. Returns once the state exists.
    pub fn spawn<F>(name: impl Into<String>, init: F) -> Result<Self, SchedulerError>
    where
        F: FnOnce() -> S + Send + 'static,
    {
        let name = name.into();
        let (task_tx, task_rx) = unbounded::<Message<S>>();
        let (ready_tx, ready_rx) = bounded::<()>(1);

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut state = init();
                let _ = ready_tx.send(());
                run_worker(&thread_name, &mut state, task_rx);
            })
            .map_err(|err| SchedulerError::Spawn {
                name: name.clone(),
                reason: err.to_string(),
            })?;

        ready_rx
            .recv()
            .map_err(|_| SchedulerError::WorkerLost(name.clone()))?;

        let shared = Arc::new(Shared {
            name: name.clone(),
            worker: handle.thread().id(),
            closed: AtomicBool::new(false),
        });
        debug!(thread = %name, "render thread started");

        Ok(Self {
            submitter: TaskSubmitter {
                sender: task_tx,
                shared,
            },
            join_handle: Some(handle),
        })
    }

    pub fn submitter(&self) -> TaskSubmitter<S> {
        self.submitter.clone()
    }

    pub fn run_async<F>(&self, task: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.submitter.run_async(task)
    }

    pub fn run_sync<F, R>(&self, task: F) -> Result<R, SchedulerError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submitter.run_sync(task)
    }

    pub fn run_sync_timeout<F, R>(&self, task: F, timeout: Duration) -> Result<R, SchedulerError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submitter.run_sync_timeout(task, timeout)
    }

    pub fn is_worker_thread(&self) -> bool {
        self.submitter.is_worker_thread()
    }

    pub fn is_running(&self) -> bool {
        self.join_handle.is_some()
    }

    pub fn thread_name(&self) -> &str {
        self.submitter.thread_name()
    }

    /// Stops accepting tasks, lets the worker drain everything queued before
    /// this call, then joins it. Idempotent.
    pub fn shutdown(&mut self) -> Result<(), SchedulerError> {
        let Some(handle) = self.join_handle.take() else {
            return Ok(());
        };
        if self.submitter.is_worker_thread() {
            // Joining ourselves would deadlock; leave the thread detached.
            self.submitter.shared.closed.store(true, Ordering::Release);
            let _ = self.submitter.sender.send(Message::Shutdown);
            warn!(thread = %self.thread_name(), "render thread shut down from itself; not joined");
            return Ok(());
        }

        self.submitter.shared.closed.store(true, Ordering::Release);
        let _ = self.submitter.sender.send(Message::Shutdown);
        let name = self.thread_name().to_string();
        handle
            .join()
            .map_err(|_| SchedulerError::WorkerLost(name.clone()))?;
        debug!(thread = %name, "render thread stopped");
        Ok(())
    }
}

impl<S: 'static> fmt::Debug for RenderScheduler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderScheduler")
            .field("thread", &self.thread_name())
            .field("running", &self.is_running())
            .finish()
    }
}

impl<S: 'static> Drop for RenderScheduler<S> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn run_worker<S>(name: &str, state: &mut S, tasks: Receiver<Message<S>>) {
    let mut executed: u64 = 0;
    for message in tasks.iter() {
        match message {
            Message::Run(task) => {
                task(state);
                executed += 1;
                trace!(thread = %name, executed, "render task complete");
            }
            Message::Shutdown => break,
        }
    }
    // Tasks queued behind the shutdown marker are dropped here, which
    // disconnects any sync waiter still holding a completion receiver.
    let dropped = tasks.try_iter().count();
    if dropped > 0 {
        warn!(thread = %name, dropped, "discarded render tasks submitted during shutdown");
    }
    debug!(thread = %name, executed, "render worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn tasks_run_in_submission_order() {
        let scheduler = RenderScheduler::spawn("order-test", Vec::<u32>::new).unwrap();
        for value in 0..50 {
            scheduler.run_async(move |log| log.push(value)).unwrap();
        }
        let log = scheduler.run_sync(|log| log.clone()).unwrap();
        assert_eq!(log, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn run_sync_returns_task_result_after_completion() {
        let scheduler = RenderScheduler::spawn("sync-test", || 40u32).unwrap();
        let value = scheduler
            .run_sync(|state| {
                *state += 2;
                *state
            })
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn state_lives_on_worker_thread() {
        let scheduler = RenderScheduler::spawn("affinity-test", || thread::current().id()).unwrap();
        let (init_id, task_id) = scheduler
            .run_sync(|init_id| (*init_id, thread::current().id()))
            .unwrap();
        assert_eq!(init_id, task_id);
        assert_ne!(task_id, thread::current().id());
    }

    #[test]
    fn submissions_after_shutdown_are_rejected() {
        let mut scheduler = RenderScheduler::spawn("closed-test", || ()).unwrap();
        let submitter = scheduler.submitter();
        scheduler.shutdown().unwrap();
        assert!(matches!(
            submitter.run_async(|_| {}),
            Err(SchedulerError::Closed(_))
        ));
        assert!(matches!(
            scheduler.run_sync(|_| ()),
            Err(SchedulerError::Closed(_))
        ));
        // second shutdown is a no-op
        scheduler.shutdown().unwrap();
    }

    #[test]
    fn shutdown_drains_tasks_queued_before_it() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = RenderScheduler::spawn("drain-test", || ()).unwrap();
        for value in 0..10 {
            let seen = Arc::clone(&seen);
            scheduler
                .run_async(move |_| seen.lock().unwrap().push(value))
                .unwrap();
        }
        scheduler.shutdown().unwrap();
        assert_eq!(seen.lock().unwrap().len(), 10);
    }

    #[test]
    fn reentrant_sync_submission_is_refused() {
        let scheduler = RenderScheduler::spawn("reentrant-test", || ()).unwrap();
        let submitter = scheduler.submitter();
        let nested = scheduler
            .run_sync(move |_| submitter.run_sync(|_| ()))
            .unwrap();
        assert!(matches!(nested, Err(SchedulerError::Reentrant(_))));
    }

    #[test]
    fn sync_timeout_reports_and_task_still_runs() {
        let scheduler = RenderScheduler::spawn("timeout-test", || 0u32).unwrap();
        scheduler
            .run_async(|_| thread::sleep(Duration::from_millis(200)))
            .unwrap();
        let err = scheduler
            .run_sync_timeout(|count| *count += 1, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Timeout { .. }));
        let count = scheduler.run_sync(|count| *count).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn panicking_task_reports_worker_lost() {
        let mut scheduler = RenderScheduler::spawn("panic-test", || ()).unwrap();
        let err = scheduler
            .run_sync(|_| -> () { panic!("task failure") })
            .unwrap_err();
        assert!(matches!(err, SchedulerError::WorkerLost(_)));
        assert!(matches!(
            scheduler.shutdown(),
            Err(SchedulerError::WorkerLost(_))
        ));
    }
}
