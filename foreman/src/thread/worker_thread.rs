//! # Worker Thread Handle
//!
//! A provisioned-but-not-yet-started OS thread. The manager registers the
//! handle before calling [`WorkerThread::start`], so a thread can never finish
//! before it is tracked.
//!
//! ## Key Concepts
//! - Liveness: an exit guard inside the thread clears the alive flag and
//!   closes the completion channel, also when the task panics
//! - Timed join: waits on the completion channel, then reaps the `JoinHandle`
//! - Interruption: a flag plus `unpark`; task code opts in by polling
//!   [`interrupted`](super::interrupted) or by parking
//! - The spawning thread's tracing dispatcher is carried into the new thread

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::RecvTimeoutError;
use tracing::{debug, trace};

use crate::error::ThreadError;

use super::group::{GroupMembership, ThreadGroup};
use super::priority::ThreadPriority;
use super::{install_local_state, interrupted, panic_message, LocalState};

/// How often a join re-checks whether the joining thread was interrupted.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Clears liveness when the worker thread exits, normally or by unwinding.
struct ExitGuard {
    alive: Arc<AtomicBool>,
    _membership: GroupMembership,
    _done: flume::Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Handle to one worker OS thread.
pub struct WorkerThread {
    name: String,
    priority: ThreadPriority,
    daemon: bool,
    group: Arc<ThreadGroup>,
    task: Option<Task>,
    handle: Option<JoinHandle<()>>,
    done: Option<flume::Receiver<()>>,
    interrupt: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

impl WorkerThread {
    pub(crate) fn new(
        name: String,
        priority: ThreadPriority,
        daemon: bool,
        group: Arc<ThreadGroup>,
        task: Task,
    ) -> Self {
        Self {
            name,
            priority,
            daemon,
            group,
            task: Some(task),
            handle: None,
            done: None,
            interrupt: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> ThreadPriority {
        self.priority
    }

    /// Daemon threads are detached when their handle is dropped; others are joined.
    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    pub fn group(&self) -> &Arc<ThreadGroup> {
        &self.group
    }

    pub fn is_started(&self) -> bool {
        self.task.is_none()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Spawns the OS thread. A handle can be started once.
    pub fn start(&mut self) -> Result<(), ThreadError> {
        let task = self
            .task
            .take()
            .ok_or_else(|| ThreadError::AlreadyStarted(self.name.clone()))?;

        let (done_tx, done_rx) = flume::bounded::<()>(1);
        let local = LocalState {
            interrupt: Arc::clone(&self.interrupt),
            group: Arc::clone(&self.group),
        };
        let membership = self.group.enter();
        let alive = Arc::clone(&self.alive);
        let priority = self.priority;
        let dispatch = crate::logging::current_subscriber();

        self.alive.store(true, Ordering::SeqCst);
        let body = move || {
            let _exit = ExitGuard {
                alive,
                _membership: membership,
                _done: done_tx,
            };
            let _log = tracing::dispatcher::set_default(&dispatch);
            install_local_state(local);
            if let Err(e) = priority.apply_to_current_thread() {
                debug!(priority = %priority, error = %e, "could not apply thread priority");
            }
            task();
        };

        // std panics on names it cannot hand to the OS, such as ones with NUL bytes
        let builder = thread::Builder::new().name(self.name.clone());
        let spawned = panic::catch_unwind(AssertUnwindSafe(move || builder.spawn(body))).unwrap_or_else(|payload| {
            Err(io::Error::new(io::ErrorKind::InvalidInput, panic_message(payload.as_ref())))
        });

        match spawned {
            Ok(handle) => {
                trace!(thread = %self.name, "thread started");
                self.handle = Some(handle);
                self.done = Some(done_rx);
                Ok(())
            }
            Err(source) => {
                self.alive.store(false, Ordering::SeqCst);
                Err(ThreadError::Spawn {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Requests interruption: sets the flag and unparks the thread.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }

    /// Waits up to `timeout` for the thread to exit.
    ///
    /// Returns `Ok(true)` once no OS thread is running behind this handle
    /// (including a handle that was never started) and `Ok(false)` when the
    /// timeout elapsed first. If the calling thread is itself a worker and
    /// gets interrupted while waiting, returns [`ThreadError::Interrupted`]
    /// and leaves its interrupt flag set.
    pub fn join_timeout(&mut self, timeout: Duration) -> Result<bool, ThreadError> {
        let Some(done) = self.done.as_ref() else {
            return Ok(true);
        };

        let deadline = Instant::now() + timeout;
        loop {
            if interrupted() {
                return Err(ThreadError::Interrupted {
                    name: self.name.clone(),
                    timeout,
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            match done.recv_timeout(remaining.min(JOIN_POLL_INTERVAL)) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return self.reap(),
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
    }

    fn reap(&mut self) -> Result<bool, ThreadError> {
        self.done = None;
        match self.handle.take() {
            Some(handle) => handle.join().map(|_| true).map_err(|payload| ThreadError::Panicked {
                name: self.name.clone(),
                message: panic_message(payload.as_ref()),
            }),
            None => Ok(true),
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        if self.daemon {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("daemon", &self.daemon)
            .field("group", &self.group.name())
            .field("started", &self.is_started())
            .field("alive", &self.is_alive())
            .finish()
    }
}
