//! # Worker
//!
//! A worker couples one task source with the execution context it runs in.
//! It is created by the manager during startup, runs once on its dedicated
//! thread, and is never restarted.
//!
//! ## Lifecycle
//! ```text
//! Idle ──run()──► Running ──stop()──► Stopped ──(thread exits)──► Terminated
//!   │                │                                               ▲
//!   │                └──────────────(payload returns)────────────────┤
//!   └──stop()──► Stopped ─────────────(run() refused)────────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info};
use uuid::Uuid;

use foreman_api::{ExecutionContext, TaskError, TaskSource};

/// Unique identity of a worker within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn new() -> Self {
        WorkerId(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// States a worker can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, its thread has not picked it up yet
    Idle,
    /// Payload is running
    Running,
    /// Cooperative stop delivered; the payload may still be unwinding
    Stopped,
    /// The run on the worker thread has returned
    Terminated,
}

/// One task payload bound to its own execution context.
pub struct Worker {
    id: WorkerId,
    context: Arc<dyn ExecutionContext>,
    source: Arc<TaskSource>,
    state: Mutex<WorkerState>,
    torn_down: AtomicBool,
}

impl Worker {
    pub fn new(context: Arc<dyn ExecutionContext>, source: Arc<TaskSource>) -> Self {
        Self {
            id: WorkerId::new(),
            context,
            source,
            state: Mutex::new(WorkerState::Idle),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.lock_state()
    }

    pub fn source(&self) -> &TaskSource {
        &self.source
    }

    pub fn context(&self) -> &Arc<dyn ExecutionContext> {
        &self.context
    }

    /// Runs the payload to completion on the calling thread.
    ///
    /// Only an idle worker runs; any other state returns immediately.
    pub fn run(&self) {
        {
            let mut state = self.lock_state();
            if *state != WorkerState::Idle {
                debug!(worker = %self.id, state = ?*state, "worker not idle, not running");
                *state = WorkerState::Terminated;
                return;
            }
            *state = WorkerState::Running;
        }
        let _terminate = TerminateOnExit(self);

        crate::log_lifecycle!("worker", self.id, "running", source = %self.source);
        match self.context.run(&self.source) {
            Ok(()) => info!(worker = %self.id, "worker finished"),
            Err(TaskError::TornDown) => info!(worker = %self.id, "worker stopped with its context"),
            Err(e) => error!(worker = %self.id, error = %e, "worker failed"),
        }
    }

    /// Cooperative stop: tears down the execution context.
    ///
    /// Safe to call from any thread and more than once; the context is torn
    /// down only on the first call.
    pub fn stop(&self) {
        {
            let mut state = self.lock_state();
            if matches!(*state, WorkerState::Idle | WorkerState::Running) {
                *state = WorkerState::Stopped;
            }
        }
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(worker = %self.id, "tearing down execution context");
        self.context.tear_down();
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Marks the worker terminated when the run ends, including by unwinding.
struct TerminateOnExit<'a>(&'a Worker);

impl Drop for TerminateOnExit<'_> {
    fn drop(&mut self) {
        *self.0.lock_state() = WorkerState::Terminated;
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("source", &self.source.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::AtomicUsize;

    use foreman_api::{Binding, Bindings};

    use super::*;

    #[derive(Debug, Default)]
    struct CountingContext {
        runs: AtomicUsize,
        panics: bool,
        tear_downs: AtomicUsize,
        bindings: Bindings,
    }

    impl ExecutionContext for CountingContext {
        fn run(&self, _source: &TaskSource) -> Result<(), TaskError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("payload blew up");
            }
            Ok(())
        }

        fn tear_down(&self) {
            self.tear_downs.fetch_add(1, Ordering::SeqCst);
        }

        fn bind(&self, name: &str, handle: Arc<dyn Binding>) {
            self.bindings.insert(name, handle);
        }

        fn unbind(&self, name: &str) -> Option<Arc<dyn Binding>> {
            self.bindings.remove(name)
        }
    }

    fn worker() -> (Worker, Arc<CountingContext>) {
        let context = Arc::new(CountingContext::default());
        let worker = Worker::new(context.clone(), Arc::new(TaskSource::inline("nil")));
        (worker, context)
    }

    #[test]
    fn test_run_transitions_to_terminated() {
        let (worker, context) = worker();
        assert_eq!(worker.state(), WorkerState::Idle);
        worker.run();
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert_eq!(context.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_never_runs_twice() {
        let (worker, context) = worker();
        worker.run();
        worker.run();
        assert_eq!(context.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_before_run_prevents_run() {
        let (worker, context) = worker();
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);
        worker.run();
        assert_eq!(context.runs.load(Ordering::SeqCst), 0);
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (worker, context) = worker();
        worker.stop();
        worker.stop();
        assert_eq!(context.tear_downs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_after_run_tears_down_once() {
        let (worker, context) = worker();
        worker.run();
        worker.stop();
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert_eq!(context.tear_downs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_workers_have_distinct_ids() {
        let (a, _) = worker();
        let (b, _) = worker();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_panicking_payload_still_terminates() {
        let context = Arc::new(CountingContext {
            panics: true,
            ..Default::default()
        });
        let worker = Worker::new(context.clone(), Arc::new(TaskSource::inline("raise")));

        let result = panic::catch_unwind(AssertUnwindSafe(|| worker.run()));
        assert!(result.is_err());
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert_eq!(context.runs.load(Ordering::SeqCst), 1);

        worker.stop();
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert_eq!(context.tear_downs.load(Ordering::SeqCst), 1);
    }
}
