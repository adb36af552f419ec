//! # Worker Thread Provisioning
//!
//! This module creates the OS threads that worker payloads run on. Each
//! worker gets exactly one dedicated thread for its whole lifetime.
//!
//! ## Key Concepts
//! - Unique names: a process-wide sequence produces `<prefix>-worker#<n>`
//! - Priorities: one fixed level, or round-robin over a list for
//!   heterogeneous pools
//! - Daemon threads: dropping the handle of a daemon thread detaches it, so
//!   an un-joined worker never holds up the host
//! - Deferred start: the factory never starts a thread; the caller registers
//!   the handle first and then calls [`WorkerThread::start`]
//! - Interruption: best-effort, observed through [`interrupted`] and parking

mod group;
mod priority;
mod worker_thread;

use std::any::Any;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub use group::ThreadGroup;
pub use priority::ThreadPriority;
pub use worker_thread::WorkerThread;

/// Process-wide thread sequence shared by every factory.
static THREAD_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Per-thread state installed into threads started from a [`WorkerThread`].
pub(crate) struct LocalState {
    pub(crate) interrupt: Arc<AtomicBool>,
    pub(crate) group: Arc<ThreadGroup>,
}

thread_local! {
    static LOCAL: RefCell<Option<LocalState>> = const { RefCell::new(None) };
}

pub(crate) fn install_local_state(state: LocalState) {
    LOCAL.with(|local| *local.borrow_mut() = Some(state));
}

/// Whether the current thread has been interrupted.
///
/// Always false on threads that were not started by a [`WorkerThread`].
pub fn interrupted() -> bool {
    LOCAL.with(|local| {
        local
            .borrow()
            .as_ref()
            .map(|state| state.interrupt.load(Ordering::SeqCst))
            .unwrap_or(false)
    })
}

/// The thread group of the current thread.
pub fn current_group() -> Arc<ThreadGroup> {
    LOCAL
        .with(|local| local.borrow().as_ref().map(|state| Arc::clone(&state.group)))
        .unwrap_or_else(ThreadGroup::main)
}

/// Sleeps for `duration` unless the current thread is interrupted first.
///
/// Returns true if the sleep ended because of an interrupt.
pub fn sleep_interruptibly(duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if interrupted() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        thread::park_timeout(remaining);
    }
}

/// Text of a panic payload, for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}

/// How the factory assigns priorities to the threads it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrioritySchedule {
    Fixed(ThreadPriority),
    RoundRobin(Vec<ThreadPriority>),
}

/// Creates named, prioritized, daemon worker threads.
#[derive(Debug)]
pub struct WorkerThreadFactory {
    prefix: String,
    schedule: PrioritySchedule,
    next_priority: AtomicUsize,
    daemonize_threads: bool,
    group: Arc<ThreadGroup>,
}

impl WorkerThreadFactory {
    /// Marker contained in every worker thread name.
    pub const NAME_ID: &'static str = "worker#";

    /// A factory assigning one fixed priority.
    pub fn new(prefix: Option<&str>, priority: ThreadPriority) -> Self {
        Self::with_schedule(prefix, PrioritySchedule::Fixed(priority))
    }

    /// A factory cycling through `priorities`; an empty list means `NORM`.
    pub fn with_priorities(prefix: Option<&str>, priorities: Vec<ThreadPriority>) -> Self {
        let schedule = if priorities.is_empty() {
            PrioritySchedule::Fixed(ThreadPriority::NORM)
        } else {
            PrioritySchedule::RoundRobin(priorities)
        };
        Self::with_schedule(prefix, schedule)
    }

    fn with_schedule(prefix: Option<&str>, schedule: PrioritySchedule) -> Self {
        let prefix = match prefix {
            Some(p) if !p.is_empty() => format!("{}-", p),
            _ => String::new(),
        };
        Self {
            prefix,
            schedule,
            next_priority: AtomicUsize::new(0),
            daemonize_threads: true,
            group: current_group(),
        }
    }

    /// Places new threads into `group` instead of the creating thread's group.
    pub fn with_group(mut self, group: Arc<ThreadGroup>) -> Self {
        self.group = group;
        self
    }

    pub fn is_daemonize_threads(&self) -> bool {
        self.daemonize_threads
    }

    pub fn set_daemonize_threads(&mut self, daemonize: bool) {
        self.daemonize_threads = daemonize;
    }

    pub fn group(&self) -> &Arc<ThreadGroup> {
        &self.group
    }

    pub fn schedule(&self) -> &PrioritySchedule {
        &self.schedule
    }

    /// Provisions a thread for `task`. The thread is not started.
    pub fn new_thread<F>(&self, task: F) -> WorkerThread
    where
        F: FnOnce() + Send + 'static,
    {
        let seq = THREAD_SEQUENCE.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}{}{}", self.prefix, Self::NAME_ID, seq);
        WorkerThread::new(
            name,
            self.next_thread_priority(),
            self.daemonize_threads,
            Arc::clone(&self.group),
            Box::new(task),
        )
    }

    fn next_thread_priority(&self) -> ThreadPriority {
        match &self.schedule {
            PrioritySchedule::Fixed(priority) => *priority,
            PrioritySchedule::RoundRobin(priorities) => {
                let index = self.next_priority.fetch_add(1, Ordering::SeqCst);
                priorities[index % priorities.len()]
            }
        }
    }
}
