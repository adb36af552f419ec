use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

static MAIN_GROUP: OnceLock<Arc<ThreadGroup>> = OnceLock::new();

/// A named set of threads that counts how many of its members are alive.
#[derive(Debug)]
pub struct ThreadGroup {
    name: String,
    active: AtomicUsize,
}

impl ThreadGroup {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            active: AtomicUsize::new(0),
        })
    }

    /// The group of threads not created by a [`WorkerThreadFactory`](super::WorkerThreadFactory).
    pub fn main() -> Arc<Self> {
        Arc::clone(MAIN_GROUP.get_or_init(|| ThreadGroup::new("main")))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of member threads currently running.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn enter(self: &Arc<Self>) -> GroupMembership {
        self.active.fetch_add(1, Ordering::SeqCst);
        GroupMembership {
            group: Arc::clone(self),
        }
    }
}

/// Counts one live member until dropped.
#[derive(Debug)]
pub(crate) struct GroupMembership {
    group: Arc<ThreadGroup>,
}

impl Drop for GroupMembership {
    fn drop(&mut self) {
        self.group.active.fetch_sub(1, Ordering::SeqCst);
    }
}
