//! # Execution Contexts
//!
//! An execution context is the isolated environment one worker's payload runs
//! in (think of one interpreter or VM instance). The worker manager asks a
//! [`ContextProvider`] for one context per worker and never shares a context
//! between two workers.
//!
//! ## Key Concepts
//! - Exclusive ownership: a context belongs to exactly one worker for that
//!   worker's lifetime
//! - Cooperative stop: [`ExecutionContext::tear_down`] invalidates the context
//!   so an in-flight `run` returns as soon as the implementation notices
//! - Named bindings: handles installed with [`ExecutionContext::bind`] are
//!   visible to task code by name and removed again with
//!   [`ExecutionContext::unbind`]

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use downcast_rs::{impl_downcast, DowncastSync};

use crate::errors::{ContextError, TaskError};
use crate::source::TaskSource;

/// A named handle that can be installed into an execution context.
///
/// Task code that finds a binding by name recovers its concrete type with
/// `downcast_arc` / `downcast_ref`.
pub trait Binding: DowncastSync + fmt::Debug {}
impl_downcast!(sync Binding);

/// An isolated environment running one task payload.
pub trait ExecutionContext: Send + Sync + fmt::Debug {
    /// Runs the payload to completion, or until the context is torn down.
    fn run(&self, source: &TaskSource) -> Result<(), TaskError>;

    /// Invalidates the context. Must be safe to call from another thread
    /// while `run` is in progress, and more than once.
    fn tear_down(&self);

    /// Installs a named handle, replacing any previous one with the same name.
    fn bind(&self, name: &str, handle: Arc<dyn Binding>);

    /// Removes a named handle, returning it if it was present.
    fn unbind(&self, name: &str) -> Option<Arc<dyn Binding>>;
}

/// Host capability handing out one execution context per request.
pub trait ContextProvider: Send + Sync {
    /// Acquires a fresh context for a new worker.
    fn acquire(&self) -> Result<Arc<dyn ExecutionContext>, ContextError>;
}

impl<F> ContextProvider for F
where
    F: Fn() -> Result<Arc<dyn ExecutionContext>, ContextError> + Send + Sync,
{
    fn acquire(&self) -> Result<Arc<dyn ExecutionContext>, ContextError> {
        self()
    }
}

/// Thread-safe name → binding table for context implementations to embed.
#[derive(Default)]
pub struct Bindings {
    entries: Mutex<HashMap<String, Arc<dyn Binding>>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, handle: Arc<dyn Binding>) {
        self.lock().insert(name.to_string(), handle);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn Binding>> {
        self.lock().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Binding>> {
        self.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn Binding>>> {
        // A poisoned table is still a valid table.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.lock();
        let mut names: Vec<&String> = entries.keys().collect();
        names.sort();
        f.debug_struct("Bindings").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Marker(u32);

    impl Binding for Marker {}

    #[test]
    fn test_bindings_insert_replace_remove() {
        let bindings = Bindings::new();
        bindings.insert("marker", Arc::new(Marker(1)));
        bindings.insert("marker", Arc::new(Marker(2)));
        assert_eq!(bindings.len(), 1);

        let handle = bindings.get("marker").unwrap();
        assert_eq!(handle.downcast_ref::<Marker>().unwrap().0, 2);

        assert!(bindings.remove("marker").is_some());
        assert!(bindings.remove("marker").is_none());
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_binding_downcast_arc() {
        let handle: Arc<dyn Binding> = Arc::new(Marker(7));
        let marker = handle.downcast_arc::<Marker>().unwrap();
        assert_eq!(marker.0, 7);
    }

    #[test]
    fn test_closure_provider() {
        let provider = || -> Result<Arc<dyn ExecutionContext>, ContextError> {
            Err(ContextError::not_ready("booting"))
        };
        let err = provider.acquire().unwrap_err();
        assert!(err.is_not_ready());
        assert!(err.to_string().contains("booting"));
    }
}
