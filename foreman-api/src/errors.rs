//! # Collaborator Error Types
//!
//! Errors surfaced by the host-side collaborators of the worker manager.
//!
//! ## Core Components
//!
//! - `ContextError`: failure to hand out an execution context. The manager
//!   distinguishes a *not ready* condition (the host is still initialising and
//!   a later attempt may succeed) from a hard failure.
//! - `TaskError`: failure while a worker runs its payload.
//!
//! Neither error ever escapes the manager's `startup()` / `shutdown()`; both
//! are only logged.

use thiserror::Error;

/// Error returned by [`ContextProvider::acquire`](crate::ContextProvider::acquire).
#[derive(Error, Debug)]
pub enum ContextError {
    /// The provider exists but cannot serve contexts yet.
    ///
    /// Typically raised while the host is still booting its own runtime.
    /// Recoverable in principle; the manager does not retry.
    #[error("Execution context not ready: {0}")]
    NotReady(String),

    /// The provider failed and will not recover.
    #[error("Execution context unavailable: {0}")]
    Failed(#[from] anyhow::Error),
}

impl ContextError {
    /// Shorthand for a [`ContextError::NotReady`] with the given reason.
    pub fn not_ready(reason: impl Into<String>) -> Self {
        ContextError::NotReady(reason.into())
    }

    /// Returns true for the recoverable variant.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ContextError::NotReady(_))
    }
}

/// Error returned by [`ExecutionContext::run`](crate::ExecutionContext::run).
#[derive(Error, Debug)]
pub enum TaskError {
    /// The payload ran and reported a failure.
    #[error("Task failed: {0}")]
    Failed(String),

    /// The payload could not be located or loaded by the context.
    #[error("Task could not be loaded: {0}")]
    Load(String),

    /// The context was torn down while the payload was running.
    #[error("Execution context was torn down")]
    TornDown,

    /// Any other failure raised by the context implementation.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
