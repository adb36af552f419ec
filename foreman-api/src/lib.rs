//! # Foreman API
//!
//! Interface layer between the foreman worker-pool controller and the host
//! that embeds it. The controller itself never knows what a task payload
//! means; everything it needs from the outside world is expressed here as a
//! small set of traits.
//!
//! ## Core Components
//!
//! - **Execution contexts**: isolated environments in which one worker's task
//!   payload runs ([`ExecutionContext`])
//! - **Context providers**: the host capability that hands out one context per
//!   worker ([`ContextProvider`])
//! - **Bindings**: named handles installed into a context so task code can call
//!   back into its host ([`Binding`], [`Bindings`])
//! - **Task sources**: what a worker is asked to run ([`TaskSource`])
//! - **Path openers**: byte-stream access to task definitions ([`PathOpener`])
//!
//! ## Usage Example
//!
//! ```rust
//! use std::sync::Arc;
//! use foreman_api::{Binding, Bindings, ContextError, ContextProvider, ExecutionContext, TaskError, TaskSource};
//!
//! #[derive(Debug, Default)]
//! struct EchoContext {
//!     bindings: Bindings,
//! }
//!
//! impl ExecutionContext for EchoContext {
//!     fn run(&self, source: &TaskSource) -> Result<(), TaskError> {
//!         println!("running {}", source);
//!         Ok(())
//!     }
//!
//!     fn tear_down(&self) {}
//!
//!     fn bind(&self, name: &str, handle: Arc<dyn Binding>) {
//!         self.bindings.insert(name, handle);
//!     }
//!
//!     fn unbind(&self, name: &str) -> Option<Arc<dyn Binding>> {
//!         self.bindings.remove(name)
//!     }
//! }
//!
//! let provider = || -> Result<Arc<dyn ExecutionContext>, ContextError> {
//!     Ok(Arc::new(EchoContext::default()))
//! };
//! assert!(provider.acquire().is_ok());
//! ```
//!
//! ## Module Organization
//!
//! - [`context`]: execution contexts, providers and bindings
//! - [`source`]: task source descriptions and path openers
//! - [`errors`]: error types returned by collaborators

pub mod context;
pub mod errors;
pub mod source;

pub use context::{Binding, Bindings, ContextProvider, ExecutionContext};
pub use errors::{ContextError, TaskError};
pub use source::{PathOpener, TaskSource};
