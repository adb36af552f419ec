//! # Foreman
//!
//! A managed worker pool for long-running background tasks inside a host
//! process. The host configures how many workers to run and what they run;
//! foreman starts each worker on its own named, prioritized thread with its
//! own execution context, and stops them all within a bounded time when the
//! host goes away.
//!
//! ## Core Components
//!
//! - **Configuration** ([`config`]): layered key/value sources and a typed,
//!   memoizing resolver
//! - **Task sources** ([`source`]): built-in workers, inline scripts and
//!   scripts loaded from a path
//! - **Threads** ([`thread`]): the worker thread factory and thread handles
//! - **Workers** ([`worker`]): one payload bound to one execution context
//! - **Manager** ([`manager`]): the startup and shutdown protocols
//! - **Logging** ([`logging`]): tracing subscriber setup and log macros
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use foreman::{ConfigResolver, MapSource, WorkerManager};
//! use foreman::api::{ContextError, ExecutionContext};
//!
//! # fn acquire() -> Result<Arc<dyn ExecutionContext>, ContextError> {
//! #     Err(ContextError::not_ready("example"))
//! # }
//! foreman::logging::init_default();
//!
//! let config = ConfigResolver::new(
//!     MapSource::new()
//!         .with("worker", "resque")
//!         .with("worker.thread.count", "4")
//!         .with("worker.thread.priority", "MIN"),
//! );
//! let workers = WorkerManager::new(config, acquire).start_scoped();
//! // ... host runs ...
//! drop(workers); // shuts the pool down
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod source;
pub mod thread;
pub mod worker;

pub use foreman_api as api;

pub use config::{ConfigResolver, ConfigSource, EnvSource, LayeredSource, MapSource};
pub use error::{ConfigError, SourceError, ThreadError};
pub use manager::{
    ManagedWorkers, ManagerHandle, WorkerManager, WorkerManagerBuilder, WorkerThreadInfo, EXPORTED_NAME,
};
pub use source::{BuiltinCatalog, FsPathOpener};
pub use thread::{ThreadGroup, ThreadPriority, WorkerThread, WorkerThreadFactory};
pub use worker::{Worker, WorkerId, WorkerState};
