//! # Worker Manager
//!
//! Starts a configured number of workers, each on its own thread with its
//! own execution context, and stops them all again within a bounded time.
//!
//! ## Startup
//! For each of the `worker.thread.count` workers the manager acquires a
//! context, optionally installs a [`ManagerHandle`] into it under
//! [`EXPORTED_NAME`], provisions a thread, registers the pair and only then
//! starts the thread. The first failure ends the loop; workers that already
//! started keep running.
//!
//! ## Shutdown
//! The registry is swapped out in one step, so a second `shutdown` finds
//! nothing to do. Every worker is stopped and its thread interrupted, then
//! joined for at most the join timeout. Threads that do not finish in time
//! are left behind as detached daemons. A context that panics while being
//! torn down is logged and skipped; the other workers are still stopped.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use foreman_api::{Binding, ContextProvider, PathOpener};

use crate::config::{keys, ConfigResolver};
use crate::error::ThreadError;
use crate::source::{resolve_task_source, BuiltinCatalog, FsPathOpener};
use crate::thread::{panic_message, ThreadGroup, ThreadPriority, WorkerThread, WorkerThreadFactory};
use crate::worker::{Worker, WorkerId};

/// Name under which the manager handle is bound into each execution context.
pub const EXPORTED_NAME: &str = "worker_manager";

/// How long shutdown waits for each worker thread.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(1000);

struct WorkerEntry {
    worker: Arc<Worker>,
    thread: WorkerThread,
    exported: bool,
}

type Registry = Mutex<HashMap<WorkerId, WorkerEntry>>;

/// Point-in-time view of one registered worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerThreadInfo {
    pub worker: WorkerId,
    pub name: String,
    pub priority: ThreadPriority,
    pub daemon: bool,
    pub alive: bool,
}

/// Owns the worker registry and runs the startup and shutdown protocols.
pub struct WorkerManager {
    config: Arc<ConfigResolver>,
    provider: Arc<dyn ContextProvider>,
    catalog: BuiltinCatalog,
    opener: Arc<dyn PathOpener>,
    group: Option<Arc<ThreadGroup>>,
    join_timeout: Duration,
    registry: Arc<Registry>,
}

impl WorkerManager {
    /// A manager with the default catalog, filesystem opener and join timeout.
    pub fn new(config: ConfigResolver, provider: impl ContextProvider + 'static) -> Self {
        Self::builder(config, provider).build()
    }

    pub fn builder(config: ConfigResolver, provider: impl ContextProvider + 'static) -> WorkerManagerBuilder {
        WorkerManagerBuilder {
            config,
            provider: Arc::new(provider),
            catalog: BuiltinCatalog::default(),
            opener: Arc::new(FsPathOpener::new()),
            group: None,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    pub fn config(&self) -> &ConfigResolver {
        &self.config
    }

    pub fn catalog(&self) -> &BuiltinCatalog {
        &self.catalog
    }

    pub fn join_timeout(&self) -> Duration {
        self.join_timeout
    }

    /// Number of registered workers.
    pub fn registry_len(&self) -> usize {
        self.lock_registry().len()
    }

    /// Names of the registered worker threads, sorted.
    pub fn worker_threads(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock_registry()
            .values()
            .map(|entry| entry.thread.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Snapshot of the registered worker threads, sorted by name.
    pub fn thread_info(&self) -> Vec<WorkerThreadInfo> {
        let mut info: Vec<WorkerThreadInfo> = self
            .lock_registry()
            .iter()
            .map(|(id, entry)| WorkerThreadInfo {
                worker: *id,
                name: entry.thread.name().to_string(),
                priority: entry.thread.priority(),
                daemon: entry.thread.is_daemon(),
                alive: entry.thread.is_alive(),
            })
            .collect();
        info.sort_by(|a, b| a.name.cmp(&b.name));
        info
    }

    /// A handle onto this manager, as bound into exported contexts.
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            config: Arc::clone(&self.config),
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Starts the configured workers. Failures are logged, never returned.
    pub fn startup(&self) {
        if self.config.is_skip_startup() {
            info!(key = keys::SKIP, "worker startup skipped");
            return;
        }

        let Some(source) = resolve_task_source(&self.config, &self.catalog, self.opener.as_ref()) else {
            warn!(
                "no worker script to execute - configure '{}' or '{}'",
                keys::SCRIPT,
                keys::SCRIPT_PATH
            );
            return;
        };
        let source = Arc::new(source);

        let count = self.config.thread_count();
        let priority = self.config.thread_priority();
        let prefix = self.config.thread_prefix();
        let exported = self.config.is_exported();

        let mut factory = WorkerThreadFactory::new(prefix.as_deref(), priority);
        if let Some(group) = &self.group {
            factory = factory.with_group(Arc::clone(group));
        }

        crate::log_lifecycle!("manager", "pool", "starting", count, priority = %priority, source = %source);

        let mut started = 0;
        for attempt in 1..=count {
            let context = match panic::catch_unwind(AssertUnwindSafe(|| self.provider.acquire())) {
                Ok(Ok(context)) => context,
                Ok(Err(e)) if e.is_not_ready() => {
                    warn!(attempt, error = %e, "execution context not ready, not starting more workers");
                    break;
                }
                Ok(Err(e)) => {
                    crate::log_error!(e, attempt, "failed to acquire execution context");
                    break;
                }
                Err(payload) => {
                    error!(attempt, panic = %panic_message(payload.as_ref()), "execution context provider panicked");
                    break;
                }
            };

            if exported {
                let bound = panic::catch_unwind(AssertUnwindSafe(|| {
                    context.bind(EXPORTED_NAME, Arc::new(self.handle()))
                }));
                if let Err(payload) = bound {
                    error!(attempt, panic = %panic_message(payload.as_ref()), "failed to bind manager handle");
                    break;
                }
            }

            let worker = Arc::new(Worker::new(context, Arc::clone(&source)));
            let id = worker.id();
            let runner = Arc::clone(&worker);
            let thread = factory.new_thread(move || {
                let name = std::thread::current().name().unwrap_or_default().to_string();
                let _span = crate::worker_span!(name.as_str(), worker = %runner.id()).entered();
                runner.run();
            });

            let mut registry = self.lock_registry();
            let entry = registry.entry(id).or_insert(WorkerEntry {
                worker,
                thread,
                exported,
            });
            if let Err(e) = entry.thread.start() {
                crate::log_error!(e, attempt, "failed to start worker thread");
                if let Some(entry) = registry.remove(&id) {
                    drop(registry);
                    release(id, &entry);
                }
                break;
            }
            debug!(worker = %id, thread = %entry.thread.name(), "worker thread started");
            started += 1;
        }

        info!(started, requested = count, "started {} worker thread(s)", started);
    }

    /// Stops every registered worker. Safe to call more than once.
    pub fn shutdown(&self) {
        let entries = std::mem::take(&mut *self.lock_registry());
        if entries.is_empty() {
            debug!("no workers to shut down");
            return;
        }

        let mut processed = 0;
        let mut joining = true;
        for (id, mut entry) in entries {
            release(id, &entry);
            entry.thread.interrupt();
            processed += 1;

            if !joining {
                continue;
            }
            match entry.thread.join_timeout(self.join_timeout) {
                Ok(true) => debug!(worker = %id, thread = %entry.thread.name(), "worker thread joined"),
                Ok(false) => warn!(
                    worker = %id,
                    thread = %entry.thread.name(),
                    timeout = ?self.join_timeout,
                    "worker thread did not terminate in time"
                ),
                Err(e @ ThreadError::Interrupted { .. }) => {
                    warn!(error = %e, "interrupted during shutdown, not waiting for remaining workers");
                    joining = false;
                }
                Err(e) => crate::log_error!(e, worker = %id, "worker thread failed"),
            }
        }

        crate::log_lifecycle!("manager", "pool", "stopped", processed);
    }

    /// Runs [`startup`](Self::startup) and returns a guard that shuts the
    /// workers down when dropped.
    pub fn start_scoped(self) -> ManagedWorkers {
        self.startup();
        ManagedWorkers { manager: self }
    }

    fn lock_registry(&self) -> MutexGuard<'_, HashMap<WorkerId, WorkerEntry>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Unbinds the handle and stops the worker. A panic from the context is
/// logged so the remaining workers are still released.
fn release(id: WorkerId, entry: &WorkerEntry) {
    let released = panic::catch_unwind(AssertUnwindSafe(|| {
        if entry.exported {
            entry.worker.context().unbind(EXPORTED_NAME);
        }
        entry.worker.stop();
    }));
    if let Err(payload) = released {
        error!(worker = %id, panic = %panic_message(payload.as_ref()), "worker panicked while stopping");
    }
}

impl fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerManager")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .field("group", &self.group.as_ref().map(|g| g.name().to_string()))
            .field("join_timeout", &self.join_timeout)
            .field("workers", &self.registry_len())
            .finish()
    }
}

/// Builder for [`WorkerManager`].
pub struct WorkerManagerBuilder {
    config: ConfigResolver,
    provider: Arc<dyn ContextProvider>,
    catalog: BuiltinCatalog,
    opener: Arc<dyn PathOpener>,
    group: Option<Arc<ThreadGroup>>,
    join_timeout: Duration,
}

impl WorkerManagerBuilder {
    pub fn catalog(mut self, catalog: BuiltinCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn path_opener(mut self, opener: impl PathOpener + 'static) -> Self {
        self.opener = Arc::new(opener);
        self
    }

    /// Thread group for worker threads; defaults to the caller's group.
    pub fn thread_group(mut self, group: Arc<ThreadGroup>) -> Self {
        self.group = Some(group);
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn build(self) -> WorkerManager {
        WorkerManager {
            config: Arc::new(self.config),
            provider: self.provider,
            catalog: self.catalog,
            opener: self.opener,
            group: self.group,
            join_timeout: self.join_timeout,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// What task code sees under [`EXPORTED_NAME`].
///
/// Holds only a weak reference to the registry, so a handle kept alive by a
/// context never keeps the manager's workers alive.
pub struct ManagerHandle {
    config: Arc<ConfigResolver>,
    registry: Weak<Registry>,
}

impl ManagerHandle {
    /// Looks up a configuration value the way the manager does.
    pub fn parameter(&self, key: &str) -> Option<String> {
        self.config.get(key)
    }

    /// Number of registered workers; 0 once the manager is gone.
    pub fn worker_count(&self) -> usize {
        self.registry
            .upgrade()
            .map(|registry| registry.lock().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0)
    }
}

impl Binding for ManagerHandle {}

impl fmt::Debug for ManagerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerHandle")
            .field("attached", &(self.registry.strong_count() > 0))
            .finish()
    }
}

/// Running workers tied to a scope; dropping the guard shuts them down.
#[derive(Debug)]
pub struct ManagedWorkers {
    manager: WorkerManager,
}

impl Deref for ManagedWorkers {
    type Target = WorkerManager;

    fn deref(&self) -> &WorkerManager {
        &self.manager
    }
}

impl Drop for ManagedWorkers {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use foreman_api::{ContextError, ExecutionContext};

    use super::*;
    use crate::config::MapSource;

    fn unavailable() -> Result<Arc<dyn ExecutionContext>, ContextError> {
        Err(ContextError::not_ready("no runtime in unit tests"))
    }

    fn manager(config: MapSource) -> WorkerManager {
        WorkerManager::new(ConfigResolver::new(config), unavailable)
    }

    #[test]
    fn test_defaults() {
        let manager = manager(MapSource::new());
        assert_eq!(manager.join_timeout(), DEFAULT_JOIN_TIMEOUT);
        assert_eq!(manager.registry_len(), 0);
        assert!(manager.worker_threads().is_empty());
        assert!(manager.catalog().lookup("resque").is_some());
    }

    #[test]
    fn test_startup_with_unavailable_contexts_registers_nothing() {
        let manager = manager(MapSource::new().with(keys::SCRIPT, "1 + 1").with(keys::THREAD_COUNT, "3"));
        manager.startup();
        assert_eq!(manager.registry_len(), 0);
    }

    #[test]
    fn test_shutdown_without_workers_is_noop() {
        let manager = manager(MapSource::new());
        manager.shutdown();
        manager.shutdown();
        assert_eq!(manager.registry_len(), 0);
    }

    #[test]
    fn test_handle_reads_parameters() {
        let manager = manager(MapSource::new().with("queue", " mailers "));
        let handle = manager.handle();
        assert_eq!(handle.parameter("queue").as_deref(), Some("mailers"));
        assert_eq!(handle.parameter("missing"), None);
    }

    #[test]
    fn test_handle_outlives_manager() {
        let handle = manager(MapSource::new()).handle();
        assert_eq!(handle.worker_count(), 0);
    }

    #[test]
    fn test_handle_downcasts_from_binding() {
        let manager = manager(MapSource::new());
        let binding: Arc<dyn Binding> = Arc::new(manager.handle());
        assert!(binding.downcast_arc::<ManagerHandle>().is_ok());
    }
}
