//! # Configuration Resolution
//!
//! Named configuration values come from a pluggable, layered key/value
//! source: container init-parameters, a parameter file, the process
//! environment. [`ConfigResolver`] adds typed accessors on top that never
//! fail: an unparsable value is logged and the default is used instead.
//!
//! Resolved values are memoized for the lifetime of the resolver. Setters
//! override the memoized value and are meant to be called before the owning
//! manager starts.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tracing::warn;

use crate::error::ConfigError;
use crate::thread::ThreadPriority;

/// Configuration keys understood by the worker manager.
pub mod keys {
    /// Name of a built-in worker to run.
    pub const WORKER: &str = "worker";
    /// Inline task payload.
    pub const SCRIPT: &str = "worker.script";
    /// Path or URL to load the task payload from.
    pub const SCRIPT_PATH: &str = "worker.script.path";
    /// Number of workers to start.
    pub const THREAD_COUNT: &str = "worker.thread.count";
    /// `MIN`/`LOW`, `NORM`/`NORMAL`, `MAX`/`HIGH` or an integer 1-10.
    pub const THREAD_PRIORITY: &str = "worker.thread.priority";
    /// Prefix for worker thread names.
    pub const THREAD_PREFIX: &str = "worker.thread.prefix";
    /// When true, startup does nothing.
    pub const SKIP: &str = "worker.skip";
}

pub const DEFAULT_THREAD_COUNT: usize = 1;

/// A source of raw string configuration values.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory parameters, e.g. supplied by the hosting container.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Parses a flat JSON object. Numbers and booleans are kept in their
    /// textual form; `null` entries are skipped.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let object: serde_json::Map<String, Value> = serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidParameterFile(e.to_string()))?;

        let mut source = MapSource::new();
        for (key, value) in object {
            match value {
                Value::Null => {}
                Value::String(s) => source.insert(key, s),
                Value::Bool(b) => source.insert(key, b.to_string()),
                Value::Number(n) => source.insert(key, n.to_string()),
                Value::Array(_) | Value::Object(_) => {
                    return Err(ConfigError::InvalidParameterFile(format!(
                        "value for '{}' must be a string, number or boolean",
                        key
                    )));
                }
            }
        }
        Ok(source)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut source = MapSource::new();
        for (key, value) in iter {
            source.insert(key, value);
        }
        source
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Process environment. `worker.thread.count` is read as `WORKER_THREAD_COUNT`,
/// or `<PREFIX>_WORKER_THREAD_COUNT` when a prefix is set.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefix: Option<String>,
}

impl EnvSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    pub fn env_key(&self, key: &str) -> String {
        let base: String = key
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix.to_ascii_uppercase(), base),
            None => base,
        }
    }
}

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.env_key(key)).ok()
    }
}

/// Ordered list of sources; the first one returning a value wins.
#[derive(Default)]
pub struct LayeredSource {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, source: impl ConfigSource + 'static) -> Self {
        self.push(source);
        self
    }

    pub fn push(&mut self, source: impl ConfigSource + 'static) {
        self.layers.push(Box::new(source));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ConfigSource for LayeredSource {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }
}

impl fmt::Debug for LayeredSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayeredSource")
            .field("layers", &self.layers.len())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Memo {
    thread_count: Option<usize>,
    thread_priority: Option<ThreadPriority>,
    thread_prefix: Option<Option<String>>,
    exported: Option<bool>,
}

/// Typed, memoizing view over a [`ConfigSource`].
pub struct ConfigResolver {
    source: Box<dyn ConfigSource>,
    memo: Mutex<Memo>,
}

impl ConfigResolver {
    pub fn new(source: impl ConfigSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            memo: Mutex::new(Memo::default()),
        }
    }

    /// Resolver reading the process environment only.
    pub fn from_env() -> Self {
        Self::new(EnvSource::new())
    }

    /// Raw lookup. Values are trimmed; blank values count as absent.
    pub fn get(&self, key: &str) -> Option<String> {
        self.source
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.parse_or_default(key, default, |value| {
            value.parse::<i64>().map_err(|_| ConfigError::InvalidInteger {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.parse_or_default(key, default, |value| parse_bool(key, value))
    }

    pub fn get_priority(&self, key: &str, default: ThreadPriority) -> ThreadPriority {
        self.parse_or_default(key, default, |value| value.parse::<ThreadPriority>())
    }

    fn parse_or_default<T, F>(&self, key: &str, default: T, parse: F) -> T
    where
        F: FnOnce(&str) -> Result<T, ConfigError>,
    {
        let Some(value) = self.get(key) else {
            return default;
        };
        match parse(&value) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(key, value = %value, error = %e, "could not parse configuration value, using default");
                default
            }
        }
    }

    /// Number of workers to start (memoized, default 1).
    pub fn thread_count(&self) -> usize {
        if let Some(count) = self.memo().thread_count {
            return count;
        }
        let raw = self.get_int(keys::THREAD_COUNT, DEFAULT_THREAD_COUNT as i64);
        let count = usize::try_from(raw).unwrap_or_else(|_| {
            warn!(key = keys::THREAD_COUNT, value = raw, "negative worker count, using default");
            DEFAULT_THREAD_COUNT
        });
        *self.memo().thread_count.get_or_insert(count)
    }

    pub fn set_thread_count(&self, count: usize) {
        self.memo().thread_count = Some(count);
    }

    /// Priority for worker threads (memoized, default `NORM`).
    pub fn thread_priority(&self) -> ThreadPriority {
        if let Some(priority) = self.memo().thread_priority {
            return priority;
        }
        let priority = self.get_priority(keys::THREAD_PRIORITY, ThreadPriority::NORM);
        *self.memo().thread_priority.get_or_insert(priority)
    }

    pub fn set_thread_priority(&self, priority: ThreadPriority) {
        self.memo().thread_priority = Some(priority);
    }

    /// Prefix for worker thread names (memoized, default none).
    pub fn thread_prefix(&self) -> Option<String> {
        if let Some(prefix) = &self.memo().thread_prefix {
            return prefix.clone();
        }
        let prefix = self.get(keys::THREAD_PREFIX);
        self.memo().thread_prefix.get_or_insert(prefix).clone()
    }

    pub fn set_thread_prefix(&self, prefix: Option<String>) {
        self.memo().thread_prefix = Some(prefix);
    }

    /// Whether the manager installs a handle to itself into each context.
    pub fn is_exported(&self) -> bool {
        self.memo().exported.unwrap_or(true)
    }

    pub fn set_exported(&self, exported: bool) {
        self.memo().exported = Some(exported);
    }

    pub fn is_skip_startup(&self) -> bool {
        self.get_bool(keys::SKIP, false)
    }

    fn memo(&self) -> MutexGuard<'_, Memo> {
        self.memo.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("memo", &*self.memo())
            .finish()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBoolean {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
