use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while parsing configuration values.
///
/// These never abort startup: the resolver logs them and substitutes the
/// default for the key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid integer for '{key}': '{value}'")]
    InvalidInteger { key: String, value: String },
    #[error("Invalid boolean for '{key}': '{value}'")]
    InvalidBoolean { key: String, value: String },
    #[error("Invalid thread priority '{0}' (expected MIN, NORM, MAX or 1-10)")]
    InvalidPriority(String),
    #[error("Thread priority {0} out of range 1-10")]
    PriorityOutOfRange(i64),
    #[error("Invalid parameter file: {0}")]
    InvalidParameterFile(String),
}

/// Errors raised while resolving a task source from a path.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read task source '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Unknown encoding '{label}' declared in '{path}'")]
    UnknownEncoding { path: String, label: String },
    #[error("Task source '{path}' is not valid {encoding}")]
    Malformed { path: String, encoding: &'static str },
}

/// Errors related to worker threads.
#[derive(Error, Debug)]
pub enum ThreadError {
    #[error("Thread {0} was already started")]
    AlreadyStarted(String),
    #[error("Failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("Thread {name} panicked: {message}")]
    Panicked { name: String, message: String },
    #[error("Interrupted while waiting up to {timeout:?} for thread {name}")]
    Interrupted { name: String, timeout: Duration },
}
