//! Task sources and the capability used to load them.

use std::fmt;
use std::io::{self, Read};

/// What a worker is asked to run.
///
/// Built once per manager startup and shared read-only by every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSource {
    /// A payload supplied verbatim in configuration.
    Inline { script: String },
    /// Only an identifier; the execution context loads it lazily.
    Named { path: String },
    /// A payload read from `path`, which is kept as a label for diagnostics.
    Loaded { script: String, path: String },
}

impl TaskSource {
    pub fn inline(script: impl Into<String>) -> Self {
        TaskSource::Inline { script: script.into() }
    }

    pub fn named(path: impl Into<String>) -> Self {
        TaskSource::Named { path: path.into() }
    }

    pub fn loaded(script: impl Into<String>, path: impl Into<String>) -> Self {
        TaskSource::Loaded {
            script: script.into(),
            path: path.into(),
        }
    }

    /// The payload text, if the source carries one.
    pub fn script(&self) -> Option<&str> {
        match self {
            TaskSource::Inline { script } | TaskSource::Loaded { script, .. } => Some(script),
            TaskSource::Named { .. } => None,
        }
    }

    /// The path or name the payload came from, if any.
    pub fn label(&self) -> Option<&str> {
        match self {
            TaskSource::Named { path } | TaskSource::Loaded { path, .. } => Some(path),
            TaskSource::Inline { .. } => None,
        }
    }
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSource::Inline { script } => write!(f, "inline script ({} bytes)", script.len()),
            TaskSource::Named { path } => write!(f, "named task '{}'", path),
            TaskSource::Loaded { script, path } => {
                write!(f, "script '{}' ({} bytes)", path, script.len())
            }
        }
    }
}

/// Opens a task definition by identifier (a URL or a path).
///
/// `Ok(None)` means "nothing there"; `Err` means the identifier was found but
/// could not be opened.
pub trait PathOpener: Send + Sync {
    fn open(&self, identifier: &str) -> io::Result<Option<Box<dyn Read + Send>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let inline = TaskSource::inline("loop {}");
        assert_eq!(inline.script(), Some("loop {}"));
        assert_eq!(inline.label(), None);

        let named = TaskSource::named("resque/start_worker.rb");
        assert_eq!(named.script(), None);
        assert_eq!(named.label(), Some("resque/start_worker.rb"));

        let loaded = TaskSource::loaded("nil", "/app/worker.rb");
        assert_eq!(loaded.script(), Some("nil"));
        assert_eq!(loaded.label(), Some("/app/worker.rb"));
    }

    #[test]
    fn test_display_does_not_dump_payload() {
        let loaded = TaskSource::loaded("secret payload", "/app/worker.rb");
        let shown = loaded.to_string();
        assert!(shown.contains("/app/worker.rb"));
        assert!(!shown.contains("secret"));
    }
}
