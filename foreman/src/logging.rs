// Logging for Foreman
//
// Built on the `tracing` ecosystem. The manager and its workers emit
// structured events; the host decides once, at start-up, where they go.
//
// # Usage Examples
//
// ```rust
// use foreman::logging;
//
// // INFO level, console output
// logging::init_default();
//
// // Or a custom configuration
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     json_format: false,
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// Worker threads inherit the dispatcher that was current on the thread that
// started them, so a scoped subscriber installed with
// `tracing::subscriber::with_default` also sees worker output.

use std::io;
use std::sync::Once;
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the Foreman logging system
///
/// # Examples
///
/// ```rust
/// use foreman::logging::LogConfig;
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     json_format: true,
///     show_file_line: false,
///     show_thread_info: true,
///     show_time: true,
///     target_filters: Some("foreman=debug,foreman::thread=trace".to_string()),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id. Worker thread names carry the
    /// configured prefix, so this is usually worth keeping on.
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    if let Some(filters) = &config.target_filters {
        for directive in filters.split(',') {
            if let Ok(directive) = directive.trim().parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Initialize the logging system with the given configuration
///
/// Sets the global tracing subscriber. Safe to call multiple times; only the
/// first call (of this function or any `init_*` preset) takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(&config));

        let subscriber: Box<dyn Subscriber + Send + Sync> = match (config.json_format, config.show_time) {
            (true, _) => Box::new(
                registry.with(
                    fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_thread_names(config.show_thread_info)
                        .with_thread_ids(config.show_thread_info),
                ),
            ),
            (false, true) => Box::new(registry.with(console_layer(&config))),
            (false, false) => Box::new(registry.with(console_layer(&config).without_time())),
        };

        set_global_subscriber(subscriber);
    });
}

fn console_layer<S>(config: &LogConfig) -> fmt::Layer<S>
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_file(config.show_file_line)
        .with_line_number(config.show_file_line)
        .with_thread_names(config.show_thread_info)
        .with_thread_ids(config.show_thread_info)
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Opens `path` for appending, creating it if needed.
pub fn file_writer(path: &str) -> io::Result<Box<dyn io::Write + Send + Sync + 'static>> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

/// Initialize logging with both console and file output
///
/// The file is opened up front so an unwritable path is reported to the
/// caller instead of silently dropping log lines. File output is always
/// plain text with location and thread information.
pub fn init_with_file(config: LogConfig, log_file: &str) -> Result<(), io::Error> {
    file_writer(log_file)?;

    INIT.call_once(|| {
        let log_file_path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || match file_writer(&log_file_path) {
                Ok(writer) => writer,
                Err(_) => Box::new(io::stderr()),
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer(&config))
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

impl LogConfig {
    /// DEBUG for the crate, TRACE for thread provisioning.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            target_filters: Some("foreman=debug,foreman::thread=trace".to_string()),
            ..Self::default()
        }
    }

    /// Production settings
    ///
    /// - INFO level (can be overridden with `RUST_LOG`)
    /// - JSON output for log aggregators
    /// - No file/line information
    pub fn production() -> Self {
        Self {
            json_format: true,
            show_file_line: false,
            ..Self::default()
        }
    }

    /// Warnings and errors only, no timestamps or thread info.
    pub fn test() -> Self {
        Self {
            level: Level::WARN,
            show_thread_info: false,
            show_time: false,
            ..Self::default()
        }
    }
}

/// INFO level, human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

pub fn init_development() {
    init(LogConfig::development());
}

pub fn init_production() {
    init(LogConfig::production());
}

/// ```rust
/// foreman::logging::init_test();
/// ```
pub fn init_test() {
    init(LogConfig::test());
}

/// Create a span covering one worker
///
/// # Examples
///
/// ```rust
/// let span = foreman::worker_span!("pool-worker#1");
/// let _guard = span.enter();
///
/// let span = foreman::worker_span!("pool-worker#2", priority = 10);
/// ```
#[macro_export]
macro_rules! worker_span {
    ($thread:expr) => {
        tracing::info_span!("worker", thread = $thread)
    };
    ($thread:expr, $($fields:tt)*) => {
        tracing::info_span!("worker", thread = $thread, $($fields)*)
    };
}

/// Log lifecycle events of the manager and its workers
///
/// # Examples
///
/// ```rust
/// foreman::log_lifecycle!("manager", "main", "started");
/// foreman::log_lifecycle!("worker", 7, "stopped", reason = "shutdown");
/// ```
#[macro_export]
macro_rules! log_lifecycle {
    ($component:expr, $id:expr, $event:expr) => {
        tracing::info!(component = $component, id = %$id, event = $event)
    };
    ($component:expr, $id:expr, $event:expr, $($fields:tt)*) => {
        tracing::info!(component = $component, id = %$id, event = $event, $($fields)*)
    };
}

/// Log error events
///
/// # Examples
///
/// ```rust
/// let error = std::io::Error::new(std::io::ErrorKind::NotFound, "script not found");
/// foreman::log_error!(error);
/// foreman::log_error!(error, phase = "startup");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        tracing::error!(error = %$error)
    };
    ($error:expr, $($fields:tt)*) => {
        tracing::error!(error = %$error, $($fields)*)
    };
}

/// The dispatcher current on this thread.
///
/// Worker threads install it on start so their events reach the same
/// subscriber as the thread that started them.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

pub use tracing::{debug, error, info, trace, warn};

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_file_writer_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreman.log");
        let path = path.to_str().unwrap();

        file_writer(path).unwrap().write_all(b"first\n").unwrap();
        file_writer(path).unwrap().write_all(b"second\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_init_with_unwritable_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("foreman.log");
        assert!(init_with_file(LogConfig::default(), path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_presets() {
        let development = LogConfig::development();
        assert_eq!(development.level, Level::DEBUG);
        assert!(!development.json_format);

        let production = LogConfig::production();
        assert_eq!(production.level, Level::INFO);
        assert!(production.json_format);
        assert!(!production.show_file_line);

        let test = LogConfig::test();
        assert_eq!(test.level, Level::WARN);
        assert!(!test.show_time);
    }

    #[test]
    fn test_target_filters_become_directives() {
        let filter = env_filter(&LogConfig::development()).to_string();
        assert!(filter.contains("foreman::thread=trace"), "{}", filter);
        assert!(filter.contains("foreman=debug"), "{}", filter);
    }
}
