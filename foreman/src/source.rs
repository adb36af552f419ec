//! # Task Source Resolution
//!
//! Works out what the workers of one manager should run. Precedence, first
//! match wins:
//!
//! 1. `worker`: a built-in worker name looked up in a [`BuiltinCatalog`]
//! 2. `worker.script`: an inline payload
//! 3. `worker.script.path`: a payload loaded through a [`PathOpener`]
//!
//! Scripts loaded from a path may declare their encoding on a first line
//! starting with `#`, e.g. `# coding: latin1`. Without a declaration they are
//! read as UTF-8.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use tracing::{debug, error, warn};
use url::Url;

use foreman_api::{PathOpener, TaskSource};

use crate::config::{keys, ConfigResolver};
use crate::error::SourceError;

static CODING_PRAGMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"coding:\s*(\S+)").expect("coding pragma regex is valid"));

/// Immutable mapping from built-in worker names to task identifiers.
///
/// Names are matched case-insensitively with `::` treated as `_`, so
/// `Delayed::Job` finds `delayed_job`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinCatalog {
    entries: HashMap<String, String>,
}

impl BuiltinCatalog {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Adds or replaces an entry.
    pub fn with(mut self, name: &str, path: impl Into<String>) -> Self {
        self.entries.insert(Self::normalize(name), path.into());
        self
    }

    pub fn normalize(name: &str) -> String {
        name.trim().replace("::", "_").to_lowercase()
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries.get(&Self::normalize(name)).map(String::as_str)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for BuiltinCatalog {
    fn default() -> Self {
        BuiltinCatalog::empty()
            .with("delayed_job", "delayed/start_worker.rb")
            .with("delayed", "delayed/start_worker.rb")
            .with("navvy", "navvy/start_worker.rb")
            .with("resque", "resque/start_worker.rb")
    }
}

/// Opens `file:` URLs and filesystem paths.
///
/// Other URL schemes are refused. Relative paths are resolved against the
/// base directory when one is set.
#[derive(Debug, Clone, Default)]
pub struct FsPathOpener {
    base_dir: Option<PathBuf>,
}

impl FsPathOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn open_file(path: &Path) -> io::Result<Option<Box<dyn Read + Send>>> {
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(Box::new(File::open(path)?)))
    }
}

impl PathOpener for FsPathOpener {
    fn open(&self, identifier: &str) -> io::Result<Option<Box<dyn Read + Send>>> {
        match Url::parse(identifier) {
            Ok(url) if url.scheme() == "file" => {
                let path = url.to_file_path().map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("'{}' is not a local file URL", identifier),
                    )
                })?;
                Self::open_file(&path)
            }
            // Single-letter schemes are Windows drive letters, not URLs.
            Ok(url) if url.scheme().len() > 1 => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported URL scheme '{}'", url.scheme()),
            )),
            _ => Self::open_file(&self.resolve(identifier)),
        }
    }
}

/// Resolves the task source for one startup, or `None` if nothing usable is configured.
pub fn resolve_task_source(
    config: &ConfigResolver,
    catalog: &BuiltinCatalog,
    opener: &dyn PathOpener,
) -> Option<TaskSource> {
    if let Some(name) = config.get(keys::WORKER) {
        match catalog.lookup(&name) {
            Some(path) => return Some(TaskSource::named(path)),
            None => warn!(worker = %name, known = ?catalog.names(), "unsupported worker name"),
        }
    }

    if let Some(script) = config.get(keys::SCRIPT) {
        return Some(TaskSource::inline(script));
    }

    let path = config.get(keys::SCRIPT_PATH)?;
    match load_script(opener, &path) {
        Ok(source) => Some(source),
        Err(e) => {
            error!(path = %path, error = %e, "error reading worker script");
            None
        }
    }
}

/// Loads the script at `path`.
///
/// When the opener finds nothing, the path is handed to the execution
/// context as a [`TaskSource::Named`] to resolve on its own.
pub fn load_script(opener: &dyn PathOpener, path: &str) -> Result<TaskSource, SourceError> {
    let io_error = |source| SourceError::Io {
        path: path.to_string(),
        source,
    };

    let Some(mut reader) = opener.open(path).map_err(io_error)? else {
        debug!(path, "script not found by path opener, leaving it to the execution context");
        return Ok(TaskSource::named(path));
    };

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(io_error)?;
    let script = decode_script(path, &bytes)?;
    Ok(TaskSource::loaded(script, path))
}

/// Decodes script bytes, honouring a `coding:` pragma on a leading `#` line.
///
/// The pragma line itself is kept in the output.
pub fn decode_script(path: &str, bytes: &[u8]) -> Result<String, SourceError> {
    let (mut script, body, encoding) = if bytes.first() == Some(&b'#') {
        let end = bytes.iter().position(|&b| b == b'\n').unwrap_or(bytes.len());
        let first_line = String::from_utf8_lossy(&bytes[..end]).into_owned();
        let encoding = match CODING_PRAGMA.captures(&first_line) {
            Some(caps) => lookup_encoding(&caps[1]).ok_or_else(|| SourceError::UnknownEncoding {
                path: path.to_string(),
                label: caps[1].to_string(),
            })?,
            None => ScriptEncoding::Whatwg(UTF_8),
        };
        (first_line, &bytes[end..], encoding)
    } else {
        (String::new(), bytes, ScriptEncoding::Whatwg(UTF_8))
    };

    match encoding {
        ScriptEncoding::Latin1 => script.push_str(&encoding_rs::mem::decode_latin1(body)),
        ScriptEncoding::Whatwg(encoding) => {
            let (decoded, had_errors) = encoding.decode_without_bom_handling(body);
            if had_errors {
                return Err(SourceError::Malformed {
                    path: path.to_string(),
                    encoding: encoding.name(),
                });
            }
            script.push_str(&decoded);
        }
    }
    Ok(script)
}

/// WHATWG maps the ISO-8859-1 labels to windows-1252, which would turn the
/// C1 range 0x80..=0x9F into printable characters. Scripts declaring
/// ISO-8859-1 get every byte mapped to the code point of the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptEncoding {
    Latin1,
    Whatwg(&'static Encoding),
}

const LATIN1_LABELS: &[&str] = &[
    "latin1",
    "l1",
    "iso88591",
    "iso885911987",
    "isoir100",
    "cp819",
    "ibm819",
    "csisolatin1",
];

fn lookup_encoding(label: &str) -> Option<ScriptEncoding> {
    let compact = label.replace(['-', '_'], "").to_ascii_lowercase();
    if LATIN1_LABELS.contains(&compact.as_str()) {
        return Some(ScriptEncoding::Latin1);
    }
    Encoding::for_label(label.as_bytes())
        .or_else(|| Encoding::for_label(compact.as_bytes()))
        .map(ScriptEncoding::Whatwg)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::MapSource;

    /// Serves fixed byte strings by identifier.
    struct MemoryOpener(HashMap<String, Vec<u8>>);

    impl MemoryOpener {
        fn with(path: &str, bytes: &[u8]) -> Self {
            let mut files = HashMap::new();
            files.insert(path.to_string(), bytes.to_vec());
            MemoryOpener(files)
        }
    }

    impl PathOpener for MemoryOpener {
        fn open(&self, identifier: &str) -> io::Result<Option<Box<dyn Read + Send>>> {
            Ok(self
                .0
                .get(identifier)
                .map(|bytes| Box::new(io::Cursor::new(bytes.clone())) as Box<dyn Read + Send>))
        }
    }

    struct BrokenOpener;

    impl PathOpener for BrokenOpener {
        fn open(&self, _identifier: &str) -> io::Result<Option<Box<dyn Read + Send>>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    fn config(pairs: &[(&str, &str)]) -> ConfigResolver {
        ConfigResolver::new(pairs.iter().copied().collect::<MapSource>())
    }

    #[test]
    fn test_catalog_normalization() {
        let catalog = BuiltinCatalog::default();
        assert_eq!(catalog.lookup("Delayed::Job"), Some("delayed/start_worker.rb"));
        assert_eq!(catalog.lookup("delayed_job"), Some("delayed/start_worker.rb"));
        assert_eq!(catalog.lookup("DELAYED"), Some("delayed/start_worker.rb"));
        assert_eq!(catalog.lookup("Resque"), Some("resque/start_worker.rb"));
        assert_eq!(catalog.lookup("sidekiq"), None);
        assert_eq!(catalog.names(), vec!["delayed", "delayed_job", "navvy", "resque"]);
    }

    #[test]
    fn test_catalog_override() {
        let catalog = BuiltinCatalog::empty().with("My::Worker", "custom/run.rb");
        assert_eq!(catalog.lookup("my_worker"), Some("custom/run.rb"));
        assert_eq!(catalog.lookup("resque"), None);
    }

    #[test]
    fn test_builtin_wins_over_script() {
        let config = config(&[(keys::WORKER, "navvy"), (keys::SCRIPT, "nil")]);
        let source = resolve_task_source(&config, &BuiltinCatalog::default(), &FsPathOpener::new());
        assert_eq!(source, Some(TaskSource::named("navvy/start_worker.rb")));
    }

    #[test]
    fn test_unknown_builtin_falls_through() {
        let config = config(&[(keys::WORKER, "sidekiq"), (keys::SCRIPT, "nil")]);
        let source = resolve_task_source(&config, &BuiltinCatalog::default(), &FsPathOpener::new());
        assert_eq!(source, Some(TaskSource::inline("nil")));
    }

    #[test]
    fn test_script_wins_over_path() {
        let config = config(&[(keys::SCRIPT, "run()"), (keys::SCRIPT_PATH, "/w.rb")]);
        let opener = MemoryOpener::with("/w.rb", b"other()");
        let source = resolve_task_source(&config, &BuiltinCatalog::default(), &opener);
        assert_eq!(source, Some(TaskSource::inline("run()")));
    }

    #[test]
    fn test_script_path_is_loaded() {
        let config = config(&[(keys::SCRIPT_PATH, "/path/worker.rb")]);
        let opener = MemoryOpener::with("/path/worker.rb", b"nil");
        let source = resolve_task_source(&config, &BuiltinCatalog::default(), &opener);
        assert_eq!(source, Some(TaskSource::loaded("nil", "/path/worker.rb")));
    }

    #[test]
    fn test_missing_path_is_left_to_context() {
        let config = config(&[(keys::SCRIPT_PATH, "lib/worker.rb")]);
        let opener = MemoryOpener(HashMap::new());
        let source = resolve_task_source(&config, &BuiltinCatalog::default(), &opener);
        assert_eq!(source, Some(TaskSource::named("lib/worker.rb")));
    }

    #[test]
    fn test_unreadable_path_resolves_to_none() {
        let config = config(&[(keys::SCRIPT_PATH, "/secret.rb")]);
        assert_eq!(resolve_task_source(&config, &BuiltinCatalog::default(), &BrokenOpener), None);
    }

    #[test]
    fn test_nothing_configured() {
        let source = resolve_task_source(&config(&[]), &BuiltinCatalog::default(), &FsPathOpener::new());
        assert_eq!(source, None);
    }

    #[test]
    fn test_decode_defaults_to_utf8() {
        let script = decode_script("w.rb", "puts 'żółw'\n".as_bytes()).unwrap();
        assert_eq!(script, "puts 'żółw'\n");
    }

    #[test]
    fn test_decode_comment_without_pragma() {
        let script = decode_script("w.rb", "# just a comment\nputs 'é'".as_bytes()).unwrap();
        assert_eq!(script, "# just a comment\nputs 'é'");
    }

    #[test]
    fn test_latin1_pragma_matches_inline_text() {
        let inline = "# coding: latin1\nputs 'caf\u{e9} cr\u{e8}me'\n";
        let mut bytes = b"# coding: latin1\nputs 'caf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b" cr");
        bytes.push(0xE8);
        bytes.extend_from_slice(b"me'\n");

        let decoded = decode_script("w.rb", &bytes).unwrap();
        assert_eq!(decoded, inline);
    }

    #[test]
    fn test_latin1_keeps_c1_controls() {
        assert_eq!(
            decode_script("w.rb", b"# coding: latin1\n\x80\x9f").unwrap(),
            "# coding: latin1\n\u{80}\u{9f}"
        );
        assert_eq!(
            decode_script("w.rb", b"# encoding: ISO-8859-1\n\x80").unwrap(),
            "# encoding: ISO-8859-1\n\u{80}"
        );
    }

    #[test]
    fn test_windows_1252_label_still_maps_c1_range() {
        assert_eq!(
            decode_script("w.rb", b"# coding: windows-1252\n\x80").unwrap(),
            "# coding: windows-1252\n\u{20ac}"
        );
    }

    #[test]
    fn test_pragma_with_hyphenated_label() {
        let mut bytes = b"# -*- coding: latin-1 -*-\n".to_vec();
        bytes.push(0xFC);
        assert_eq!(decode_script("w.rb", &bytes).unwrap(), "# -*- coding: latin-1 -*-\n\u{fc}");
    }

    #[test]
    fn test_unknown_encoding_is_reported() {
        let err = decode_script("w.rb", b"# coding: klingon\nnil").unwrap_err();
        assert!(matches!(err, SourceError::UnknownEncoding { ref label, .. } if label == "klingon"));
    }

    #[test]
    fn test_malformed_utf8_is_reported() {
        let err = decode_script("w.rb", &[b'p', 0xFF, 0xFE]).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { encoding: "UTF-8", .. }));
    }

    #[test]
    fn test_fs_opener_reads_files_and_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.rb");
        File::create(&path).unwrap().write_all(b"nil").unwrap();

        let opener = FsPathOpener::new();
        let mut content = String::new();
        opener
            .open(path.to_str().unwrap())
            .unwrap()
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "nil");

        let url = Url::from_file_path(&path).unwrap();
        assert!(opener.open(url.as_str()).unwrap().is_some());

        let relative = FsPathOpener::with_base_dir(dir.path());
        assert!(relative.open("worker.rb").unwrap().is_some());
        assert!(relative.open("missing.rb").unwrap().is_none());
        assert!(opener.open(dir.path().to_str().unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_fs_opener_refuses_remote_urls() {
        let err = FsPathOpener::new().open("https://example.com/worker.rb").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
