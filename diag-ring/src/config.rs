//! Where the desired log directory, size and level come from.
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::level::Level;

/// Name of the file searched by [`FileConfigSource::discover`].
pub const CONFIG_FILE_NAME: &str = "self_diagnostics.json";

/// Configuration files beyond this size are ignored.
pub const MAX_CONFIG_FILE_BYTES: u64 = 4 * 1024;

/// Bounds applied to `FileSize` of a configuration file, in KiB.
pub const MIN_FILE_SIZE_KB: usize = 1024;
pub const MAX_FILE_SIZE_KB: usize = 128 * 1024;

/// The desired state of the diagnostics log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    pub directory: PathBuf,
    /// Size of the log file in KiB.
    pub size_kb: usize,
    pub level: Level,
}

impl Configuration {
    pub fn new(directory: impl Into<PathBuf>, size_kb: usize, level: Level) -> Self {
        Configuration {
            directory: directory.into(),
            size_kb,
            level,
        }
    }

    /// Size of the log file in bytes.
    pub fn capacity(&self) -> usize {
        self.size_kb.saturating_mul(1024)
    }
}

/// Polled by the refresh worker, once at construction and then once per period.
///
/// `None` disables the log file until a configuration shows up again.
pub trait ConfigSource: Send + 'static {
    fn try_get_configuration(&mut self) -> Option<Configuration>;
}

impl<F> ConfigSource for F
where
    F: FnMut() -> Option<Configuration> + Send + 'static,
{
    fn try_get_configuration(&mut self) -> Option<Configuration> {
        self()
    }
}

/// Reads the configuration from a small JSON file.
///
/// ```json
/// {
///     "LogDirectory": "/var/log/my-service",
///     "FileSize": 2048,
///     "LogLevel": "Warning"
/// }
/// ```
///
/// `FileSize` is in KiB and clamped into [`MIN_FILE_SIZE_KB`]..=[`MAX_FILE_SIZE_KB`]. A missing or
/// unusable file means no configuration.
#[derive(Clone, Debug)]
pub struct FileConfigSource {
    candidates: Vec<PathBuf>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfiguration {
    log_directory: PathBuf,
    file_size: usize,
    log_level: String,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileConfigSource {
            candidates: vec![path.into()],
        }
    }

    /// Look for [`CONFIG_FILE_NAME`] in the working directory, then next to the executable.
    pub fn discover() -> Self {
        let mut candidates = Vec::with_capacity(2);

        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(CONFIG_FILE_NAME));
        }

        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_owned))
        {
            candidates.push(dir.join(CONFIG_FILE_NAME));
        }

        FileConfigSource { candidates }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// The configuration of the first candidate file that exists.
    pub fn read(&self) -> Result<Option<Configuration>, ConfigError> {
        for path in &self.candidates {
            match File::open(path) {
                Ok(file) => return parse(path, file).map(Some),
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(ConfigError::Read {
                        path: path.clone(),
                        source,
                    })
                }
            }
        }

        Ok(None)
    }
}

impl ConfigSource for FileConfigSource {
    fn try_get_configuration(&mut self) -> Option<Configuration> {
        match self.read() {
            Ok(config) => config,
            Err(err) => {
                debug!(error = %err, "ignoring self-diagnostics configuration");
                None
            }
        }
    }
}

fn parse(path: &Path, file: File) -> Result<Configuration, ConfigError> {
    let mut text = String::new();
    file.take(MAX_CONFIG_FILE_BYTES + 1)
        .read_to_string(&mut text)
        .map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

    if text.len() as u64 > MAX_CONFIG_FILE_BYTES {
        return Err(ConfigError::TooLarge {
            path: path.to_owned(),
            limit: MAX_CONFIG_FILE_BYTES,
        });
    }

    let raw: RawConfiguration =
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;

    let level = raw.log_level.parse().map_err(|source| ConfigError::Level {
        path: path.to_owned(),
        source,
    })?;

    Ok(Configuration {
        directory: raw.log_directory,
        size_kb: raw.file_size.clamp(MIN_FILE_SIZE_KB, MAX_FILE_SIZE_KB),
        level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn source_with(contents: &str) -> (tempfile::TempDir, FileConfigSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, contents).unwrap();
        (dir, FileConfigSource::new(path))
    }

    #[test]
    fn reads_all_keys() {
        let (_dir, mut source) = source_with(
            r#"{ "LogDirectory": "/tmp/diag", "FileSize": 2048, "LogLevel": "warning" }"#,
        );

        assert_eq!(
            source.try_get_configuration(),
            Some(Configuration::new("/tmp/diag", 2048, Level::Warning))
        );
    }

    #[test]
    fn clamps_file_size() {
        let (_dir, source) = source_with(
            r#"{ "LogDirectory": "logs", "FileSize": 1, "LogLevel": "Error" }"#,
        );
        assert_eq!(source.read().unwrap().unwrap().size_kb, MIN_FILE_SIZE_KB);

        let (_dir, source) = source_with(
            r#"{ "LogDirectory": "logs", "FileSize": 999999999, "LogLevel": "Error" }"#,
        );
        let config = source.read().unwrap().unwrap();
        assert_eq!(config.size_kb, MAX_FILE_SIZE_KB);
        assert_eq!(config.capacity(), MAX_FILE_SIZE_KB * 1024);
    }

    #[test]
    fn missing_file_is_no_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FileConfigSource::new(dir.path().join(CONFIG_FILE_NAME));

        assert!(source.read().unwrap().is_none());
        assert!(source.try_get_configuration().is_none());
    }

    #[test]
    fn first_existing_candidate_wins() {
        let (dir, _) = source_with(
            r#"{ "LogDirectory": "second", "FileSize": 1024, "LogLevel": "Verbose" }"#,
        );
        let source = FileConfigSource {
            candidates: vec![
                dir.path().join("absent.json"),
                dir.path().join(CONFIG_FILE_NAME),
            ],
        };

        let config = source.read().unwrap().unwrap();
        assert_eq!(config.directory, PathBuf::from("second"));
        assert_eq!(config.level, Level::Verbose);
    }

    #[test]
    fn rejects_bad_files() {
        let (_dir, source) = source_with("{ not json");
        assert!(matches!(source.read(), Err(ConfigError::Parse { .. })));

        let (_dir, source) = source_with(r#"{ "LogDirectory": "logs", "FileSize": 1024 }"#);
        assert!(matches!(source.read(), Err(ConfigError::Parse { .. })));

        let (_dir, mut source) = source_with(
            r#"{ "LogDirectory": "logs", "FileSize": 1024, "LogLevel": "Loud" }"#,
        );
        assert!(matches!(source.read(), Err(ConfigError::Level { .. })));
        assert!(source.try_get_configuration().is_none());

        let padding = " ".repeat(MAX_CONFIG_FILE_BYTES as usize);
        let (_dir, source) = source_with(&format!(
            r#"{{ "LogDirectory": "logs", "FileSize": 1024, "LogLevel": "Error" }}{padding}"#
        ));
        assert!(matches!(source.read(), Err(ConfigError::TooLarge { .. })));
    }

    #[test]
    fn closures_are_sources() {
        let mut calls = 0;
        let mut source = move || {
            calls += 1;
            (calls > 1).then(|| Configuration::new("logs", 1, Level::Error))
        };

        assert!(ConfigSource::try_get_configuration(&mut source).is_none());
        assert!(ConfigSource::try_get_configuration(&mut source).is_some());
    }
}
