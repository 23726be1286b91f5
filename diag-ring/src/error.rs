use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::level::ParseLevelError;

/// Failure to create the mapped log file.
///
/// Never returned to writers. The refresh worker reports it and retries on its next period.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("log file capacity must be non-zero")]
    ZeroCapacity,
    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory { path: PathBuf, source: io::Error },
    #[error("failed to create log file {path}: {source}")]
    CreateFile { path: PathBuf, source: io::Error },
    #[error("failed to map log file {path}: {source}")]
    Map { path: PathBuf, source: io::Error },
}

/// A configuration file that was found but could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("configuration file {path} is larger than {limit} bytes")]
    TooLarge { path: PathBuf, limit: u64 },
    #[error("malformed configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("bad log level in configuration file {path}: {source}")]
    Level {
        path: PathBuf,
        source: ParseLevelError,
    },
}
