//! Reconciles the installed buffer and subscription with the configuration source.
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ConfigSource, Configuration};
use crate::level::Level;
use crate::listener::ListenerFactory;
use crate::LogWriter;

/// How often the configuration is polled by default.
pub const REFRESH_PERIOD: Duration = Duration::from_millis(3000);

/// Tunables of a [`SelfDiagnostics`](crate::SelfDiagnostics) facility.
#[derive(Clone, Debug)]
pub struct Options {
    /// Pause between two polls of the configuration source.
    pub period: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            period: REFRESH_PERIOD,
        }
    }
}

enum FileState {
    Closed,
    Open { directory: PathBuf, capacity: usize },
}

enum LevelState<L> {
    Unset,
    Set { level: Level, listener: L },
}

pub(crate) struct Refresher<S, F: ListenerFactory> {
    writer: LogWriter,
    source: S,
    factory: F,
    file: FileState,
    level: LevelState<F::Listener>,
    /// The last file we failed to open, reported once rather than on every period.
    failed: Option<(PathBuf, usize)>,
}

impl<S: ConfigSource, F: ListenerFactory> Refresher<S, F> {
    pub(crate) fn new(writer: LogWriter, source: S, factory: F) -> Self {
        Refresher {
            writer,
            source,
            factory,
            file: FileState::Closed,
            level: LevelState::Unset,
            failed: None,
        }
    }

    /// Poll the source once and apply what changed.
    ///
    /// An absent configuration closes the file but keeps the subscription: the level only changes
    /// when a configuration names a different one.
    pub(crate) fn refresh(&mut self) {
        match self.source.try_get_configuration() {
            None => self.close_file(),
            Some(config) => {
                self.apply_file(&config);
                self.apply_level(config.level);
            }
        }
    }

    /// Close the file and tear down the subscription.
    pub(crate) fn shutdown(mut self) {
        self.reset();
    }

    /// Back to the initial state: no file, no subscription.
    pub(crate) fn reset(&mut self) {
        self.close_file();
        self.level = LevelState::Unset;
    }

    fn apply_file(&mut self, config: &Configuration) {
        let capacity = config.capacity();

        if let FileState::Open {
            directory,
            capacity: current,
        } = &self.file
        {
            if *directory == config.directory && *current == capacity {
                return;
            }
        }

        self.close_file();

        match self.writer.shared.open(&config.directory, capacity) {
            Ok(path) => {
                info!(path = %path.display(), capacity, "opened self-diagnostics log");
                self.failed = None;
                self.file = FileState::Open {
                    directory: config.directory.clone(),
                    capacity,
                };
            }
            Err(err) => {
                let attempt = (config.directory.clone(), capacity);
                if self.failed.as_ref() != Some(&attempt) {
                    warn!(error = %err, "failed to open self-diagnostics log, retrying each period");
                    self.failed = Some(attempt);
                } else {
                    debug!(error = %err, "self-diagnostics log still unavailable");
                }
            }
        }
    }

    fn apply_level(&mut self, level: Level) {
        if let LevelState::Set { level: current, .. } = &self.level {
            if *current == level {
                return;
            }
        }

        // The old subscription goes away before the new one is created.
        self.level = LevelState::Unset;
        info!(%level, "self-diagnostics level changed");

        let listener = self.factory.subscribe(level, self.writer.clone());
        self.level = LevelState::Set { level, listener };
    }

    fn close_file(&mut self) {
        self.file = FileState::Closed;
        self.writer.shared.uninstall();
    }

    #[cfg(test)]
    pub(crate) fn level(&self) -> Option<Level> {
        match self.level {
            LevelState::Unset => None,
            LevelState::Set { level, .. } => Some(level),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        matches!(self.file, FileState::Open { .. })
    }
}
