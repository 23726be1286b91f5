//! A crash-safe self-diagnostics log.
//!
//! Internal diagnostic events of a library are written into a fixed-size file that is memory
//! mapped and used as a circular buffer. The bytes land in the page cache as soon as they are
//! stored, so the most recent events survive a crash of the host process, and writing one never
//! involves a system call or a lock.
//!
//! The pieces:
//!
//! - a [`ConfigSource`] is polled periodically for the desired directory, size and [`Level`];
//! - a background worker opens, replaces or closes the mapped file accordingly, and recreates the
//!   event subscription (a [`ListenerFactory`]) when the level changes;
//! - writers ask a [`LogWriter`] for a [`LogStream`] of some length. All threads share one atomic
//!   write position per file, reserved by compare-and-swap, and each thread keeps its own slot in
//!   a table that lives as long as the file.
//!
//! The file is `<directory>/<executable>.<pid>.log`, has exactly the configured size and holds raw
//! bytes without any header or framing. Readers must cope with wraparound and with partially
//! overwritten lines at the write position.
//!
//! Nothing here ever fails towards the caller. If the log cannot be written, the stream is simply
//! not available.
//!
//! ```no_run
//! use std::io::Write;
//! use diag_ring::{Configuration, Level, LogWriter, SelfDiagnostics};
//!
//! let diagnostics = SelfDiagnostics::new(
//!     || Some(Configuration::new("/tmp/diagnostics", 1024, Level::Warning)),
//!     |_: Level, _: LogWriter| (),
//! );
//!
//! let line = b"export failed: connection refused\n";
//! if let Some(mut stream) = diagnostics.try_get_log_stream(line.len()) {
//!     let _ = stream.write(&line[..stream.available().min(line.len())]);
//! }
//! ```
//!
//! ## Not a durable log
//!
//! The mapping is never explicitly synchronized. What reaches the disk after a *system* crash is
//! up to the page cache write-back, in no particular order. Only the process crashing is covered.
mod buffer;
mod config;
mod error;
mod level;
mod listener;
mod position;
mod refresh;
#[cfg(feature = "tracing-bridge")]
pub mod tracing_bridge;
mod view;

pub use buffer::{log_file_name, BufferHandle};
pub use config::{
    ConfigSource, Configuration, FileConfigSource, CONFIG_FILE_NAME, MAX_CONFIG_FILE_BYTES,
    MAX_FILE_SIZE_KB, MIN_FILE_SIZE_KB,
};
pub use error::{ConfigError, OpenError};
pub use level::{Level, ParseLevelError};
pub use listener::ListenerFactory;
pub use refresh::{Options, REFRESH_PERIOD};

use std::io::{self, Seek, SeekFrom, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use arc_swap::ArcSwapOption;
use tracing::{debug, warn};

use refresh::Refresher;
use view::{Generation, SlotGuard};

/// A running self-diagnostics facility.
///
/// Owns the refresh worker. Dropping it (or calling [`shutdown`](Self::shutdown)) stops the
/// worker, waits for it, and releases the log file.
pub struct SelfDiagnostics {
    writer: LogWriter,
    worker: Option<Worker>,
}

/// Cheap, cloneable handle to write into the log of a [`SelfDiagnostics`].
///
/// This is what event subscriptions receive. It stays usable after the facility shut down, but
/// never yields a stream again.
#[derive(Clone)]
pub struct LogWriter {
    pub(crate) shared: Arc<Shared>,
}

/// A writable stream positioned at a reserved range of the log file.
///
/// At most [`available`](Self::available) bytes fit before the end of the file; writes stop there.
/// A writer that reserved more continues by seeking to offset 0. One stream per thread may exist at
/// a time; asking for another one while it is alive yields `None`.
///
/// The stream keeps its file mapped. When the log is reconfigured meanwhile, its bytes go to the
/// old file and the mapping is released once the stream is dropped.
pub struct LogStream {
    slot: SlotGuard,
    available: usize,
}

struct Worker {
    stop: mpsc::Sender<()>,
    thread: thread::JoinHandle<()>,
}

/// State shared between writers and the refresh worker.
pub(crate) struct Shared {
    current: ArcSwapOption<Generation>,
    generations: AtomicU64,
}

impl SelfDiagnostics {
    /// Start with the default refresh period of three seconds.
    pub fn new<S, F>(source: S, factory: F) -> Self
    where
        S: ConfigSource,
        F: ListenerFactory,
    {
        Self::with_options(source, factory, Options::default())
    }

    /// Poll `source` once right away, then on a background thread every `options.period`.
    pub fn with_options<S, F>(source: S, factory: F, options: Options) -> Self
    where
        S: ConfigSource,
        F: ListenerFactory,
    {
        let writer = LogWriter {
            shared: Arc::new(Shared::new()),
        };

        let mut refresher = Refresher::new(writer.clone(), source, factory);
        if panic::catch_unwind(AssertUnwindSafe(|| refresher.refresh())).is_err() {
            warn!("self-diagnostics configuration panicked, starting disabled");
            refresher.reset();
        }

        let (stop, signal) = mpsc::channel::<()>();
        let period = options.period;
        let spawned = thread::Builder::new()
            .name("diag-ring-refresh".into())
            .spawn(move || {
                // Any message, or the sender going away, ends the loop.
                while let Err(mpsc::RecvTimeoutError::Timeout) = signal.recv_timeout(period) {
                    refresher.refresh();
                }

                refresher.shutdown();
            });

        let worker = match spawned {
            Ok(thread) => Some(Worker { stop, thread }),
            Err(err) => {
                warn!(error = %err, "failed to start self-diagnostics refresh, configuration is fixed");
                None
            }
        };

        SelfDiagnostics { writer, worker }
    }

    pub fn writer(&self) -> LogWriter {
        self.writer.clone()
    }

    /// See [`LogWriter::try_get_log_stream`].
    pub fn try_get_log_stream(&self, byte_count: usize) -> Option<LogStream> {
        self.writer.try_get_log_stream(byte_count)
    }

    /// Stop the worker, wait for its current iteration, and release the log file.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(Worker { stop, thread }) = self.worker.take() {
            let _ = stop.send(());
            drop(stop);

            if thread.join().is_err() {
                warn!("self-diagnostics refresh worker panicked, treating it as stopped");
            }
        }

        // Also covers a worker that never started or died before cleaning up.
        self.writer.shared.uninstall();
    }
}

impl Drop for SelfDiagnostics {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LogWriter {
    /// Reserve `byte_count` bytes of the log and get a stream positioned at their start.
    ///
    /// `None` when no log file is installed (disabled, not yet configured, failed to open, or in
    /// the middle of a reconfiguration) and when this thread still holds another stream.
    pub fn try_get_log_stream(&self, byte_count: usize) -> Option<LogStream> {
        self.shared.try_get_log_stream(byte_count)
    }

    /// Whether a log file is currently installed.
    ///
    /// Lets a subscription skip formatting an event that would be dropped anyways.
    pub fn is_enabled(&self) -> bool {
        self.shared.current.load().is_some()
    }

    /// Path of the installed log file.
    pub fn path(&self) -> Option<PathBuf> {
        self.shared
            .current
            .load_full()
            .map(|generation| generation.handle().path().to_owned())
    }
}

impl Shared {
    fn new() -> Self {
        Shared {
            current: ArcSwapOption::empty(),
            generations: AtomicU64::new(0),
        }
    }

    fn try_get_log_stream(&self, byte_count: usize) -> Option<LogStream> {
        let current = self.current.load();
        let mut slot = (*current).as_ref()?.acquire()?;

        let reservation = slot
            .generation()
            .position()
            .reserve(byte_count, slot.capacity());
        slot.set_cursor(reservation.begin);

        Some(LogStream {
            slot,
            available: reservation.available,
        })
    }

    /// Map a new file and make it the current one, writing from offset 0.
    ///
    /// The new file comes with its own write position and an empty table of writers. Writers that
    /// loaded the previous file before the swap finish their reservation in it.
    pub(crate) fn open(&self, directory: &Path, capacity: usize) -> Result<PathBuf, error::OpenError> {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = BufferHandle::open(directory, capacity, generation)?;
        let path = handle.path().to_owned();

        if let Some(previous) = self.current.swap(Some(Arc::new(Generation::new(handle)))) {
            self.retire(&previous);
        }

        Ok(path)
    }

    /// Make logging a no-op until the next `open`.
    ///
    /// New writers see no file as soon as the slot is swapped. Writers still holding a stream keep
    /// the old mapping alive; their bytes are lost, and the mapping goes away with their stream.
    pub(crate) fn uninstall(&self) -> bool {
        match self.current.swap(None) {
            Some(previous) => {
                self.retire(&previous);
                true
            }
            None => false,
        }
    }

    fn retire(&self, previous: &Generation) {
        let handle = previous.handle();
        debug!(
            path = %handle.path().display(),
            generation = handle.generation(),
            writers = previous.writers(),
            "closed self-diagnostics log"
        );
    }
}

impl LogStream {
    /// Offset of the next byte written.
    pub fn position(&self) -> usize {
        self.slot.cursor()
    }

    /// Bytes between the reserved offset and the end of the file.
    pub fn available(&self) -> usize {
        self.available
    }

    pub fn capacity(&self) -> usize {
        self.slot.capacity()
    }

    /// The file this stream writes into.
    pub fn path(&self) -> &Path {
        self.slot.handle().path()
    }
}

impl Write for LogStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.slot.write(buf))
    }

    /// The bytes are in the shared mapping already.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for LogStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let capacity = self.slot.capacity() as u64;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => capacity.checked_add_signed(delta),
            SeekFrom::Current(delta) => (self.slot.cursor() as u64).checked_add_signed(delta),
        };

        match target.filter(|&offset| offset <= capacity) {
            Some(offset) => {
                self.slot.set_cursor(offset as usize);
                Ok(offset)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek outside of the log file",
            )),
        }
    }
}

impl core::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LogStream")
            .field("path", &self.path())
            .field("position", &self.position())
            .field("available", &self.available)
            .finish()
    }
}
