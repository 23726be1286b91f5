//! Use `tracing` events as the diagnostics subscription.
//!
//! Register a [`DiagnosticsLayer`] with the process' subscriber and hand its
//! [`factory`](DiagnosticsLayer::factory) to [`SelfDiagnostics`](crate::SelfDiagnostics). The layer
//! stays silent until the refresh worker subscribes it at the configured level, and each event it
//! accepts becomes one line of the ring:
//!
//! ```text
//! 2026-10-19T08:15:02.123456Z:WARN my_sdk::export: export failed attempt=3
//! ```
//!
//! ```no_run
//! use diag_ring::tracing_bridge::DiagnosticsLayer;
//! use diag_ring::{FileConfigSource, SelfDiagnostics};
//! use tracing_subscriber::layer::SubscriberExt;
//!
//! let layer = DiagnosticsLayer::with_target_prefix("my_sdk");
//! let factory = layer.factory();
//! tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layer))
//!     .expect("no other global subscriber");
//!
//! let _diagnostics = SelfDiagnostics::new(FileConfigSource::discover(), factory);
//! tracing::warn!(target: "my_sdk::export", attempt = 3, "export failed");
//! ```
use core::fmt::{self, Write as _};
use std::io::{Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{SecondsFormat, Utc};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::level::Level;
use crate::listener::ListenerFactory;
use crate::LogWriter;

/// Lines longer than this, including the newline, are cut.
pub const MAX_LINE_BYTES: usize = 4096;

/// No `tracing` level passes.
const SILENT: u8 = 0;

/// Writes accepted `tracing` events into the ring.
pub struct DiagnosticsLayer {
    state: Arc<BridgeState>,
}

/// Subscribes a [`DiagnosticsLayer`] at the configured level.
#[derive(Clone)]
pub struct TracingFactory {
    state: Arc<BridgeState>,
}

/// Keeps the layer enabled. Dropping it silences the layer again.
pub struct TracingSubscription {
    state: Arc<BridgeState>,
}

struct BridgeState {
    /// Most verbose `tracing` level accepted, as ranked by `rank`.
    threshold: AtomicU8,
    writer: ArcSwapOption<LogWriter>,
    target_prefix: Option<String>,
}

impl DiagnosticsLayer {
    pub fn new() -> Self {
        Self::with_state(None)
    }

    /// Only accept events whose target starts with `prefix`.
    pub fn with_target_prefix(prefix: impl Into<String>) -> Self {
        Self::with_state(Some(prefix.into()))
    }

    fn with_state(target_prefix: Option<String>) -> Self {
        DiagnosticsLayer {
            state: Arc::new(BridgeState {
                threshold: AtomicU8::new(SILENT),
                writer: ArcSwapOption::empty(),
                target_prefix,
            }),
        }
    }

    pub fn factory(&self) -> TracingFactory {
        TracingFactory {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for DiagnosticsLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Subscriber> Layer<S> for DiagnosticsLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if rank(meta.level()) > self.state.threshold.load(Ordering::Relaxed) {
            return;
        }

        if let Some(prefix) = &self.state.target_prefix {
            if !meta.target().starts_with(prefix.as_str()) {
                return;
            }
        }

        let writer = self.state.writer.load();
        let Some(writer) = (*writer).as_ref() else {
            return;
        };

        if !writer.is_enabled() {
            return;
        }

        write_line(writer, format_line(event).as_bytes());
    }
}

impl ListenerFactory for TracingFactory {
    type Listener = TracingSubscription;

    fn subscribe(&mut self, level: Level, writer: LogWriter) -> TracingSubscription {
        self.state.writer.store(Some(Arc::new(writer)));
        self.state.threshold.store(threshold(level), Ordering::Release);

        TracingSubscription {
            state: Arc::clone(&self.state),
        }
    }
}

impl Drop for TracingSubscription {
    fn drop(&mut self) {
        self.state.threshold.store(SILENT, Ordering::Release);
        self.state.writer.store(None);
    }
}

fn rank(level: &tracing::Level) -> u8 {
    match *level {
        tracing::Level::ERROR => 1,
        tracing::Level::WARN => 2,
        tracing::Level::INFO => 3,
        tracing::Level::DEBUG => 4,
        tracing::Level::TRACE => 5,
    }
}

fn threshold(level: Level) -> u8 {
    match level {
        Level::Critical | Level::Error => rank(&tracing::Level::ERROR),
        Level::Warning => rank(&tracing::Level::WARN),
        Level::Informational => rank(&tracing::Level::INFO),
        Level::Verbose | Level::LogAlways => rank(&tracing::Level::TRACE),
    }
}

/// `<timestamp>:<LEVEL> <target>: <message> <field>=<value>...\n`, on a single line.
fn format_line(event: &Event<'_>) -> String {
    let meta = event.metadata();
    let mut line = String::with_capacity(256);

    let _ = write!(
        line,
        "{}:{} {}: ",
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        meta.level(),
        meta.target(),
    );

    event.record(&mut FieldVisitor {
        line: &mut line,
        first: true,
    });

    let mut line = line.replace(['\n', '\r'], " ");
    if line.len() >= MAX_LINE_BYTES {
        let mut cut = MAX_LINE_BYTES - 1;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        line.truncate(cut);
    }

    line.push('\n');
    line
}

/// Write at the reserved offset, and whatever does not fit before the end of the file at offset 0.
fn write_line(writer: &LogWriter, line: &[u8]) {
    let Some(mut stream) = writer.try_get_log_stream(line.len()) else {
        return;
    };

    let (head, tail) = line.split_at(stream.available().min(line.len()));
    if stream.write_all(head).is_err() || tail.is_empty() {
        return;
    }

    if stream.seek(SeekFrom::Start(0)).is_ok() {
        let _ = stream.write_all(tail);
    }
}

struct FieldVisitor<'a> {
    line: &'a mut String,
    first: bool,
}

impl FieldVisitor<'_> {
    fn separate(&mut self) {
        if !self.first {
            self.line.push(' ');
        }
        self.first = false;
    }
}

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.separate();
        if field.name() == "message" {
            self.line.push_str(value);
        } else {
            let _ = write!(self.line, "{}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.separate();
        if field.name() == "message" {
            let _ = write!(self.line, "{:?}", value);
        } else {
            let _ = write!(self.line, "{}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shared;
    use tracing_subscriber::layer::SubscriberExt;

    fn installed(capacity: usize) -> (tempfile::TempDir, LogWriter) {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter {
            shared: Arc::new(Shared::new()),
        };
        writer.shared.open(dir.path(), capacity).unwrap();
        (dir, writer)
    }

    fn contents(writer: &LogWriter) -> String {
        let bytes = std::fs::read(writer.path().unwrap()).unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn writes_events_at_level() {
        let (_dir, writer) = installed(4096);
        let layer = DiagnosticsLayer::new();
        let mut factory = layer.factory();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("before subscription");

            let subscription = factory.subscribe(Level::Warning, writer.clone());
            tracing::warn!(target: "sdk::export", attempt = 3, "export failed");
            tracing::info!("too verbose");
            drop(subscription);

            tracing::error!("after subscription");
        });

        let text = contents(&writer);
        let lines: Vec<&str> = text.trim_end_matches('\0').lines().collect();
        assert_eq!(lines.len(), 1, "{lines:?}");
        assert!(
            lines[0].ends_with(":WARN sdk::export: export failed attempt=3"),
            "{}",
            lines[0]
        );
        assert!(lines[0].starts_with("20"), "{}", lines[0]);
    }

    #[test]
    fn filters_on_target_prefix() {
        let (_dir, writer) = installed(4096);
        let layer = DiagnosticsLayer::with_target_prefix("sdk");
        let mut factory = layer.factory();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let _subscription = factory.subscribe(Level::Verbose, writer.clone());
            tracing::trace!(target: "sdk::metrics", "kept");
            tracing::error!(target: "app", "dropped");
        });

        let text = contents(&writer);
        assert!(text.contains("TRACE sdk::metrics: kept\n"), "{text}");
        assert!(!text.contains("dropped"));
    }

    #[test]
    fn line_wraps_to_start_of_file() {
        let (_dir, writer) = installed(100);

        // Leave 10 bytes before the end of the file.
        drop(writer.try_get_log_stream(90));
        write_line(&writer, b"0123456789abcdefghij");

        let bytes = std::fs::read(writer.path().unwrap()).unwrap();
        assert_eq!(&bytes[90..], b"0123456789");
        assert_eq!(&bytes[..10], b"abcdefghij");
    }

    #[test]
    fn long_lines_are_cut() {
        let (_dir, writer) = installed(2 * MAX_LINE_BYTES);
        let layer = DiagnosticsLayer::new();
        let mut factory = layer.factory();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let _subscription = factory.subscribe(Level::Error, writer.clone());
            let huge = "é".repeat(MAX_LINE_BYTES);
            tracing::error!("{}\nsecond line", huge);
        });

        let text = contents(&writer);
        let line = text.split('\n').next().unwrap();
        assert!(line.len() < MAX_LINE_BYTES);
        assert!(line.len() > MAX_LINE_BYTES - 4);
        assert!(!line.contains("second line"));
    }

    #[test]
    fn level_mapping() {
        assert_eq!(threshold(Level::Critical), rank(&tracing::Level::ERROR));
        assert_eq!(threshold(Level::Informational), rank(&tracing::Level::INFO));
        assert_eq!(threshold(Level::LogAlways), rank(&tracing::Level::TRACE));
        assert!(rank(&tracing::Level::DEBUG) > threshold(Level::Warning));
    }
}
