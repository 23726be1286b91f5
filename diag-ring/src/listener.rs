//! The event subscription fed by the ring.
use crate::level::Level;
use crate::LogWriter;

/// Creates the subscription that decides which events are written, and at which verbosity.
///
/// The refresh worker calls `subscribe` with the initial level and again whenever the configured
/// level changes, dropping the previous listener first. The listener is expected to call
/// [`LogWriter::try_get_log_stream`] for every line it emits and to stop emitting once dropped.
pub trait ListenerFactory: Send + 'static {
    type Listener: Send + 'static;

    fn subscribe(&mut self, level: Level, writer: LogWriter) -> Self::Listener;
}

impl<F, L> ListenerFactory for F
where
    F: FnMut(Level, LogWriter) -> L + Send + 'static,
    L: Send + 'static,
{
    type Listener = L;

    fn subscribe(&mut self, level: Level, writer: LogWriter) -> L {
        self(level, writer)
    }
}
