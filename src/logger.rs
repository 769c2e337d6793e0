//! Log surface: a pluggable sink function plus a tracing-backed default.
//!
//! Every component takes a [`LogFunction`] at construction and reports
//! through it; nothing logs behind the caller's back. [`tracing_sink`] is the
//! default sink and forwards each message to the matching `tracing` macro, so
//! embedders that already run a `tracing` subscriber get pubwire output for
//! free. Embedders with their own logging infrastructure supply a closure.

use std::fmt;
use std::sync::Arc;

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// High-volume narration of individual buffers and startup steps.
    DebugVerbose,
    /// Lifecycle events: sessions appearing and disappearing, shutdown.
    Debug,
    /// Notable but expected events: publisher created, subscriber connected.
    Info,
    /// Something off but survivable.
    Warning,
    /// An operation failed; the affected component stops.
    Error,
    /// The process is in a state it cannot recover from.
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::DebugVerbose => "DEBUG_VERBOSE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// Shared log sink. Cheap to clone, safe to call from any thread.
pub type LogFunction = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Default sink: forwards to `tracing` at the closest matching level.
pub fn tracing_sink() -> LogFunction {
    Arc::new(|level, message| match level {
        LogLevel::DebugVerbose => tracing::trace!("{}", message),
        LogLevel::Debug => tracing::debug!("{}", message),
        LogLevel::Info => tracing::info!("{}", message),
        LogLevel::Warning => tracing::warn!("{}", message),
        LogLevel::Error | LogLevel::Fatal => tracing::error!("{}", message),
    })
}

/// Sink that discards everything. Useful in tests.
pub fn noop_sink() -> LogFunction {
    Arc::new(|_, _| {})
}
