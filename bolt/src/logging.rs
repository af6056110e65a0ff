//! Thin wrapper around the slog ecosystem. Components take an
//! `slog::Logger` and fall back to a discarding root when the user does
//! not supply one.

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// A logger that drops everything. Default for `Config::log`.
#[inline]
pub fn null() -> Logger {
    Logger::root(Discard, o!())
}

/// A stderr terminal logger for users without their own slog pipeline.
pub fn terminal(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.build().expect("Error building terminal logger")
}
