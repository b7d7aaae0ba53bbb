//! Events emitted by the scan controller.
//!
//! The controller never renders anything itself. It publishes [`ScanEvent`]s
//! on a broadcast channel and mirrors every log line to `tracing`.

use scan_core::ScanState;
use std::fmt;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Normal progress
    Info,
    /// Stop requests and refused commands
    Warn,
    /// Failed operations
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Controller → presentation events.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Human-readable status line
    Log {
        /// Severity
        level: LogLevel,
        /// Message text
        text: String,
    },
    /// Tiles finished out of the total
    Progress {
        /// Tiles done, 0 once the stage is back at the origin
        current: u32,
        /// Tiles in the run
        total: u32,
    },
    /// Controller state transition
    State(ScanState),
}
