//! Tracing setup for the `stage-scan` binary.
//!
//! Log output goes to stderr so it does not interleave with the shell's
//! prompts and event lines on stdout. `RUST_LOG` overrides the configured
//! level.

use crate::config::ScanConfig;
use scan_core::{ScanError, ScanResult};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Tracing options
#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Include module targets in each line
    pub with_target: bool,
    /// Enable ANSI colors
    pub with_ansi: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            with_target: true,
            with_ansi: true,
        }
    }
}

impl LogOptions {
    /// Options from the loaded configuration.
    pub fn from_config(config: &ScanConfig) -> ScanResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.log_level)?,
            ..Default::default()
        })
    }
}

/// Initialize tracing from the loaded configuration.
pub fn init_from_config(config: &ScanConfig) -> ScanResult<()> {
    init(LogOptions::from_config(config)?)
}

/// Initialize tracing.
///
/// Idempotent: a second call leaves the existing subscriber in place.
pub fn init(options: LogOptions) -> ScanResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.level.as_str().to_lowercase()));

    let fmt_layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(options.with_target)
        .with_ansi(options.with_ansi)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .or_else(|e| {
            // Already set, e.g. by a test harness
            if e.to_string().contains("global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(ScanError::Configuration(format!(
                    "Failed to initialize tracing: {}",
                    e
                )))
            }
        })
}

/// Parse a log level name, case-insensitively.
pub fn parse_log_level(level: &str) -> ScanResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(ScanError::Configuration(format!(
            "Invalid log level '{}'",
            other
        ))),
    }
}
