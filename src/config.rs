//! Configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `config/stage_scan.toml` (or the file given with `--config`)
//! 3. Environment variables prefixed with `STAGE_SCAN_`, nested keys split
//!    on `__` (e.g. `STAGE_SCAN_STAGE__PORT=/dev/ttyUSB1`)
//!
//! # Example
//! ```no_run
//! use stage_scan::config::ScanConfig;
//!
//! let config = ScanConfig::load()?;
//! config.validate()?;
//! println!("Stage on {}", config.stage.port);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::controller::ControllerOptions;
use crate::params::ScanInput;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use scan_core::{ScanError, ScanResult};
use scan_driver_asi::Ms2000Config;
use scan_driver_rigol::{Dg800Config, Dg800Transport};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/stage_scan.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "STAGE_SCAN_";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Stage controller link
    pub stage: Ms2000Config,
    /// Trigger generator link and output levels
    pub generator: GeneratorConfig,
    /// Default scan fields offered by the shell
    pub scan: ScanDefaults,
    /// Polling and queue sizing
    pub timing: TimingConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stage: Ms2000Config::default(),
            generator: GeneratorConfig::default(),
            scan: ScanDefaults::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// Trigger generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Link to the instrument
    pub transport: Dg800Transport,
    /// Output channel (1 or 2)
    pub channel: u8,
    /// Connection timeout in ms (TCP only)
    pub connect_timeout_ms: u64,
    /// Pulse amplitude, volts
    pub amplitude_v: f64,
    /// Pulse offset, volts
    pub offset_v: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        let device = Dg800Config::default();
        Self {
            transport: device.transport,
            channel: device.channel,
            connect_timeout_ms: device.connect_timeout_ms,
            amplitude_v: 5.0,
            offset_v: 2.5,
        }
    }
}

impl GeneratorConfig {
    /// Driver-level view of this section.
    pub fn device_config(&self) -> Dg800Config {
        Dg800Config {
            transport: self.transport.clone(),
            channel: self.channel,
            connect_timeout_ms: self.connect_timeout_ms,
        }
    }
}

/// Default scan fields. Distances in mm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanDefaults {
    /// X axis speed, mm/s
    pub x_speed: f64,
    /// Y axis speed, mm/s
    pub y_speed: f64,
    /// Trigger pulse frequency, Hz
    pub trigger_frequency: f64,
    /// Y travel per tile, mm
    pub y_scan_distance: f64,
    /// Number of tiles
    pub tile_count: u32,
    /// X offset between tiles, mm
    pub x_tile_step: f64,
}

impl Default for ScanDefaults {
    fn default() -> Self {
        Self {
            x_speed: 0.1,
            y_speed: 0.2,
            trigger_frequency: 10.0,
            y_scan_distance: 8.0,
            tile_count: 10,
            x_tile_step: 0.7,
        }
    }
}

impl ScanDefaults {
    /// Raw shell fields pre-filled with these defaults.
    pub fn to_input(&self) -> ScanInput {
        ScanInput {
            x_speed: self.x_speed.to_string(),
            y_speed: self.y_speed.to_string(),
            trigger_frequency: self.trigger_frequency.to_string(),
            y_scan_distance: self.y_scan_distance.to_string(),
            tile_count: self.tile_count.to_string(),
            x_tile_step: self.x_tile_step.to_string(),
        }
    }
}

/// Timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Cancellation polling interval during a sweep, ms
    pub poll_interval_ms: u64,
    /// Request queue depth of each device actor
    pub queue_capacity: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            queue_capacity: 32,
        }
    }
}

impl ScanConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The layered figment behind [`load_from`](Self::load_from).
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(ScanConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ScanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.stage.settle_ms == 0 {
            return Err(ScanError::Configuration(
                "stage.settle_ms must be greater than 0".to_string(),
            ));
        }

        if self.timing.poll_interval_ms == 0 {
            return Err(ScanError::Configuration(
                "timing.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.timing.queue_capacity == 0 {
            return Err(ScanError::Configuration(
                "timing.queue_capacity must be greater than 0".to_string(),
            ));
        }

        if !(1..=2).contains(&self.generator.channel) {
            return Err(ScanError::Configuration(format!(
                "Invalid generator.channel {}. Must be 1 or 2",
                self.generator.channel
            )));
        }

        Ok(())
    }

    /// Controller options derived from this config.
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            poll_interval: Duration::from_millis(self.timing.poll_interval_ms),
            amplitude_v: self.generator.amplitude_v,
            offset_v: self.generator.offset_v,
        }
    }
}
