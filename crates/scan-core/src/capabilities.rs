//! Device capability traits.
//!
//! The scan controller only knows these two traits. Concrete drivers live in
//! their own crates (`scan-driver-asi`, `scan-driver-rigol`) and the
//! simulation devices in `scan-driver-mock`.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Returns [`ScanResult`] so callers can tell transport from protocol failures
//!
//! # Example
//!
//! ```rust,ignore
//! async fn park<S: StageControl + ?Sized>(stage: &S, origin: Position) -> ScanResult<()> {
//!     stage.move_absolute(AxisTarget::xy(origin.x, origin.y)).await
//! }
//! ```

use crate::error::ScanResult;
use crate::types::{AxisTarget, Position, PulseSettings, Waveform};
use async_trait::async_trait;

/// Motorized XY(Z) stage.
#[async_trait]
pub trait StageControl: Send + Sync {
    /// Set X and Y axis speeds (mm/s).
    async fn set_speed(&self, x: f64, y: f64) -> ScanResult<()>;

    /// Absolute move of the commanded axes.
    ///
    /// Returns once the device accepted the command, not when motion ends.
    async fn move_absolute(&self, target: AxisTarget) -> ScanResult<()>;

    /// Current position of all three axes.
    async fn position(&self) -> ScanResult<Position>;

    /// Unconditional halt, preempting any motion in progress.
    async fn emergency_stop(&self) -> ScanResult<()>;
}

/// Pulse/waveform generator driving the acquisition trigger.
#[async_trait]
pub trait PulseGenerator: Send + Sync {
    /// Select the output waveform.
    async fn set_waveform(&self, waveform: Waveform) -> ScanResult<()>;

    /// Output frequency in Hz.
    async fn set_frequency(&self, hz: f64) -> ScanResult<()>;

    /// Peak-to-peak amplitude in volts.
    async fn set_amplitude(&self, volts: f64) -> ScanResult<()>;

    /// DC offset in volts.
    async fn set_offset(&self, volts: f64) -> ScanResult<()>;

    /// Enable or disable the output. Disabling must be safe to repeat.
    async fn set_output(&self, enabled: bool) -> ScanResult<()>;

    /// Pulse waveform with the given frequency, amplitude and offset.
    async fn configure_pulse(&self, settings: PulseSettings) -> ScanResult<()> {
        self.set_waveform(Waveform::Pulse).await?;
        self.set_frequency(settings.frequency_hz).await?;
        self.set_amplitude(settings.amplitude_v).await?;
        self.set_offset(settings.offset_v).await
    }

    /// Switch the output on.
    async fn enable_output(&self) -> ScanResult<()> {
        self.set_output(true).await
    }

    /// Switch the output off.
    async fn disable_output(&self) -> ScanResult<()> {
        self.set_output(false).await
    }
}
