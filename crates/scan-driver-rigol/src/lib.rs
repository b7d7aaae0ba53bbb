//! Rigol waveform generator drivers for stage-scan.
//!
//! Provides the DG800 pulse-generator driver, implementing
//! [`scan_core::PulseGenerator`] over a raw SCPI socket or a serial link.

pub mod dg800;

pub use dg800::{Dg800Config, Dg800Driver, Dg800Transport};
