//! `stage-scan`: tiled serpentine stage scanning.
//!
//! The [`ScanController`] drives an XY(Z) stage and a pulse generator through
//! a serpentine pattern of tiles, pausing between tiles for the operator. The
//! devices are reached through the capability traits in `scan-core`; concrete
//! drivers live in `scan-driver-asi` (stage) and `scan-driver-rigol`
//! (generator), simulations in `scan-driver-mock`.
//!
//! ## Modules
//!
//! - [`controller`]: the scan state machine and its worker task
//! - [`params`]: raw input parsing and tile geometry
//! - [`motion`]: interruptible wait for stage motion
//! - [`signal`]: the between-tile proceed signal
//! - [`events`]: log/progress/state events for the front end
//! - [`config`]: layered configuration (figment)
//! - [`logging`]: tracing subscriber setup
//! - [`shell`]: the interactive terminal front end

pub mod config;
pub mod controller;
pub mod events;
pub mod logging;
pub mod motion;
pub mod params;
pub mod shell;
pub mod signal;

pub use controller::{ControllerOptions, ScanController};
pub use events::{LogLevel, ScanEvent};
pub use motion::{MotionWait, TimedMotionWait, WaitOutcome};
pub use params::{ScanInput, ScanParameters, DEVICE_UNITS_PER_MM};
pub use signal::ProceedSignal;
