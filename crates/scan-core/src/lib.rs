//! `scan-core`
//!
//! Shared building blocks for stage-scan: the error type, position and state
//! types, the device capability traits, and the command channels that carry
//! ASCII commands to a single device.
//!
//! ## Layers
//!
//! - **CommandChannel**: line-oriented link to one device (serial, TCP, test doubles)
//! - **Channel actor**: single owner of a channel; drivers hold a [`ChannelHandle`]
//! - **Capabilities**: [`StageControl`] and [`PulseGenerator`], implemented by drivers

pub mod actor;
pub mod capabilities;
pub mod channel;
pub mod error;
pub mod serial;
pub mod types;

pub use actor::{spawn_channel, ChannelHandle};
pub use capabilities::{PulseGenerator, StageControl};
pub use channel::{ChannelSettings, CommandChannel, CommandOnlyChannel, LineChannel};
pub use error::{ScanError, ScanResult};
pub use types::{AxisTarget, Position, PulseSettings, ScanState, Waveform};
