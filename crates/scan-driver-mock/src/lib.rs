//! Mock hardware for stage-scan.
//!
//! - [`MockStage`]: instant-motion XYZ stage with call recording
//! - [`MockGenerator`]: single-channel pulse generator with call recording
//! - [`MockChannel`]: scripted command channel for driver tests
//!
//! All three support scripted failures so the controller's error paths can
//! be exercised without hardware. The binary uses the first two for its
//! `--simulate` mode.

mod common;
pub mod mock_channel;
pub mod mock_generator;
pub mod mock_stage;

pub use mock_channel::{ChannelLog, MockChannel};
pub use mock_generator::{GeneratorCall, GeneratorOp, GeneratorSnapshot, MockGenerator};
pub use mock_stage::{MockStage, StageCall, StageOp};
