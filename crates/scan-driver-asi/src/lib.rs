//! ASI stage drivers for stage-scan.
//!
//! This crate provides the MS-2000 XYZ stage controller driver (RS-232),
//! implementing [`scan_core::StageControl`].
//!
//! ```toml
//! [dependencies]
//! scan-driver-asi = { path = "../scan-driver-asi" }
//! ```

pub mod ms2000;

pub use ms2000::{Ms2000Config, Ms2000Driver};
