//! Plain data types shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage position in device units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X axis
    pub x: f64,
    /// Y axis
    pub y: f64,
    /// Z axis
    pub z: f64,
}

impl Position {
    /// Position from three axis values.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X={} Y={} Z={}", self.x, self.y, self.z)
    }
}

/// Target of an absolute move. Axes left as `None` are not commanded.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisTarget {
    /// X axis target
    pub x: Option<f64>,
    /// Y axis target
    pub y: Option<f64>,
    /// Z axis target
    pub z: Option<f64>,
}

impl AxisTarget {
    /// Move X only.
    pub fn x(x: f64) -> Self {
        Self {
            x: Some(x),
            ..Default::default()
        }
    }

    /// Move Y only.
    pub fn y(y: f64) -> Self {
        Self {
            y: Some(y),
            ..Default::default()
        }
    }

    /// Move X and Y, leaving Z alone.
    pub fn xy(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: None,
        }
    }

    /// Move all three axes.
    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// True if no axis is commanded.
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }

    /// Commanded axes as `(label, value)` pairs in X, Y, Z order.
    pub fn axes(&self) -> impl Iterator<Item = (char, f64)> {
        [('X', self.x), ('Y', self.y), ('Z', self.z)]
            .into_iter()
            .filter_map(|(label, value)| value.map(|v| (label, v)))
    }
}

/// Generator output waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    /// Rectangular pulse train
    Pulse,
}

/// Pulse output settings applied before each Y pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseSettings {
    /// Pulse repetition rate, Hz
    pub frequency_hz: f64,
    /// Amplitude, volts
    pub amplitude_v: f64,
    /// Offset, volts
    pub offset_v: f64,
}

/// Scan controller state.
///
/// ```text
/// ┌──────┐  start()  ┌─────────┐  tile done  ┌──────────────┐
/// │ Idle │──────────▶│ Running │────────────▶│ AwaitingNext │
/// └──────┘           └─────────┘◀────────────└──────────────┘
///    ▲                │    │        next()          │
///    │    last tile   │    │ stop()                 │ stop()
///    │  ┌───────────┐ │    ▼                        ▼
///    └──│ Completed │◀┘  ┌──────────┐
///    ▲  └───────────┘    │ Stopping │
///    └───────────────────└──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    /// No scan in flight
    #[default]
    Idle,
    /// Worker is moving the stage or waiting out a Y pass
    Running,
    /// Worker is paused between tiles waiting for next() or stop()
    AwaitingNext,
    /// Stop requested, teardown in progress
    Stopping,
    /// Last tile finished, returning to origin
    Completed,
}

impl ScanState {
    /// True while a scan worker owns the devices.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ScanState::Running
                | ScanState::AwaitingNext
                | ScanState::Stopping
                | ScanState::Completed
        )
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => write!(f, "idle"),
            ScanState::Running => write!(f, "running"),
            ScanState::AwaitingNext => write!(f, "awaiting-next"),
            ScanState::Stopping => write!(f, "stopping"),
            ScanState::Completed => write!(f, "completed"),
        }
    }
}
