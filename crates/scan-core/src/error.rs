//! Error types shared by the scan controller and its device drivers.
//!
//! `ScanError` is the one error type that crosses crate boundaries. It sorts
//! failures into the categories the controller reacts to differently:
//!
//! - **`Input`**: a user-supplied text field did not parse. The operation is
//!   refused and nothing is sent to hardware.
//! - **`Transport`**: a command/response exchange with a device failed
//!   (write error, read timeout, closed link). Fatal to the current scan step,
//!   never to the process.
//! - **`Protocol`**: the device answered, but not in the expected shape
//!   (unparsable position reply, negative acknowledgement).
//! - **`InvalidState`**: the operation is not allowed in the current
//!   [`ScanState`](crate::ScanState) (second `start`, manual move mid-scan).
//! - **`Busy`**: a manual move holds the stage; scans and other manual moves
//!   wait for it.
//! - **`ChannelClosed`**: the actor that owns a device channel has exited.
//!
//! By using `#[from]` for `std::io::Error`, low-level I/O failures convert with
//! the `?` operator; channel implementations usually map them to `Transport`
//! to keep the device name attached.

use thiserror::Error;

/// Convenience alias for results using [`ScanError`].
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Primary error type for stage-scan.
#[derive(Error, Debug)]
pub enum ScanError {
    /// A user-supplied field could not be parsed as the expected number type.
    ///
    /// **Recovery Strategy**: report to the user, leave state unchanged.
    #[error("Invalid input for {field}: '{value}'")]
    Input {
        /// Name of the offending field
        field: &'static str,
        /// Raw text as entered
        value: String,
    },

    /// Command/response exchange with a device failed.
    ///
    /// **Error Type**: usually transient (timeout, cable), occasionally
    /// permanent (port vanished).
    ///
    /// **Recovery Strategy**: abort the current scan; during teardown log and
    /// continue with the remaining cleanup steps.
    #[error("Transport error on {device}: {message}")]
    Transport {
        /// Device the exchange was addressed to
        device: String,
        /// Human-readable failure description
        message: String,
    },

    /// Device replied with something that does not match the protocol.
    #[error("Protocol error on {device}: {message}")]
    Protocol {
        /// Device that produced the reply
        device: String,
        /// What was wrong with the reply
        message: String,
    },

    /// Operation rejected in the current controller state.
    #[error("Cannot {operation}: scan is {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// State at the time of the request
        state: crate::ScanState,
    },

    /// A manual move is still in flight.
    ///
    /// **Recovery Strategy**: retry once the move has finished.
    #[error("Cannot {operation}: a manual move is in progress")]
    Busy {
        /// Rejected operation
        operation: &'static str,
    },

    /// Return-to-start requested before any scan captured an origin.
    #[error("No initial position recorded")]
    NoOrigin,

    /// Configuration values failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The actor owning a device channel is gone.
    #[error("Device channel closed: {0}")]
    ChannelClosed(String),
}

impl ScanError {
    /// Build a [`ScanError::Transport`] for `device`.
    pub fn transport(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Build a [`ScanError::Protocol`] for `device`.
    pub fn protocol(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Short category label, used as a log prefix by the controller.
    pub fn category(&self) -> &'static str {
        match self {
            ScanError::Input { .. } => "InputError",
            ScanError::Transport { .. } | ScanError::Io(_) | ScanError::ChannelClosed(_) => {
                "TransportError"
            }
            ScanError::Protocol { .. } => "ProtocolError",
            ScanError::InvalidState { .. } | ScanError::Busy { .. } | ScanError::NoOrigin => {
                "StateError"
            }
            ScanError::Configuration(_) => "ConfigError",
        }
    }
}
