//! ASI MS-2000 XYZ Stage Controller Driver
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232
//! - Baud: 9600, 8N1, no flow control
//! - Commands terminated by carriage return
//! - Replies: `:A` (acknowledged, optionally followed by values) or
//!   `:N-<code>` (rejected)
//!
//! | Operation        | Command               | Reply             |
//! |------------------|-----------------------|-------------------|
//! | Set speed        | `S X=0.1 Y=0.2`       | `:A`              |
//! | Absolute move    | `M X=1000 Y=80100`    | `:A`              |
//! | Query position   | `W X Y Z`             | `:A 1000 100 0`   |
//! | Halt             | `ESC`                 | none read         |
//!
//! # Usage
//!
//! ```rust,ignore
//! use scan_driver_asi::{Ms2000Config, Ms2000Driver};
//!
//! let config = Ms2000Config { port: "/dev/ttyUSB0".into(), ..Default::default() };
//! let stage = Ms2000Driver::open(&config, 32).await?;
//! let origin = stage.position().await?;
//! ```

use async_trait::async_trait;
use scan_core::channel::{ChannelSettings, LineChannel};
use scan_core::serial::open_serial_async;
use scan_core::{
    spawn_channel, AxisTarget, ChannelHandle, Position, ScanError, ScanResult, StageControl,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

/// Unconditional halt byte.
const HALT: &str = "\x1B";

/// Configuration for the MS-2000 driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ms2000Config {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM8")
    pub port: String,
    /// Baud rate (default: 9600)
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Delay between a command and reading its reply, in ms (default: 50)
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Reply timeout in ms (default: 1000)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Stale-input drain window in ms (default: 20)
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
}

fn default_baud() -> u32 {
    9600
}

fn default_settle_ms() -> u64 {
    50
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_drain_ms() -> u64 {
    20
}

impl Default for Ms2000Config {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud: default_baud(),
            settle_ms: default_settle_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            drain_ms: default_drain_ms(),
        }
    }
}

impl Ms2000Config {
    /// Channel framing and timing derived from this config.
    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings::new("MS-2000")
            .with_terminator("\r")
            .with_settle(Duration::from_millis(self.settle_ms))
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms))
            .with_drain_ms(self.drain_ms)
    }
}

/// Driver for an ASI MS-2000 style XYZ stage.
///
/// All traffic goes through a [`ChannelHandle`], so the serial port has a
/// single owner no matter how many tasks hold the driver.
#[derive(Debug, Clone)]
pub struct Ms2000Driver {
    channel: ChannelHandle,
}

impl Ms2000Driver {
    /// Open the serial port, start its channel actor, and return the driver.
    ///
    /// # Errors
    /// Returns a transport error if the serial port cannot be opened.
    pub async fn open(config: &Ms2000Config, queue_capacity: usize) -> ScanResult<Self> {
        let port = open_serial_async(&config.port, config.baud, "MS-2000").await?;
        let channel = LineChannel::new(port, config.channel_settings());
        let (handle, _task) = spawn_channel(channel, queue_capacity);
        tracing::info!(port = %config.port, baud = config.baud, "MS-2000 stage opened");
        Ok(Self::with_channel(handle))
    }

    /// Driver over an existing channel actor.
    pub fn with_channel(channel: ChannelHandle) -> Self {
        Self { channel }
    }

    /// Send a command and check the acknowledgement.
    async fn command(&self, command: &str) -> ScanResult<String> {
        let reply = self.channel.query(command).await?;
        check_ack(self.channel.device(), command, &reply)?;
        Ok(reply)
    }
}

/// Reject `:N-<code>` replies.
fn check_ack(device: &str, command: &str, reply: &str) -> ScanResult<()> {
    if reply.starts_with(":N") {
        return Err(ScanError::protocol(
            device,
            format!("command '{}' rejected with '{}'", command, reply),
        ));
    }
    Ok(())
}

/// Format an absolute move for the commanded axes.
pub fn move_command(target: &AxisTarget) -> String {
    let mut cmd = String::from("M");
    for (axis, value) in target.axes() {
        cmd.push_str(&format!(" {}={}", axis, value));
    }
    cmd
}

/// Parse a `W X Y Z` reply (`:A x y z`) into a [`Position`].
///
/// The acknowledgement token is optional; exactly three numeric fields must
/// follow it.
pub fn parse_position(device: &str, reply: &str) -> ScanResult<Position> {
    let mut tokens: Vec<&str> = reply.split_whitespace().collect();
    if tokens.first().is_some_and(|t| t.starts_with(':')) {
        let ack = tokens.remove(0);
        if ack != ":A" {
            return Err(ScanError::protocol(
                device,
                format!("position query rejected with '{}'", reply),
            ));
        }
    }

    let values: Vec<f64> = tokens
        .iter()
        .map(|t| t.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| {
            ScanError::protocol(device, format!("position reply '{}' is not numeric", reply))
        })?;

    match values.as_slice() {
        [x, y, z] => Ok(Position::new(*x, *y, *z)),
        _ => Err(ScanError::protocol(
            device,
            format!(
                "position reply '{}' has {} values, expected 3",
                reply,
                values.len()
            ),
        )),
    }
}

#[async_trait]
impl StageControl for Ms2000Driver {
    #[instrument(skip(self), err)]
    async fn set_speed(&self, x: f64, y: f64) -> ScanResult<()> {
        self.command(&format!("S X={} Y={}", x, y)).await.map(|_| ())
    }

    #[instrument(skip(self), err)]
    async fn move_absolute(&self, target: AxisTarget) -> ScanResult<()> {
        if target.is_empty() {
            return Ok(());
        }
        self.command(&move_command(&target)).await.map(|_| ())
    }

    #[instrument(skip(self), err)]
    async fn position(&self) -> ScanResult<Position> {
        let reply = self.channel.query("W X Y Z").await?;
        parse_position(self.channel.device(), &reply)
    }

    #[instrument(skip(self), err)]
    async fn emergency_stop(&self) -> ScanResult<()> {
        self.channel.send(HALT).await
    }
}
