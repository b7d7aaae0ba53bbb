//! Command channels: the point-to-point link to a single device.
//!
//! A [`CommandChannel`] speaks a line-oriented ASCII protocol:
//!
//! 1. discard any stale buffered input left by a previous exchange
//! 2. write the command followed by the channel terminator
//! 3. wait a short, fixed settle interval
//! 4. read one line and trim surrounding whitespace
//!
//! [`LineChannel`] implements the full request/response exchange over any
//! [`SerialPortIO`]. [`CommandOnlyChannel`] never reads; it serves devices
//! such as the trigger generator that do not answer set-commands.
//!
//! Channels are `&mut self` objects with no internal locking. They are meant
//! to be moved into an actor with [`spawn_channel`](crate::actor::spawn_channel)
//! so that every device has exactly one owner.

use crate::error::{ScanError, ScanResult};
use crate::serial::{drain_serial_buffer, SerialPortIO};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Timing and framing for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Device name used in logs and errors
    pub device: String,
    /// Appended to every command
    pub terminator: String,
    /// Delay between writing a query and reading its reply
    pub settle: Duration,
    /// Upper bound for reading one reply line
    pub read_timeout: Duration,
    /// Window used to drain stale input before a query
    pub drain_ms: u64,
}

impl ChannelSettings {
    /// Carriage-return terminated settings with the given device name.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            terminator: "\r".to_string(),
            settle: Duration::from_millis(50),
            read_timeout: Duration::from_secs(1),
            drain_ms: 20,
        }
    }

    /// Line terminator appended to every command.
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Delay between a write and reading the reply.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Give up on a reply after this long.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Time spent discarding stale input before each command.
    pub fn with_drain_ms(mut self, drain_ms: u64) -> Self {
        self.drain_ms = drain_ms;
        self
    }
}

/// Point-to-point link to one device.
#[async_trait]
pub trait CommandChannel: Send + 'static {
    /// Device name for logs and errors.
    fn device(&self) -> &str;

    /// Interval to wait between writing a query and reading its reply.
    fn settle(&self) -> Duration;

    /// Throw away buffered input. Returns the number of bytes discarded.
    async fn discard_input(&mut self) -> ScanResult<usize>;

    /// Write one command, terminator included, without reading anything.
    async fn write_command(&mut self, command: &str) -> ScanResult<()>;

    /// Read one reply line, trimmed.
    async fn read_line(&mut self) -> ScanResult<String>;

    /// Full request/response exchange.
    async fn query(&mut self, command: &str) -> ScanResult<String> {
        let stale = self.discard_input().await?;
        if stale > 0 {
            debug!(device = %self.device(), bytes = stale, "Discarded stale input");
        }
        self.write_command(command).await?;
        tokio::time::sleep(self.settle()).await;
        let reply = self.read_line().await?;
        debug!(device = %self.device(), command = %command.escape_debug(), reply = %reply, "Query");
        Ok(reply)
    }
}

/// Request/response channel over a serial-like stream.
pub struct LineChannel<P: SerialPortIO> {
    port: BufReader<P>,
    settings: ChannelSettings,
}

impl<P: SerialPortIO + 'static> LineChannel<P> {
    /// Wrap a bidirectional port.
    pub fn new(port: P, settings: ChannelSettings) -> Self {
        Self {
            port: BufReader::new(port),
            settings,
        }
    }

    fn transport_error(&self, message: impl Into<String>) -> ScanError {
        ScanError::transport(&self.settings.device, message)
    }
}

#[async_trait]
impl<P: SerialPortIO + 'static> CommandChannel for LineChannel<P> {
    fn device(&self) -> &str {
        &self.settings.device
    }

    fn settle(&self) -> Duration {
        self.settings.settle
    }

    async fn discard_input(&mut self) -> ScanResult<usize> {
        // BufReader may already hold bytes from an earlier read
        let buffered = self.port.buffer().len();
        self.port.consume(buffered);
        let drained = drain_serial_buffer(self.port.get_mut(), self.settings.drain_ms).await;
        Ok(buffered + drained)
    }

    async fn write_command(&mut self, command: &str) -> ScanResult<()> {
        let framed = format!("{}{}", command, self.settings.terminator);
        let writer = self.port.get_mut();
        writer
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| {
                ScanError::transport(&self.settings.device, format!("write failed: {}", e))
            })?;
        writer
            .flush()
            .await
            .map_err(|e| {
                ScanError::transport(&self.settings.device, format!("flush failed: {}", e))
            })?;
        Ok(())
    }

    async fn read_line(&mut self) -> ScanResult<String> {
        let mut response = String::new();
        let result =
            tokio::time::timeout(self.settings.read_timeout, self.port.read_line(&mut response))
                .await;

        match result {
            Ok(Ok(0)) => Err(self.transport_error("connection closed by device")),
            Ok(Ok(_)) => Ok(response.trim().to_string()),
            Ok(Err(e)) => Err(self.transport_error(format!("read failed: {}", e))),
            Err(_) => Err(self.transport_error(format!(
                "no reply within {} ms",
                self.settings.read_timeout.as_millis()
            ))),
        }
    }
}

/// Write-only channel for devices that never answer set-commands.
pub struct CommandOnlyChannel<W> {
    writer: W,
    settings: ChannelSettings,
}

impl<W: AsyncWrite + Unpin + Send + 'static> CommandOnlyChannel<W> {
    /// Wrap a write-only link.
    pub fn new(writer: W, settings: ChannelSettings) -> Self {
        Self { writer, settings }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> CommandChannel for CommandOnlyChannel<W> {
    fn device(&self) -> &str {
        &self.settings.device
    }

    fn settle(&self) -> Duration {
        self.settings.settle
    }

    async fn discard_input(&mut self) -> ScanResult<usize> {
        Ok(0)
    }

    async fn write_command(&mut self, command: &str) -> ScanResult<()> {
        let framed = format!("{}{}", command, self.settings.terminator);
        self.writer
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| {
                ScanError::transport(&self.settings.device, format!("write failed: {}", e))
            })?;
        self.writer
            .flush()
            .await
            .map_err(|e| {
                ScanError::transport(&self.settings.device, format!("flush failed: {}", e))
            })?;
        Ok(())
    }

    async fn read_line(&mut self) -> ScanResult<String> {
        Err(ScanError::protocol(
            &self.settings.device,
            "command-only channel cannot read replies",
        ))
    }
}
