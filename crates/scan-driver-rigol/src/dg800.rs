//! Rigol DG800 series function/arbitrary waveform generator
//!
//! Only the pulse-output subset needed to trigger acquisition is implemented.
//! Every command is a fire-and-forget SCPI write; the instrument never answers
//! set-commands, so the driver sits on a command-only channel.
//!
//! - `:SOUR1:FUNC PULSE`
//! - `:SOUR1:FREQ 10`
//! - `:SOUR1:VOLT 5`
//! - `:SOUR1:VOLT:OFFS 2.5`
//! - `:OUTP1 ON` / `:OUTP1 OFF`
//!
//! The generator is reached either over LAN (raw SCPI socket, port 5555) or
//! over a serial link.

use async_trait::async_trait;
use scan_core::channel::{ChannelSettings, CommandOnlyChannel};
use scan_core::serial::open_serial_async;
use scan_core::{spawn_channel, ChannelHandle, PulseGenerator, ScanError, ScanResult, Waveform};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::instrument;

/// Default raw SCPI socket port on Rigol instruments
pub const DEFAULT_SCPI_PORT: u16 = 5555;

/// How to reach the generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Dg800Transport {
    /// Raw SCPI over TCP
    Tcp {
        /// Instrument host name or address
        host: String,
        /// SCPI socket port
        #[serde(default = "default_scpi_port")]
        port: u16,
    },
    /// SCPI over a serial link
    Serial {
        /// Serial device path
        port: String,
        /// Baud rate
        #[serde(default = "default_baud")]
        baud: u32,
    },
}

fn default_scpi_port() -> u16 {
    DEFAULT_SCPI_PORT
}

fn default_baud() -> u32 {
    9600
}

/// Configuration for the DG800 driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dg800Config {
    /// Link to the instrument
    pub transport: Dg800Transport,
    /// Output channel (1 or 2)
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Connection timeout in ms (TCP only)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_channel() -> u8 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for Dg800Config {
    fn default() -> Self {
        Self {
            transport: Dg800Transport::Tcp {
                host: "192.168.1.50".to_string(),
                port: DEFAULT_SCPI_PORT,
            },
            channel: default_channel(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn channel_settings() -> ChannelSettings {
    ChannelSettings::new("DG800").with_terminator("\n")
}

/// Driver for one output channel of a Rigol DG800.
#[derive(Debug, Clone)]
pub struct Dg800Driver {
    channel: ChannelHandle,
    source: u8,
}

impl Dg800Driver {
    /// Connect to the generator and start its channel actor.
    ///
    /// # Errors
    /// Returns a transport error if the socket or serial port cannot be
    /// opened, and a configuration error for an invalid output channel.
    pub async fn open(config: &Dg800Config, queue_capacity: usize) -> ScanResult<Self> {
        if !(1..=2).contains(&config.channel) {
            return Err(ScanError::Configuration(format!(
                "DG800 output channel must be 1-2, got {}",
                config.channel
            )));
        }

        let handle = match &config.transport {
            Dg800Transport::Tcp { host, port } => {
                let stream = timeout(
                    Duration::from_millis(config.connect_timeout_ms),
                    TcpStream::connect((host.as_str(), *port)),
                )
                .await
                .map_err(|_| {
                    ScanError::transport(
                        "DG800",
                        format!("connection timeout to {}:{}", host, port),
                    )
                })?
                .map_err(|e| {
                    ScanError::transport(
                        "DG800",
                        format!("failed to connect to {}:{}: {}", host, port, e),
                    )
                })?;

                // Disable Nagle's algorithm for low latency
                stream.set_nodelay(true)?;
                tracing::info!("Connected to DG800 at {}:{}", host, port);

                let channel = CommandOnlyChannel::new(stream, channel_settings());
                let (handle, _task) = spawn_channel(channel, queue_capacity);
                handle
            }
            Dg800Transport::Serial { port, baud } => {
                let serial = open_serial_async(port, *baud, "DG800").await?;
                tracing::info!(port = %port, baud = *baud, "DG800 serial link opened");

                let channel = CommandOnlyChannel::new(serial, channel_settings());
                let (handle, _task) = spawn_channel(channel, queue_capacity);
                handle
            }
        };

        Ok(Self::with_channel(handle, config.channel))
    }

    /// Driver over an existing channel actor.
    pub fn with_channel(channel: ChannelHandle, source: u8) -> Self {
        Self { channel, source }
    }

    async fn write(&self, command: String) -> ScanResult<()> {
        self.channel.send(command).await
    }
}

fn waveform_keyword(waveform: Waveform) -> &'static str {
    match waveform {
        Waveform::Pulse => "PULSE",
    }
}

#[async_trait]
impl PulseGenerator for Dg800Driver {
    #[instrument(skip(self), fields(source = self.source), err)]
    async fn set_waveform(&self, waveform: Waveform) -> ScanResult<()> {
        self.write(format!(":SOUR{}:FUNC {}", self.source, waveform_keyword(waveform)))
            .await
    }

    #[instrument(skip(self), fields(source = self.source), err)]
    async fn set_frequency(&self, hz: f64) -> ScanResult<()> {
        self.write(format!(":SOUR{}:FREQ {}", self.source, hz)).await
    }

    #[instrument(skip(self), fields(source = self.source), err)]
    async fn set_amplitude(&self, volts: f64) -> ScanResult<()> {
        self.write(format!(":SOUR{}:VOLT {}", self.source, volts)).await
    }

    #[instrument(skip(self), fields(source = self.source), err)]
    async fn set_offset(&self, volts: f64) -> ScanResult<()> {
        self.write(format!(":SOUR{}:VOLT:OFFS {}", self.source, volts))
            .await
    }

    #[instrument(skip(self), fields(source = self.source), err)]
    async fn set_output(&self, enabled: bool) -> ScanResult<()> {
        let state = if enabled { "ON" } else { "OFF" };
        self.write(format!(":OUTP{} {}", self.source, state)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_core::PulseSettings;
    use scan_driver_mock::MockChannel;

    #[tokio::test]
    async fn pulse_setup_matches_scpi_sequence() {
        let channel = MockChannel::new("DG800");
        let log = channel.log();
        let (handle, _task) = spawn_channel(channel, 8);
        let generator = Dg800Driver::with_channel(handle, 1);

        generator
            .configure_pulse(PulseSettings {
                frequency_hz: 10.0,
                amplitude_v: 5.0,
                offset_v: 2.5,
            })
            .await
            .unwrap();
        generator.enable_output().await.unwrap();
        generator.disable_output().await.unwrap();

        assert_eq!(
            log.commands(),
            vec![
                ":SOUR1:FUNC PULSE",
                ":SOUR1:FREQ 10",
                ":SOUR1:VOLT 5",
                ":SOUR1:VOLT:OFFS 2.5",
                ":OUTP1 ON",
                ":OUTP1 OFF",
            ]
        );
    }

    #[tokio::test]
    async fn repeated_disable_is_not_an_error() {
        let channel = MockChannel::new("DG800");
        let log = channel.log();
        let (handle, _task) = spawn_channel(channel, 8);
        let generator = Dg800Driver::with_channel(handle, 2);

        generator.disable_output().await.unwrap();
        generator.disable_output().await.unwrap();

        assert_eq!(log.commands(), vec![":OUTP2 OFF", ":OUTP2 OFF"]);
    }

    #[tokio::test]
    async fn invalid_channel_is_rejected_before_connecting() {
        let config = Dg800Config {
            channel: 3,
            ..Default::default()
        };
        assert!(matches!(
            Dg800Driver::open(&config, 8).await,
            Err(ScanError::Configuration(_))
        ));
    }
}
