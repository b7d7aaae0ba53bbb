//! Single-owner device access.
//!
//! Each physical device gets one actor task that owns its [`CommandChannel`].
//! Everyone else talks to the device through a cloneable [`ChannelHandle`]:
//!
//! ```text
//! Scan worker ──┐
//!               ├──> mpsc ──> channel actor ──> CommandChannel ──> device
//! Control ctx ──┘                  │
//!       ▲                          │
//!       └──────── oneshot ◀────────┘
//! ```
//!
//! Requests are processed strictly in arrival order, so at most one command is
//! ever in flight per device. When the last handle is dropped the actor exits.

use crate::channel::CommandChannel;
use crate::error::{ScanError, ScanResult};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Requests accepted by a channel actor.
#[derive(Debug)]
pub enum ChannelRequest {
    /// Write a command, do not read a reply.
    Send {
        /// Command text without terminator
        command: String,
        /// Completion of the write
        response: oneshot::Sender<ScanResult<()>>,
    },
    /// Full request/response exchange.
    Query {
        /// Command text without terminator
        command: String,
        /// Trimmed reply line
        response: oneshot::Sender<ScanResult<String>>,
    },
}

impl ChannelRequest {
    /// Create a send request and the receiver for its result.
    pub fn send(command: impl Into<String>) -> (Self, oneshot::Receiver<ScanResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Send {
                command: command.into(),
                response: tx,
            },
            rx,
        )
    }

    /// Create a query request and the receiver for its reply.
    pub fn query(command: impl Into<String>) -> (Self, oneshot::Receiver<ScanResult<String>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Query {
                command: command.into(),
                response: tx,
            },
            rx,
        )
    }
}

/// Cloneable handle to a device's channel actor.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    device: Arc<str>,
    tx: mpsc::Sender<ChannelRequest>,
}

impl ChannelHandle {
    /// Device name of the underlying channel.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Write a command without reading a reply.
    pub async fn send(&self, command: impl Into<String>) -> ScanResult<()> {
        let (request, rx) = ChannelRequest::send(command);
        self.submit(request).await?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Write a command and return the trimmed reply line.
    pub async fn query(&self, command: impl Into<String>) -> ScanResult<String> {
        let (request, rx) = ChannelRequest::query(command);
        self.submit(request).await?;
        rx.await.map_err(|_| self.closed())?
    }

    async fn submit(&self, request: ChannelRequest) -> ScanResult<()> {
        self.tx.send(request).await.map_err(|_| self.closed())
    }

    fn closed(&self) -> ScanError {
        ScanError::ChannelClosed(self.device.to_string())
    }
}

/// Move `channel` into its own actor task.
///
/// `capacity` bounds the request queue. Returns the handle and the actor's
/// join handle; the actor ends once every handle has been dropped.
pub fn spawn_channel<C: CommandChannel>(
    channel: C,
    capacity: usize,
) -> (ChannelHandle, JoinHandle<()>) {
    let device: Arc<str> = Arc::from(channel.device());
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run_channel(channel, rx));
    (ChannelHandle { device, tx }, task)
}

async fn run_channel<C: CommandChannel>(mut channel: C, mut rx: mpsc::Receiver<ChannelRequest>) {
    info!(device = %channel.device(), "Channel actor started");

    while let Some(request) = rx.recv().await {
        match request {
            ChannelRequest::Send { command, response } => {
                debug!(device = %channel.device(), command = %command.escape_debug(), "Send");
                let result = channel.write_command(&command).await;
                let _ = response.send(result);
            }
            ChannelRequest::Query { command, response } => {
                let result = channel.query(&command).await;
                let _ = response.send(result);
            }
        }
    }

    info!(device = %channel.device(), "Channel actor stopped");
}
