//! Scripted [`CommandChannel`] for driver tests.
//!
//! The channel records every command written to it and answers queries from
//! a responder closure, so drivers can be exercised through the real channel
//! actor without a serial port.
//!
//! # Example
//!
//! ```rust,ignore
//! let channel = MockChannel::new("stage").reply_with(|cmd| match cmd {
//!     "W X Y Z" => Some(":A 1 2 3".into()),
//!     _ => Some(":A".into()),
//! });
//! let log = channel.log();
//! let (handle, _task) = spawn_channel(channel, 8);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::{CommandChannel, ScanError, ScanResult};
use std::sync::Arc;
use std::time::Duration;

type Responder = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Shared view of everything written to a [`MockChannel`].
#[derive(Debug, Clone, Default)]
pub struct ChannelLog {
    written: Arc<Mutex<Vec<String>>>,
}

impl ChannelLog {
    /// Commands written so far, terminator stripped.
    pub fn commands(&self) -> Vec<String> {
        self.written.lock().clone()
    }
}

/// Channel whose replies come from a closure.
pub struct MockChannel {
    device: String,
    log: ChannelLog,
    responder: Responder,
    pending: Option<String>,
    stale: usize,
}

impl MockChannel {
    /// Channel that answers every query with `:A`.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            log: ChannelLog::default(),
            responder: Box::new(|_| Some(":A".to_string())),
            pending: None,
            stale: 0,
        }
    }

    /// Answer queries with `responder`; `None` simulates a silent device.
    pub fn reply_with<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    /// Pretend `bytes` of stale input are waiting to be discarded.
    pub fn with_stale_input(mut self, bytes: usize) -> Self {
        self.stale = bytes;
        self
    }

    /// Handle onto the written-command log.
    pub fn log(&self) -> ChannelLog {
        self.log.clone()
    }
}

#[async_trait]
impl CommandChannel for MockChannel {
    fn device(&self) -> &str {
        &self.device
    }

    fn settle(&self) -> Duration {
        Duration::ZERO
    }

    async fn discard_input(&mut self) -> ScanResult<usize> {
        self.pending = None;
        Ok(std::mem::take(&mut self.stale))
    }

    async fn write_command(&mut self, command: &str) -> ScanResult<()> {
        self.log.written.lock().push(command.to_string());
        self.pending = (self.responder)(command);
        Ok(())
    }

    async fn read_line(&mut self) -> ScanResult<String> {
        self.pending
            .take()
            .map(|reply| reply.trim().to_string())
            .ok_or_else(|| ScanError::transport(&self.device, "no reply within 0 ms"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_follow_the_responder() {
        let mut channel = MockChannel::new("stage").reply_with(|cmd| {
            if cmd.starts_with('W') {
                Some(" :A 1 2 3 ".to_string())
            } else {
                None
            }
        });
        let log = channel.log();

        assert_eq!(channel.query("W X Y Z").await.unwrap(), ":A 1 2 3");
        assert!(channel.query("M X=1").await.is_err());
        assert_eq!(log.commands(), vec!["W X Y Z", "M X=1"]);
    }

    #[tokio::test]
    async fn discard_reports_stale_bytes_once() {
        let mut channel = MockChannel::new("stage").with_stale_input(7);
        assert_eq!(channel.discard_input().await.unwrap(), 7);
        assert_eq!(channel.discard_input().await.unwrap(), 0);
    }
}
