//! Control channel abstraction
//!
//! A control channel is an authenticated connection that can run shell
//! commands on the remote host. Production uses SSH ([`crate::ssh`]); the
//! pipeline only sees these traits so it can be driven by scripted fakes.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use rl_core::config::HostKeyPolicy;
use rl_core::ChannelError;

/// Buffered output events per running command
pub const EXEC_EVENT_CAPACITY: usize = 256;

/// One observation from a running remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    /// Bytes written to stdout
    Stdout(Bytes),
    /// Bytes written to stderr
    Stderr(Bytes),
    /// The process exited with this status
    Exit(u32),
    /// The channel closed without an exit status
    Closed,
}

impl ExecEvent {
    /// Whether no further events follow
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecEvent::Exit(_) | ExecEvent::Closed)
    }
}

/// Output of one remote command
///
/// Dropping the stream abandons the command; the remote process keeps
/// running until the control channel closes.
#[derive(Debug)]
pub struct ExecStream {
    rx: mpsc::Receiver<ExecEvent>,
    finished: bool,
}

impl ExecStream {
    /// Wrap a receiver fed by a channel implementation
    pub fn new(rx: mpsc::Receiver<ExecEvent>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    /// Create a stream plus the sender that feeds it
    pub fn channel() -> (mpsc::Sender<ExecEvent>, Self) {
        let (tx, rx) = mpsc::channel(EXEC_EVENT_CAPACITY);
        (tx, Self::new(rx))
    }

    /// Next event; `None` after a terminal event has been returned
    ///
    /// A sender dropped without a terminal event yields [`ExecEvent::Closed`].
    pub async fn next(&mut self) -> Option<ExecEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await.unwrap_or(ExecEvent::Closed);
        if event.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }
}

/// An authenticated control channel
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Start a command and stream its output
    async fn exec(&self, command: &str) -> Result<ExecStream, ChannelError>;

    /// Close the channel; commands still running are orphaned
    async fn close(&self);
}

/// Everything needed to open a control channel
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Host name or address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Key tried before the SSH agent
    pub identity_file: Option<PathBuf>,
    /// TCP connect plus authentication timeout
    pub timeout: Duration,
    /// Host key verification policy
    pub host_key_policy: HostKeyPolicy,
    /// known_hosts override
    pub known_hosts: Option<PathBuf>,
}

/// Opens control channels
#[async_trait]
pub trait ControlConnector: Send + Sync {
    /// Connect and authenticate
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn ControlChannel>, ChannelError>;
}
