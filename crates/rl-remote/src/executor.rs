//! Remote command execution
//!
//! Runs a command to completion over a control channel and returns its
//! stdout. stderr is kept for diagnostics only.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;

use rl_core::ExecError;

use crate::channel::{ControlChannel, ExecEvent};

/// Timeout for ordinary commands
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs commands over a shared control channel
#[derive(Clone)]
pub struct RemoteExecutor {
    channel: Arc<dyn ControlChannel>,
    default_timeout: Duration,
}

impl RemoteExecutor {
    /// Create an executor with the default timeout
    pub fn new(channel: Arc<dyn ControlChannel>) -> Self {
        Self {
            channel,
            default_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    /// Override the timeout used by [`RemoteExecutor::run_default`]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The underlying channel
    pub fn channel(&self) -> &Arc<dyn ControlChannel> {
        &self.channel
    }

    /// Run with the default timeout
    pub async fn run_default(&self, command: &str) -> Result<String, ExecError> {
        self.run(command, self.default_timeout).await
    }

    /// Run `command` and return its stdout
    ///
    /// Non-zero exit is [`ExecError::Failure`]; no terminal event within
    /// `timeout` is [`ExecError::Timeout`]. On timeout the remote process is
    /// left running.
    pub async fn run(&self, command: &str, timeout: Duration) -> Result<String, ExecError> {
        tracing::debug!("exec: {}", command);

        tokio::time::timeout(timeout, self.run_to_completion(command))
            .await
            .map_err(|_| ExecError::Timeout(timeout))?
    }

    async fn run_to_completion(&self, command: &str) -> Result<String, ExecError> {
        let mut stream = self.channel.exec(command).await?;
        let mut stdout = BytesMut::new();
        let mut stderr = BytesMut::new();

        while let Some(event) = stream.next().await {
            match event {
                ExecEvent::Stdout(data) => stdout.extend_from_slice(&data),
                ExecEvent::Stderr(data) => stderr.extend_from_slice(&data),
                ExecEvent::Exit(0) => {
                    if !stderr.is_empty() {
                        tracing::debug!("stderr: {}", String::from_utf8_lossy(&stderr).trim_end());
                    }
                    return Ok(String::from_utf8_lossy(&stdout).into_owned());
                }
                ExecEvent::Exit(exit_code) => {
                    return Err(ExecError::Failure {
                        exit_code,
                        stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    })
                }
                ExecEvent::Closed => break,
            }
        }

        Err(ExecError::NoExitStatus)
    }
}
