//! Scripted control channel fakes
//!
//! Each rule maps a command fragment to a list of steps played back as exec
//! events. Used by the unit tests here and by the session crate's pipeline
//! tests (behind the `test-util` feature).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use rl_core::{ChannelError, ChannelErrorKind};

use crate::channel::{ConnectParams, ControlChannel, ControlConnector, ExecEvent, ExecStream};

/// One scripted action
#[derive(Debug, Clone)]
pub enum Step {
    /// Emit stdout
    Stdout(&'static str),
    /// Emit stdout built at runtime
    StdoutOwned(String),
    /// Emit stderr
    Stderr(&'static str),
    /// Exit with a status
    Exit(u32),
    /// Wait before the next step
    Delay(Duration),
    /// Never finish; the command ends only when its stream is dropped
    Hang,
}

#[derive(Debug, Clone)]
enum Rule {
    Run {
        fragment: String,
        steps: Vec<Step>,
    },
    Reject {
        fragment: String,
    },
}

/// What a scripted channel observed
#[derive(Debug, Default)]
pub struct ChannelLog {
    commands: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl ChannelLog {
    /// Commands executed so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of executed commands containing `fragment`
    pub fn count(&self, fragment: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.contains(fragment))
            .count()
    }

    /// Number of `close()` calls
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// A control channel that replays scripted output
///
/// The first rule whose fragment occurs in the command wins. Unmatched
/// commands exit with status 127.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChannel {
    rules: Vec<Rule>,
    log: Arc<ChannelLog>,
}

impl ScriptedChannel {
    /// An empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Play `steps` for commands containing `fragment`
    pub fn on(mut self, fragment: &str, steps: Vec<Step>) -> Self {
        self.rules.push(Rule::Run {
            fragment: fragment.to_string(),
            steps,
        });
        self
    }

    /// Reject the exec request for commands containing `fragment`
    pub fn reject(mut self, fragment: &str) -> Self {
        self.rules.push(Rule::Reject {
            fragment: fragment.to_string(),
        });
        self
    }

    /// Shared observation log
    pub fn log(&self) -> Arc<ChannelLog> {
        Arc::clone(&self.log)
    }

    fn steps_for(&self, command: &str) -> Result<Vec<Step>, ChannelError> {
        for rule in &self.rules {
            match rule {
                Rule::Run { fragment, steps } if command.contains(fragment.as_str()) => {
                    return Ok(steps.clone())
                }
                Rule::Reject { fragment } if command.contains(fragment.as_str()) => {
                    return Err(ChannelError::new(
                        ChannelErrorKind::Rejected,
                        "exec request rejected",
                    ))
                }
                _ => {}
            }
        }
        Ok(vec![Step::Stderr("sh: command not scripted"), Step::Exit(127)])
    }
}

#[async_trait]
impl ControlChannel for ScriptedChannel {
    async fn exec(&self, command: &str) -> Result<ExecStream, ChannelError> {
        if let Ok(mut commands) = self.log.commands.lock() {
            commands.push(command.to_string());
        }
        let steps = self.steps_for(command)?;
        let (tx, stream) = ExecStream::channel();

        tokio::spawn(async move {
            for step in steps {
                let event = match step {
                    Step::Stdout(s) => ExecEvent::Stdout(Bytes::from_static(s.as_bytes())),
                    Step::StdoutOwned(s) => ExecEvent::Stdout(Bytes::from(s)),
                    Step::Stderr(s) => ExecEvent::Stderr(Bytes::from_static(s.as_bytes())),
                    Step::Exit(code) => ExecEvent::Exit(code),
                    Step::Delay(d) => {
                        tokio::time::sleep(d).await;
                        continue;
                    }
                    Step::Hang => {
                        tx.closed().await;
                        return;
                    }
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok(stream)
    }

    async fn close(&self) {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A connector handing out clones of one scripted channel
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    outcome: Result<ScriptedChannel, ChannelErrorKind>,
    connects: Arc<Mutex<Vec<ConnectParams>>>,
}

impl ScriptedConnector {
    /// Every connect succeeds with `channel`
    pub fn new(channel: ScriptedChannel) -> Self {
        Self {
            outcome: Ok(channel),
            connects: Arc::default(),
        }
    }

    /// Every connect fails with `kind`
    pub fn failing(kind: ChannelErrorKind) -> Self {
        Self {
            outcome: Err(kind),
            connects: Arc::default(),
        }
    }

    /// Parameters of every connect attempt so far
    pub fn connects(&self) -> Vec<ConnectParams> {
        self.connects.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ControlConnector for ScriptedConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn ControlChannel>, ChannelError> {
        if let Ok(mut connects) = self.connects.lock() {
            connects.push(params.clone());
        }
        match &self.outcome {
            Ok(channel) => Ok(Box::new(channel.clone())),
            Err(kind) => Err(ChannelError::new(*kind, format!("scripted {:?}", kind))),
        }
    }
}
