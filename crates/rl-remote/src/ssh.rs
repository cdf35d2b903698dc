//! SSH control channel
//!
//! Connects with russh, verifies the host key against known_hosts,
//! authenticates from the ordered credential sources and runs each command
//! on its own session channel.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tokio::sync::mpsc;

use rl_core::config::HostKeyPolicy;
use rl_core::{ChannelError, ChannelErrorKind};

use crate::auth::{agent_available, auth_sources, default_ssh_dir, AuthSource};
use crate::channel::{ConnectParams, ControlChannel, ControlConnector, ExecEvent, ExecStream};

/// Opens SSH control channels
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

impl SshConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }

    async fn connect_and_authenticate(
        &self,
        params: &ConnectParams,
    ) -> Result<Handle<ClientHandler>, ChannelError> {
        let ssh_config = Arc::new(Config::default());
        let verdict = Arc::new(Mutex::new(None));
        let handler = ClientHandler {
            host: params.host.clone(),
            port: params.port,
            policy: params.host_key_policy,
            known_hosts: params.known_hosts.clone(),
            verdict: Arc::clone(&verdict),
        };

        tracing::debug!("Connecting to {}:{}", params.host, params.port);
        let mut session = client::connect(ssh_config, (params.host.as_str(), params.port), handler)
            .await
            .map_err(|e| {
                let recorded = verdict.lock().ok().and_then(|mut v| v.take());
                match recorded {
                    Some(message) => ChannelError::new(ChannelErrorKind::HostKey, message),
                    None => classify_error(&e, &params.host, params.port),
                }
            })?;

        authenticate(&mut session, &params.user, params).await?;
        Ok(session)
    }
}

#[async_trait]
impl ControlConnector for SshConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn ControlChannel>, ChannelError> {
        let session = tokio::time::timeout(params.timeout, self.connect_and_authenticate(params))
            .await
            .map_err(|_| {
                ChannelError::new(
                    ChannelErrorKind::Timeout,
                    format!(
                        "Connection to {}:{} timed out after {:?}",
                        params.host, params.port, params.timeout
                    ),
                )
            })??;

        tracing::info!("Control channel open to {}@{}", params.user, params.host);
        Ok(Box::new(SshControlChannel {
            session,
            host: params.host.clone(),
        }))
    }
}

/// Try each credential source in order until one is accepted
async fn authenticate(
    session: &mut Handle<ClientHandler>,
    user: &str,
    params: &ConnectParams,
) -> Result<(), ChannelError> {
    let ssh_dir = default_ssh_dir();
    let sources = auth_sources(
        params.identity_file.as_deref(),
        agent_available(),
        ssh_dir.as_deref(),
    );

    for source in &sources {
        let accepted = match source {
            AuthSource::KeyFile(path) => match russh_keys::load_secret_key(path, None) {
                Ok(key) => session
                    .authenticate_publickey(user, Arc::new(key))
                    .await
                    .map_err(|e| auth_error(user, e))?,
                Err(e) => {
                    tracing::debug!("Skipping key {}: {}", path.display(), e);
                    false
                }
            },
            AuthSource::Agent => authenticate_with_agent(session, user).await,
            AuthSource::None => session
                .authenticate_none(user)
                .await
                .map_err(|e| auth_error(user, e))?,
        };

        if accepted {
            tracing::debug!("Authenticated as '{}' using {:?}", user, source);
            return Ok(());
        }
    }

    Err(ChannelError::new(
        ChannelErrorKind::Authentication,
        format!("Server rejected every authentication method for '{}'", user),
    ))
}

#[cfg(unix)]
async fn authenticate_with_agent(session: &mut Handle<ClientHandler>, user: &str) -> bool {
    use russh_keys::agent::client::AgentClient;

    let mut agent = match AgentClient::connect_env().await {
        Ok(agent) => agent,
        Err(e) => {
            tracing::debug!("SSH agent unavailable: {}", e);
            return false;
        }
    };

    let identities = match agent.request_identities().await {
        Ok(identities) => identities,
        Err(e) => {
            tracing::debug!("SSH agent refused to list identities: {}", e);
            return false;
        }
    };

    for key in identities {
        let fingerprint = key.fingerprint();
        let (returned, result) = session.authenticate_future(user, key, agent).await;
        agent = returned;
        match result {
            Ok(true) => return true,
            Ok(false) => tracing::debug!("Agent key {} rejected", fingerprint),
            Err(e) => tracing::debug!("Agent signing failed for {}: {:?}", fingerprint, e),
        }
    }
    false
}

#[cfg(not(unix))]
async fn authenticate_with_agent(_session: &mut Handle<ClientHandler>, _user: &str) -> bool {
    false
}

fn auth_error(user: &str, e: russh::Error) -> ChannelError {
    ChannelError::new(
        ChannelErrorKind::Authentication,
        format!("Authentication error for '{}': {}", user, e),
    )
}

/// Classify a connect failure
fn classify_error(e: &anyhow::Error, host: &str, port: u16) -> ChannelError {
    if let Some(russh::Error::IO(io)) = e.downcast_ref::<russh::Error>() {
        if io.kind() == std::io::ErrorKind::ConnectionRefused {
            return ChannelError::new(
                ChannelErrorKind::Refused,
                format!("Connection to {}:{} refused", host, port),
            );
        }
    }
    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        if io.kind() == std::io::ErrorKind::ConnectionRefused {
            return ChannelError::new(
                ChannelErrorKind::Refused,
                format!("Connection to {}:{} refused", host, port),
            );
        }
    }

    let message = format!("Failed to connect to {}:{}: {}", host, port, e);
    ChannelError::new(classify_message(&e.to_string()), message)
}

/// Classify an error by its message
pub(crate) fn classify_message(message: &str) -> ChannelErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("refused") {
        ChannelErrorKind::Refused
    } else if lower.contains("lookup")
        || lower.contains("resolve")
        || lower.contains("name or service not known")
        || lower.contains("nodename nor servname")
    {
        ChannelErrorKind::Unresolved
    } else if lower.contains("server key") || lower.contains("key changed") {
        ChannelErrorKind::HostKey
    } else if lower.contains("timed out") {
        ChannelErrorKind::Timeout
    } else {
        ChannelErrorKind::Other
    }
}

/// An authenticated SSH connection
pub struct SshControlChannel {
    session: Handle<ClientHandler>,
    host: String,
}

#[async_trait]
impl ControlChannel for SshControlChannel {
    async fn exec(&self, command: &str) -> Result<ExecStream, ChannelError> {
        let mut channel = self.session.channel_open_session().await.map_err(|e| {
            ChannelError::new(
                ChannelErrorKind::Closed,
                format!("Failed to open session channel on {}: {}", self.host, e),
            )
        })?;

        channel.exec(true, command).await.map_err(|e| {
            ChannelError::new(
                ChannelErrorKind::Rejected,
                format!("Failed to send exec request: {}", e),
            )
        })?;

        // Hold output that races ahead of the reply
        let mut early = Vec::new();
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Success) => break,
                Some(ChannelMsg::Failure) => {
                    return Err(ChannelError::new(
                        ChannelErrorKind::Rejected,
                        format!("{} rejected the exec request", self.host),
                    ))
                }
                Some(msg) => early.push(msg),
                None => {
                    return Err(ChannelError::new(
                        ChannelErrorKind::Closed,
                        "Channel closed before the exec request was answered",
                    ))
                }
            }
        }

        let (tx, stream) = ExecStream::channel();
        tokio::spawn(pump_channel(channel, early, tx));
        Ok(stream)
    }

    async fn close(&self) {
        if let Err(e) = self
            .session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.host, e);
        }
    }
}

/// Forward channel messages as exec events until the channel closes
async fn pump_channel(
    mut channel: Channel<Msg>,
    early: Vec<ChannelMsg>,
    tx: mpsc::Sender<ExecEvent>,
) {
    let mut exit_status = None;
    let mut early = early.into_iter();

    loop {
        let msg = match early.next() {
            Some(msg) => Some(msg),
            None => channel.wait().await,
        };

        let event = match msg {
            Some(ChannelMsg::Data { data }) => ExecEvent::Stdout(Bytes::copy_from_slice(&data)),
            Some(ChannelMsg::ExtendedData { data, .. }) => {
                ExecEvent::Stderr(Bytes::copy_from_slice(&data))
            }
            Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                exit_status = Some(code);
                continue;
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => continue,
        };

        if tx.send(event).await.is_err() {
            // Reader went away
            let _ = channel.close().await;
            return;
        }
    }

    let terminal = match exit_status {
        Some(code) => ExecEvent::Exit(code),
        None => ExecEvent::Closed,
    };
    let _ = tx.send(terminal).await;
}

/// russh client handler; only host key verification is customised
pub(crate) struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Option<PathBuf>,
    /// Why the host key was refused, for error classification
    verdict: Arc<Mutex<Option<String>>>,
}

impl ClientHandler {
    fn reject(&self, message: String) -> bool {
        tracing::warn!("{}", message);
        if let Ok(mut verdict) = self.verdict.lock() {
            *verdict = Some(message);
        }
        false
    }

    fn learn(&self, key: &PublicKey) {
        let learned = match &self.known_hosts {
            Some(path) => russh_keys::learn_known_hosts_path(&self.host, self.port, key, path),
            None => russh_keys::learn_known_hosts(&self.host, self.port, key),
        };
        match learned {
            Ok(()) => tracing::info!("Added {} to known hosts", self.host),
            Err(e) => tracing::warn!("Could not record host key for {}: {}", self.host, e),
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key for {}: {}", self.host, fingerprint);

        if self.policy == HostKeyPolicy::AcceptAny {
            return Ok(true);
        }

        let known = match &self.known_hosts {
            Some(path) => {
                russh_keys::check_known_hosts_path(&self.host, self.port, server_public_key, path)
            }
            None => russh_keys::check_known_hosts(&self.host, self.port, server_public_key),
        };

        Ok(match known {
            Ok(true) => true,
            Ok(false) if self.policy == HostKeyPolicy::AcceptNew => {
                self.learn(server_public_key);
                true
            }
            Ok(false) => self.reject(format!(
                "Host key for {} ({}) is not in known_hosts",
                self.host, fingerprint
            )),
            Err(russh_keys::Error::KeyChanged { line }) => self.reject(format!(
                "Host key for {} changed (known_hosts line {}); now {}",
                self.host, line, fingerprint
            )),
            Err(e) => self.reject(format!(
                "Could not verify host key for {}: {}",
                self.host, e
            )),
        })
    }
}
