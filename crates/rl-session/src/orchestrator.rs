//! Session orchestrator
//!
//! Turns an authority string into a registered [`Session`]:
//!
//! 1. On a retry (`attempt > 0`) the previous session is disposed first.
//! 2. The control channel is opened.
//! 3. The transport server is started and its connect line is scraped from
//!    the output.
//! 4. The remote agent is bootstrapped on a best-effort basis.
//! 5. The control channel is closed.
//! 6. The session is registered and handed back with a lazy connector.
//!
//! Only the connect and handshake steps can fail a resolve; bootstrap
//! failures leave the session in degraded mode without agent info.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use rl_core::{AgentInfo, ConnectionTarget, RoamConfig};
use rl_protocol::{CodecFactory, HandshakeRecognizer, HandshakeResult};
use rl_remote::{
    watch_output, BootstrapError, ConnectParams, ControlChannel, ControlConnector,
    EnvironmentBootstrapper, RemoteExecutor,
};

use crate::bridge::MessageChannel;
use crate::error::{BridgeError, ResolveError};
use crate::session::{Session, SessionRegistry, SessionSummary};

/// Where a resolve currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStage {
    Idle,
    ConnectingControl,
    StartingHandshake,
    Bootstrapping,
    StartingAgent,
    SessionReady,
    Failed,
}

impl fmt::Display for ResolveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolveStage::Idle => "idle",
            ResolveStage::ConnectingControl => "connecting control channel",
            ResolveStage::StartingHandshake => "starting transport server",
            ResolveStage::Bootstrapping => "bootstrapping agent",
            ResolveStage::StartingAgent => "starting agent",
            ResolveStage::SessionReady => "session ready",
            ResolveStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a successful resolve
pub struct ResolvedAuthority {
    /// Authority string as given
    pub authority: String,
    /// Remote host
    pub host: String,
    /// UDP port of the transport server
    pub udp_port: u16,
    /// Remote agent, absent in degraded mode
    pub agent: Option<AgentInfo>,
    /// Opens the message channel on demand
    pub connector: SessionConnector,
}

impl ResolvedAuthority {
    fn from_session(session: Arc<Session>, codecs: Arc<dyn CodecFactory>) -> Self {
        Self {
            authority: session.authority().to_string(),
            host: session.target().host.clone(),
            udp_port: session.handshake().udp_port,
            agent: session.agent().cloned(),
            connector: SessionConnector { session, codecs },
        }
    }

    /// Snapshot of the underlying session
    pub fn summary(&self) -> SessionSummary {
        self.connector.session.summary()
    }
}

impl fmt::Debug for ResolvedAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedAuthority")
            .field("authority", &self.authority)
            .field("host", &self.host)
            .field("udp_port", &self.udp_port)
            .field("agent_port", &self.agent.as_ref().map(|a| a.listen_port))
            .finish()
    }
}

/// Lazily builds the transport bridge for a session
#[derive(Clone)]
pub struct SessionConnector {
    session: Arc<Session>,
    codecs: Arc<dyn CodecFactory>,
}

impl SessionConnector {
    /// Open a bridge and wrap it as a message channel
    ///
    /// Each call replaces the session's previous bridge.
    pub async fn connect(&self) -> Result<MessageChannel, BridgeError> {
        let (bridge, events) = self.session.open_bridge(self.codecs.as_ref()).await?;
        Ok(MessageChannel::new(bridge, events))
    }

    /// The session this connector opens bridges for
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

/// Resolves authorities into sessions and owns the session registry
pub struct SessionOrchestrator {
    config: RoamConfig,
    connector: Arc<dyn ControlConnector>,
    codecs: Arc<dyn CodecFactory>,
    registry: SessionRegistry,
    stage: watch::Sender<ResolveStage>,
    cancel: CancellationToken,
}

impl SessionOrchestrator {
    /// Create an orchestrator
    pub fn new(
        config: RoamConfig,
        connector: Arc<dyn ControlConnector>,
        codecs: Arc<dyn CodecFactory>,
    ) -> Self {
        let (stage, _) = watch::channel(ResolveStage::Idle);
        Self {
            config,
            connector,
            codecs,
            registry: SessionRegistry::new(),
            stage,
            cancel: CancellationToken::new(),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &RoamConfig {
        &self.config
    }

    /// Live session registry
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Follow stage transitions of resolves on this orchestrator
    pub fn subscribe_stage(&self) -> watch::Receiver<ResolveStage> {
        self.stage.subscribe()
    }

    /// Snapshots of all live sessions
    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.registry.summaries()
    }

    /// Dispose every session and refuse further resolves
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let disposed = self.registry.dispose_all();
        tracing::info!("Orchestrator shut down ({} sessions disposed)", disposed);
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve `authority` into a live session
    ///
    /// `attempt` is 0 for the first try; any higher value disposes the
    /// existing session for the authority and starts over on a fresh
    /// control channel.
    pub async fn resolve(
        &self,
        authority: &str,
        attempt: u32,
    ) -> Result<ResolvedAuthority, ResolveError> {
        let result = self.resolve_inner(authority, attempt).await;
        if let Err(e) = &result {
            self.set_stage(ResolveStage::Failed);
            tracing::error!(
                "Resolving {} failed during {}: {}",
                authority,
                e.stage(),
                e
            );
            if let Some(output) = e.output().filter(|o| !o.is_empty()) {
                tracing::debug!("Remote output before failure:\n{}", output);
            }
        }
        result
    }

    async fn resolve_inner(
        &self,
        authority: &str,
        attempt: u32,
    ) -> Result<ResolvedAuthority, ResolveError> {
        if self.is_shut_down() {
            return Err(ResolveError::ShuttingDown);
        }
        let target = ConnectionTarget::parse(authority, self.config.handshake.port)?;
        tracing::info!("Resolving {} (attempt {})", authority, attempt);

        if attempt > 0 {
            if self.registry.remove(authority).is_some() {
                tracing::info!("Disposed previous session for {}", authority);
            }
        } else if let Some(existing) = self.registry.get(authority) {
            if !existing.is_disposed() {
                tracing::debug!("Reusing live session for {}", authority);
                return Ok(ResolvedAuthority::from_session(
                    existing,
                    Arc::clone(&self.codecs),
                ));
            }
        }

        self.set_stage(ResolveStage::ConnectingControl);
        let params = self.connect_params(&target);
        tracing::info!(
            "Opening control channel to {}@{}:{}",
            params.user,
            params.host,
            params.port
        );
        let channel: Arc<dyn ControlChannel> = Arc::from(self.connector.connect(&params).await?);

        let established = self.establish(&channel, &target).await;
        channel.close().await;
        tracing::debug!("Control channel to {} closed", target.host);
        let (handshake, agent) = established?;

        let session = Arc::new(Session::new(
            authority,
            target,
            handshake,
            agent,
            self.config.transport.mtu,
            self.config.transport.tick_interval,
        ));

        if self.is_shut_down() {
            session.dispose();
            return Err(ResolveError::ShuttingDown);
        }
        self.registry.insert(Arc::clone(&session));
        if !self.registry.is_registered(&session) {
            session.dispose();
            return Err(ResolveError::Unavailable(authority.to_string()));
        }

        self.set_stage(ResolveStage::SessionReady);
        tracing::info!(
            "Session ready for {} (udp port {}, agent {})",
            authority,
            session.handshake().udp_port,
            match session.agent() {
                Some(agent) => format!("on port {}", agent.listen_port),
                None => "unavailable".to_string(),
            }
        );
        Ok(ResolvedAuthority::from_session(
            session,
            Arc::clone(&self.codecs),
        ))
    }

    /// Handshake then best-effort bootstrap on one control channel
    async fn establish(
        &self,
        channel: &Arc<dyn ControlChannel>,
        target: &ConnectionTarget,
    ) -> Result<(HandshakeResult, Option<AgentInfo>), ResolveError> {
        self.set_stage(ResolveStage::StartingHandshake);
        let command = self.config.handshake.render(target.handshake_port);
        tracing::debug!("Starting transport server: {}", command);
        let stream = channel.exec(&command).await?;
        let found = watch_output(stream, &HandshakeRecognizer, self.config.handshake.timeout)
            .await?;
        let handshake = found.value;
        tracing::info!(
            "Transport server on udp port {} (key {})",
            handshake.udp_port,
            handshake.session_key
        );

        if !self.config.agent.enabled {
            tracing::debug!("Agent bootstrap disabled");
            return Ok((handshake, None));
        }

        self.set_stage(ResolveStage::Bootstrapping);
        let agent = match self.bootstrap(Arc::clone(channel)).await {
            Ok(agent) => Some(agent),
            Err(e) => {
                tracing::warn!(
                    "Agent bootstrap on {} failed, continuing without agent: {} ({})",
                    target.host,
                    e,
                    e.hint()
                );
                None
            }
        };
        Ok((handshake, agent))
    }

    async fn bootstrap(&self, channel: Arc<dyn ControlChannel>) -> Result<AgentInfo, BootstrapError> {
        let config = &self.config.agent;
        let executor = RemoteExecutor::new(channel).with_default_timeout(config.exec_timeout);
        EnvironmentBootstrapper::new(executor, config.clone())
            .ensure_running(None, || self.set_stage(ResolveStage::StartingAgent))
            .await
    }

    fn connect_params(&self, target: &ConnectionTarget) -> ConnectParams {
        let ssh = &self.config.ssh;
        ConnectParams {
            host: target.host.clone(),
            port: target.control_port,
            user: ssh.user_for(target.user.as_deref()),
            identity_file: ssh.identity_file.clone(),
            timeout: ssh.connect_timeout,
            host_key_policy: ssh.host_key_policy,
            known_hosts: ssh.known_hosts.clone(),
        }
    }

    fn set_stage(&self, stage: ResolveStage) {
        tracing::trace!("Resolve stage: {}", stage);
        self.stage.send_replace(stage);
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.registry.dispose_all();
    }
}
