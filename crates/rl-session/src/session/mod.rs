//! Established sessions

mod registry;

pub use registry::SessionRegistry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use rl_core::time::current_time_secs;
use rl_core::{AgentInfo, ConnectionTarget};
use rl_protocol::{CodecFactory, HandshakeResult};

use crate::bridge::{BridgeConfig, BridgeSubscription, TransportBridge};
use crate::error::BridgeError;

/// A remote session with everything needed to (re)open its bridge
///
/// Holds at most one live bridge; opening a new one ends the previous.
pub struct Session {
    authority: String,
    target: ConnectionTarget,
    handshake: HandshakeResult,
    agent: Option<AgentInfo>,
    mtu: usize,
    tick_interval: Duration,
    created_at: u64,
    disposed: AtomicBool,
    bridge: Mutex<Option<Arc<TransportBridge>>>,
}

impl Session {
    /// Create a session from pipeline results
    pub fn new(
        authority: impl Into<String>,
        target: ConnectionTarget,
        handshake: HandshakeResult,
        agent: Option<AgentInfo>,
        mtu: usize,
        tick_interval: Duration,
    ) -> Self {
        Self {
            authority: authority.into(),
            target,
            handshake,
            agent,
            mtu,
            tick_interval,
            created_at: current_time_secs(),
            disposed: AtomicBool::new(false),
            bridge: Mutex::new(None),
        }
    }

    /// Authority string this session was resolved from
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Parsed target
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Handshake parameters
    pub fn handshake(&self) -> &HandshakeResult {
        &self.handshake
    }

    /// Remote agent, if bootstrap succeeded
    pub fn agent(&self) -> Option<&AgentInfo> {
        self.agent.as_ref()
    }

    /// Whether the session has been disposed
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// The live bridge, if any
    pub fn current_bridge(&self) -> Option<Arc<TransportBridge>> {
        self.bridge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|bridge| !bridge.is_ended())
    }

    /// Open a fresh bridge, ending the previous one first
    pub async fn open_bridge(
        &self,
        factory: &dyn CodecFactory,
    ) -> Result<(Arc<TransportBridge>, BridgeSubscription), BridgeError> {
        if self.is_disposed() {
            return Err(BridgeError::Disposed);
        }

        if let Some(previous) = self.take_bridge() {
            tracing::debug!("Replacing bridge for {}", self.authority);
            previous.end();
        }

        let config = BridgeConfig::new(
            self.target.host.clone(),
            self.handshake.udp_port,
            self.handshake.session_key.clone(),
            self.mtu,
        )
        .with_tick_interval(self.tick_interval);
        let (bridge, events) = TransportBridge::connect(&config, factory).await?;
        let bridge = Arc::new(bridge);

        let replaced = self
            .bridge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&bridge));
        if let Some(raced) = replaced {
            raced.end();
        }

        // Disposed while we were connecting
        if self.is_disposed() {
            bridge.end();
            return Err(BridgeError::Disposed);
        }

        Ok((bridge, events))
    }

    /// Mark disposed and end the bridge; later calls do nothing
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Disposing session {}", self.authority);
        if let Some(bridge) = self.take_bridge() {
            bridge.end();
        }
    }

    fn take_bridge(&self) -> Option<Arc<TransportBridge>> {
        self.bridge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Snapshot for listings
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            authority: self.authority.clone(),
            host: self.target.host.clone(),
            user: self.target.user.clone(),
            control_port: self.target.control_port,
            udp_port: self.handshake.udp_port,
            session_key: self.handshake.session_key.redacted(),
            agent_port: self.agent.as_ref().map(|a| a.listen_port),
            agent_pid: self.agent.as_ref().and_then(|a| a.pid),
            bridge_active: self.current_bridge().is_some(),
            disposed: self.is_disposed(),
            created_at: self.created_at,
        }
    }
}

/// Serializable view of a session; secrets are truncated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub authority: String,
    pub host: String,
    pub user: Option<String>,
    pub control_port: u16,
    pub udp_port: u16,
    pub session_key: String,
    pub agent_port: Option<u16>,
    pub agent_pid: Option<u32>,
    pub bridge_active: bool,
    pub disposed: bool,
    /// Unix seconds
    pub created_at: u64,
}
