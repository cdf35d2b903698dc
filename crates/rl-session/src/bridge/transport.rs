//! UDP transport bridge
//!
//! One bridge owns one connected UDP socket and one codec. A background task
//! feeds received datagrams through the codec and drives the codec's timer;
//! decoded bytes are published on a broadcast channel.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use rl_core::time::monotonic_millis;
use rl_protocol::{CodecFactory, CodecStats, SessionKey, TransportCodec};

use crate::error::BridgeError;

/// Decoded messages buffered per subscriber
pub const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// Default codec tick interval
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Largest datagram we accept
const RECV_BUFFER_SIZE: usize = 65_536;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where and how to open a bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Remote host
    pub host: String,
    /// Remote UDP port
    pub udp_port: u16,
    /// Key handed to the codec factory
    pub session_key: SessionKey,
    /// Largest datagram the codec may emit
    pub mtu: usize,
    /// Codec tick interval
    pub tick_interval: Duration,
}

impl BridgeConfig {
    /// Create a config with the default tick interval
    pub fn new(host: impl Into<String>, udp_port: u16, session_key: SessionKey, mtu: usize) -> Self {
        Self {
            host: host.into(),
            udp_port,
            session_key,
            mtu,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    /// Override the tick interval
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }
}

/// Receivers for bridge notifications
///
/// `closed` carries the error that ended the bridge, `ended` fires when the
/// caller ended it. Exactly one of the two fires, after which every sender
/// is dropped.
#[derive(Debug)]
pub struct BridgeSubscription {
    /// Decoded application bytes
    pub message: broadcast::Receiver<Bytes>,
    /// Closed by the network or codec
    pub closed: broadcast::Receiver<Option<String>>,
    /// Ended by the caller
    pub ended: broadcast::Receiver<()>,
}

struct EventSenders {
    message: broadcast::Sender<Bytes>,
    closed: broadcast::Sender<Option<String>>,
    ended: broadcast::Sender<()>,
}

impl EventSenders {
    fn new() -> Self {
        let (message, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (closed, _) = broadcast::channel(1);
        let (ended, _) = broadcast::channel(1);
        Self {
            message,
            closed,
            ended,
        }
    }

    fn subscribe(&self) -> BridgeSubscription {
        BridgeSubscription {
            message: self.message.subscribe(),
            closed: self.closed.subscribe(),
            ended: self.ended.subscribe(),
        }
    }
}

enum Teardown {
    Ended,
    Closed(Option<String>),
}

struct BridgeInner {
    peer: SocketAddr,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    codec: Mutex<Option<Box<dyn TransportCodec>>>,
    events: Mutex<Option<EventSenders>>,
    torn_down: AtomicBool,
    cancel: CancellationToken,
}

impl BridgeInner {
    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        lock(&self.socket).clone()
    }

    fn with_codec<T>(&self, f: impl FnOnce(&mut dyn TransportCodec) -> T) -> Option<T> {
        lock(&self.codec).as_mut().map(|codec| f(codec.as_mut()))
    }

    async fn send_all(&self, datagrams: Vec<Bytes>) -> std::io::Result<()> {
        let Some(socket) = self.socket() else {
            return Ok(());
        };
        for datagram in datagrams {
            socket.send(&datagram).await?;
            tracing::trace!("-> {} bytes to {}", datagram.len(), self.peer);
        }
        Ok(())
    }

    async fn on_tick(&self) {
        let now = monotonic_millis();
        let datagrams = match self.with_codec(|codec| codec.tick(now)) {
            None => return,
            Some(Ok(datagrams)) => datagrams,
            Some(Err(e)) => {
                tracing::debug!("Codec tick failed: {}", e);
                return;
            }
        };

        if let Err(e) = self.send_all(datagrams).await {
            tracing::warn!("UDP send to {} failed: {}", self.peer, e);
            self.teardown(Teardown::Closed(Some(e.to_string())));
        }
    }

    fn on_datagram(&self, datagram: &[u8]) {
        tracing::trace!("<- {} bytes from {}", datagram.len(), self.peer);
        let now = monotonic_millis();

        match self.with_codec(|codec| codec.inbound(datagram, now)) {
            None => {}
            Some(Ok(bytes)) if bytes.is_empty() => {}
            Some(Ok(bytes)) => {
                if let Some(events) = lock(&self.events).as_ref() {
                    let _ = events.message.send(bytes);
                }
            }
            Some(Err(e)) => {
                tracing::debug!(
                    "Dropping undecodable datagram ({} bytes) from {}: {}",
                    datagram.len(),
                    self.peer,
                    e
                );
            }
        }
    }

    /// Release everything once; returns false if already torn down
    fn teardown(&self, reason: Teardown) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.cancel.cancel();
        lock(&self.socket).take();

        if let Some(mut codec) = lock(&self.codec).take() {
            let stats = codec.stats();
            codec.release();
            log_stats(self.peer, &stats);
        }

        if let Some(events) = lock(&self.events).take() {
            match reason {
                Teardown::Ended => {
                    tracing::debug!("Bridge to {} ended", self.peer);
                    let _ = events.ended.send(());
                }
                Teardown::Closed(error) => {
                    tracing::info!(
                        "Bridge to {} closed: {}",
                        self.peer,
                        error.as_deref().unwrap_or("no error")
                    );
                    let _ = events.closed.send(error);
                }
            }
        }
        true
    }
}

fn log_stats(peer: SocketAddr, stats: &CodecStats) {
    tracing::info!(
        "Bridge to {} released: {} datagrams in ({} bytes), {} out ({} bytes), {} decode errors",
        peer,
        stats.datagrams_in,
        stats.bytes_in,
        stats.datagrams_out,
        stats.bytes_out,
        stats.decode_errors
    );
}

/// A live UDP bridge to one remote transport server
pub struct TransportBridge {
    inner: Arc<BridgeInner>,
    local_addr: SocketAddr,
}

impl TransportBridge {
    /// Create the codec, bind and connect the socket, and start the tick
    ///
    /// The returned subscription is registered before any datagram can be
    /// received.
    pub async fn connect(
        config: &BridgeConfig,
        factory: &dyn CodecFactory,
    ) -> Result<(Self, BridgeSubscription), BridgeError> {
        let mut codec = factory.create(&config.session_key, config.mtu)?;

        let (socket, peer, local_addr) = match open_socket(&config.host, config.udp_port).await {
            Ok(opened) => opened,
            Err(e) => {
                codec.release();
                return Err(e);
            }
        };
        let socket = Arc::new(socket);

        let events = EventSenders::new();
        let subscription = events.subscribe();

        let inner = Arc::new(BridgeInner {
            peer,
            socket: Mutex::new(Some(Arc::clone(&socket))),
            codec: Mutex::new(Some(codec)),
            events: Mutex::new(Some(events)),
            torn_down: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(run_bridge(Arc::clone(&inner), socket, config.tick_interval));

        tracing::info!(
            "Bridge open {} -> {} (key {}, mtu {})",
            local_addr,
            peer,
            config.session_key,
            config.mtu
        );
        Ok((Self { inner, local_addr }, subscription))
    }

    /// Encode and send application bytes
    ///
    /// Codec errors are logged and swallowed. A socket error tears the
    /// bridge down and is reported both here and through `closed`.
    pub async fn send(&self, data: &[u8]) -> Result<(), BridgeError> {
        if self.inner.is_torn_down() {
            return Err(BridgeError::Ended);
        }

        let now = monotonic_millis();
        let datagrams = match self.inner.with_codec(|codec| codec.outbound(data, now)) {
            None => return Err(BridgeError::Ended),
            Some(Ok(datagrams)) => datagrams,
            Some(Err(e)) => {
                tracing::warn!("Codec rejected {} outbound bytes: {}", data.len(), e);
                return Ok(());
            }
        };

        if let Err(e) = self.inner.send_all(datagrams).await {
            tracing::warn!("UDP send to {} failed: {}", self.inner.peer, e);
            self.inner
                .teardown(Teardown::Closed(Some(e.to_string())));
            return Err(BridgeError::Socket(e));
        }
        Ok(())
    }

    /// End the bridge; further calls do nothing
    pub fn end(&self) {
        self.inner.teardown(Teardown::Ended);
    }

    /// Tear down with an error, as if the network had failed
    pub(crate) fn fail(&self, reason: String) {
        self.inner.teardown(Teardown::Closed(Some(reason)));
    }

    /// Whether the bridge has been torn down
    pub fn is_ended(&self) -> bool {
        self.inner.is_torn_down()
    }

    /// Another set of receivers
    ///
    /// After teardown the receivers report closure immediately.
    pub fn subscribe(&self) -> BridgeSubscription {
        match lock(&self.inner.events).as_ref() {
            Some(events) => events.subscribe(),
            None => EventSenders::new().subscribe(),
        }
    }

    /// Remote endpoint
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Local endpoint
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Codec counters while the bridge is live
    pub fn stats(&self) -> Option<CodecStats> {
        self.inner.with_codec(|codec| codec.stats())
    }
}

impl Drop for TransportBridge {
    fn drop(&mut self) {
        self.inner.teardown(Teardown::Ended);
    }
}

async fn open_socket(
    host: &str,
    port: u16,
) -> Result<(UdpSocket, SocketAddr, SocketAddr), BridgeError> {
    let peer = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| BridgeError::Resolve {
            host: host.to_string(),
            message: e.to_string(),
        })?
        .next()
        .ok_or_else(|| BridgeError::Resolve {
            host: host.to_string(),
            message: "no addresses returned".to_string(),
        })?;

    let bind: SocketAddr = if peer.is_ipv6() {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(bind).await?;
    socket.connect(peer).await?;
    let local_addr = socket.local_addr()?;
    Ok((socket, peer, local_addr))
}

async fn run_bridge(inner: Arc<BridgeInner>, socket: Arc<UdpSocket>, tick_interval: Duration) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,

            _ = ticker.tick() => inner.on_tick().await,

            result = socket.recv(&mut buf) => match result {
                Ok(n) => inner.on_datagram(&buf[..n]),
                Err(e) => {
                    tracing::warn!("UDP receive from {} failed: {}", inner.peer, e);
                    inner.teardown(Teardown::Closed(Some(e.to_string())));
                    break;
                }
            },
        }
    }

    tracing::trace!("Bridge task for {} exiting", inner.peer);
}
