//! Test helpers: a counting echo codec and a loopback UDP echo server

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use rl_protocol::{CodecError, CodecFactory, CodecStats, SessionKey, TransportCodec};

/// Datagram the codec emits on every tick
pub const HEARTBEAT: u8 = 0x00;

/// First byte the codec refuses to decode
pub const POISON: u8 = 0xFF;

#[derive(Debug, Default)]
struct Counters {
    created: AtomicUsize,
    releases: AtomicUsize,
    ticks: AtomicUsize,
}

/// Factory for [`CountingCodec`]s sharing one set of counters
#[derive(Debug, Default, Clone)]
pub struct CountingCodecFactory {
    counters: Arc<Counters>,
}

impl CountingCodecFactory {
    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.counters.releases.load(Ordering::SeqCst)
    }

    pub fn ticks(&self) -> usize {
        self.counters.ticks.load(Ordering::SeqCst)
    }
}

impl CodecFactory for CountingCodecFactory {
    fn create(&self, _key: &SessionKey, _mtu: usize) -> Result<Box<dyn TransportCodec>, CodecError> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingCodec {
            counters: Arc::clone(&self.counters),
            stats: CodecStats::default(),
            released: false,
        }))
    }
}

/// Passes bytes through unchanged, one datagram per send
pub struct CountingCodec {
    counters: Arc<Counters>,
    stats: CodecStats,
    released: bool,
}

impl TransportCodec for CountingCodec {
    fn inbound(&mut self, datagram: &[u8], _now_ms: u64) -> Result<Bytes, CodecError> {
        if self.released {
            return Ok(Bytes::new());
        }
        self.stats.datagrams_in += 1;
        self.stats.bytes_in += datagram.len() as u64;
        match datagram.first() {
            Some(&POISON) => {
                self.stats.decode_errors += 1;
                Err(CodecError::Engine("poisoned datagram".to_string()))
            }
            Some(&HEARTBEAT) if datagram.len() == 1 => Ok(Bytes::new()),
            _ => Ok(Bytes::copy_from_slice(datagram)),
        }
    }

    fn outbound(&mut self, data: &[u8], _now_ms: u64) -> Result<Vec<Bytes>, CodecError> {
        if self.released {
            return Err(CodecError::Released);
        }
        self.stats.datagrams_out += 1;
        self.stats.bytes_out += data.len() as u64;
        Ok(vec![Bytes::copy_from_slice(data)])
    }

    fn tick(&mut self, _now_ms: u64) -> Result<Vec<Bytes>, CodecError> {
        if self.released {
            return Ok(Vec::new());
        }
        self.counters.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Bytes::from_static(&[HEARTBEAT])])
    }

    fn stats(&self) -> CodecStats {
        self.stats
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A UDP server on loopback that echoes every datagram
pub struct EchoServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl EchoServer {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn spawn_echo_server() -> EchoServer {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; 65_536];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    EchoServer { addr, task }
}
