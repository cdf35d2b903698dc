//! Shared fixtures for the pipeline tests

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use rl_core::RoamConfig;

pub const KEY: &str = "4NeCCgvZFe2RnPgrcU1PQw==";
pub const VERSION: &str = "0123456789abcdef0123456789abcdef01234567";

/// Loopback UDP server echoing every datagram back to its sender
pub struct EchoServer {
    pub port: u16,
    task: JoinHandle<()>,
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn echo_server() -> EchoServer {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; 65_536];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    EchoServer { port, task }
}

/// Handshake line as the transport server prints it
pub fn connect_line(port: u16) -> String {
    format!("\r\nMOSH CONNECT {} {}\r\n", port, KEY)
}

/// Config with short timeouts and a pinned agent version
pub fn test_config() -> RoamConfig {
    let mut config = RoamConfig::default();
    config.handshake.timeout = Duration::from_secs(2);
    config.agent.version = Some(VERSION.to_string());
    config.agent.exec_timeout = Duration::from_secs(2);
    config.agent.install_timeout = Duration::from_secs(2);
    config.agent.start_timeout = Duration::from_secs(2);
    config.transport.tick_interval = Duration::from_millis(20);
    config
}
