//! Connect command implementation
//!
//! Pipes stdin into the message channel and channel messages to stdout.
//! When the network closes the channel the authority is re-resolved with
//! a growing delay until the reconnect budget runs out.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use rl_session::{
    BridgeError, ChannelEvent, ExponentialBackoff, MessageChannel, ResolveError,
    SessionOrchestrator, UDP_PORT_HINT,
};

use crate::output::{print_error, print_info, print_success, print_warning};

const INPUT_CHUNK: usize = 16 * 1024;

/// How a channel stopped
#[derive(Debug)]
enum Outcome {
    /// Local input reached EOF
    InputClosed,
    /// Ended locally, e.g. by shutdown
    Ended,
    /// Closed by the network or the codec
    Closed(Option<String>),
}

/// Connect to `authority` over stdin and stdout
pub async fn connect_command(orchestrator: Arc<SessionOrchestrator>, authority: &str) -> Result<()> {
    print_info(&format!("Connecting to {}...", authority));
    let mut stdout = tokio::io::stdout();
    run_session(orchestrator, authority, tokio::io::stdin(), &mut stdout).await
}

/// Pump `input` and `output` through a session, reconnecting on failure
pub async fn run_session<R, W>(
    orchestrator: Arc<SessionOrchestrator>,
    authority: &str,
    input: R,
    output: &mut W,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let reconnect = orchestrator.config().reconnect.clone();
    let mut backoff = ExponentialBackoff::from_config(&reconnect.backoff);
    let mut input = spawn_input(input);
    let mut pending = None;
    let mut attempt = 0u32;
    let mut last_hint = UDP_PORT_HINT;

    loop {
        match open_channel(&orchestrator, authority, attempt).await {
            Ok(mut channel) => {
                backoff.reset();
                if attempt > 0 {
                    print_success(&format!("Reconnected to {}", authority));
                }

                match pump(&mut channel, &mut input, &mut pending, output).await? {
                    Outcome::InputClosed => {
                        tracing::debug!("Input closed, ending channel to {}", authority);
                        channel.drain().await;
                        channel.end();
                        return Ok(());
                    }
                    Outcome::Ended => return Ok(()),
                    Outcome::Closed(reason) => {
                        print_warning(&format!(
                            "Connection to {} lost: {}",
                            authority,
                            reason.as_deref().unwrap_or("closed by peer")
                        ));
                        last_hint = UDP_PORT_HINT;
                    }
                }
            }
            Err(e) if should_retry(&e) => {
                print_warning(&format!("{:#}", e));
                if let Some(hint) = failure_hint(&e) {
                    last_hint = hint;
                }
            }
            Err(e) => {
                print_error(&format!("{:#}", e));
                if let Some(hint) = failure_hint(&e) {
                    print_info(hint);
                }
                return Err(e);
            }
        }

        if backoff.attempts() >= reconnect.max_attempts {
            print_info(last_hint);
            anyhow::bail!(
                "Giving up on {} after {} reconnect attempts",
                authority,
                reconnect.max_attempts
            );
        }
        let delay = backoff.next_delay();
        tracing::info!("Reconnecting to {} in {:?}", authority, delay);
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

async fn open_channel(
    orchestrator: &SessionOrchestrator,
    authority: &str,
    attempt: u32,
) -> Result<MessageChannel> {
    let resolved = orchestrator.resolve(authority, attempt).await?;
    let channel = resolved.connector.connect().await.with_context(|| {
        format!(
            "Failed to open transport to {}:{}",
            resolved.host, resolved.udp_port
        )
    })?;
    Ok(channel)
}

fn should_retry(err: &anyhow::Error) -> bool {
    if let Some(e) = err.downcast_ref::<ResolveError>() {
        return e.is_temporary();
    }
    !matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::Disposed)
    )
}

/// Remediation hint for a failed resolve or bridge open
fn failure_hint(err: &anyhow::Error) -> Option<&'static str> {
    if let Some(e) = err.downcast_ref::<ResolveError>() {
        return Some(e.hint());
    }
    err.downcast_ref::<BridgeError>().map(BridgeError::hint)
}

/// Read input on its own task so a reconnect never loses buffered bytes
fn spawn_input<R>(mut input: R) -> mpsc::Receiver<Bytes>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut buf = vec![0u8; INPUT_CHUNK];
        loop {
            match input.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Move bytes until the channel stops
///
/// A chunk the channel refused is parked in `pending` and goes out first on
/// the next channel. No further input is read while one is parked.
async fn pump<W>(
    channel: &mut MessageChannel,
    input: &mut mpsc::Receiver<Bytes>,
    pending: &mut Option<Bytes>,
    output: &mut W,
) -> Result<Outcome>
where
    W: AsyncWrite + Unpin,
{
    if let Some(bytes) = pending.take() {
        match channel.send(&bytes).await {
            Ok(()) => tracing::debug!("Resent {} held input bytes", bytes.len()),
            Err(e) => {
                tracing::debug!("Still holding {} input bytes: {}", bytes.len(), e);
                *pending = Some(bytes);
            }
        }
    }

    loop {
        tokio::select! {
            event = channel.next_event() => match event {
                Some(ChannelEvent::Message(bytes)) => {
                    tracing::trace!("Writing {} bytes to output", bytes.len());
                    output.write_all(&bytes).await.context("Failed to write output")?;
                    output.flush().await.context("Failed to flush output")?;
                }
                Some(ChannelEvent::Closed(reason)) => return Ok(Outcome::Closed(reason)),
                Some(ChannelEvent::Ended) | None => return Ok(Outcome::Ended),
            },

            chunk = input.recv(), if pending.is_none() => match chunk {
                Some(bytes) => {
                    if let Err(e) = channel.send(&bytes).await {
                        // The close event that follows decides what happens next
                        tracing::debug!("Holding {} input bytes: {}", bytes.len(), e);
                        *pending = Some(bytes);
                    }
                }
                None => return Ok(Outcome::InputClosed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rl_core::{ChannelErrorKind, RoamConfig};
    use rl_protocol::PlainCodecFactory;
    use rl_remote::testing::{ScriptedChannel, ScriptedConnector, Step};
    use std::time::Duration;
    use tokio::net::UdpSocket;

    const KEY: &str = "4NeCCgvZFe2RnPgrcU1PQw==";

    fn config() -> RoamConfig {
        let mut config = RoamConfig::default();
        config.agent.enabled = false;
        config.handshake.timeout = Duration::from_secs(2);
        config.reconnect.max_attempts = 2;
        config.reconnect.backoff.initial = Duration::from_millis(1);
        config.reconnect.backoff.max = Duration::from_millis(5);
        config
    }

    #[tokio::test]
    async fn test_round_trip_until_input_closes() {
        let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = echo.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut buf = vec![0u8; 65_536];
            while let Ok((n, from)) = echo.recv_from(&mut buf).await {
                let _ = echo.send_to(&buf[..n], from).await;
            }
        });

        let channel = ScriptedChannel::new().on(
            "mosh-server",
            vec![
                Step::StdoutOwned(format!("MOSH CONNECT {} {}\n", port, KEY)),
                Step::Hang,
            ],
        );
        let orchestrator = Arc::new(SessionOrchestrator::new(
            config(),
            Arc::new(ScriptedConnector::new(channel)),
            Arc::new(PlainCodecFactory),
        ));

        let (mut input_tx, input_rx) = tokio::io::duplex(1024);
        let (output_tx, mut output_rx) = tokio::io::duplex(1024);
        let session = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let mut output_tx = output_tx;
                run_session(orchestrator, "ssh-udp+127.0.0.1", input_rx, &mut output_tx).await
            }
        });

        input_tx.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(5), output_rx.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&echoed, b"ping");

        drop(input_tx);
        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let connector = ScriptedConnector::failing(ChannelErrorKind::Refused);
        let orchestrator = Arc::new(SessionOrchestrator::new(
            config(),
            Arc::new(connector.clone()),
            Arc::new(PlainCodecFactory),
        ));

        let (_input_tx, input_rx) = tokio::io::duplex(64);
        let mut output = Vec::new();
        let err = run_session(orchestrator, "ssh-udp+devbox", input_rx, &mut output)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Giving up"));
        assert_eq!(connector.connects().len(), 3);
    }

    #[tokio::test]
    async fn test_handshake_exit_is_retried() {
        let channel = ScriptedChannel::new().on(
            "mosh-server",
            vec![Step::Stderr("mosh-server: bind failed\n"), Step::Exit(1)],
        );
        let connector = ScriptedConnector::new(channel);
        let orchestrator = Arc::new(SessionOrchestrator::new(
            config(),
            Arc::new(connector.clone()),
            Arc::new(PlainCodecFactory),
        ));

        let (_input_tx, input_rx) = tokio::io::duplex(64);
        let mut output = Vec::new();
        let err = run_session(orchestrator, "ssh-udp+devbox", input_rx, &mut output)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Giving up"));
        assert_eq!(connector.connects().len(), 3);
    }

    #[tokio::test]
    async fn test_held_input_goes_out_on_next_channel() {
        let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = echo.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut buf = vec![0u8; 65_536];
            while let Ok((n, from)) = echo.recv_from(&mut buf).await {
                let _ = echo.send_to(&buf[..n], from).await;
            }
        });
        let channel = ScriptedChannel::new().on(
            "mosh-server",
            vec![
                Step::StdoutOwned(format!("MOSH CONNECT {} {}\n", port, KEY)),
                Step::Hang,
            ],
        );
        let orchestrator = SessionOrchestrator::new(
            config(),
            Arc::new(ScriptedConnector::new(channel)),
            Arc::new(PlainCodecFactory),
        );
        let resolved = orchestrator.resolve("ssh-udp+127.0.0.1", 0).await.unwrap();

        let (input_tx, mut input) = mpsc::channel::<Bytes>(4);
        let mut pending = Some(Bytes::from_static(b"held"));
        let mut output = Vec::new();

        let mut first = resolved.connector.connect().await.unwrap();
        first.end();
        let outcome = pump(&mut first, &mut input, &mut pending, &mut output)
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Ended));
        assert_eq!(pending.as_deref(), Some(&b"held"[..]));

        let mut second = resolved.connector.connect().await.unwrap();
        let (mut out_tx, mut out_rx) = tokio::io::duplex(64);
        let pumping = tokio::spawn(async move {
            let outcome = pump(&mut second, &mut input, &mut pending, &mut out_tx).await;
            (outcome, pending)
        });

        let mut echoed = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(5), out_rx.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&echoed, b"held");

        drop(input_tx);
        let (outcome, pending) = tokio::time::timeout(Duration::from_secs(5), pumping)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome.unwrap(), Outcome::InputClosed));
        assert!(pending.is_none());
        server.abort();
    }

    #[test]
    fn test_failure_hints() {
        let err = anyhow::Error::new(BridgeError::Socket(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "in use",
        )))
        .context("Failed to open transport to devbox:60001");
        assert_eq!(failure_hint(&err), Some(UDP_PORT_HINT));
        assert!(should_retry(&err));

        let err = anyhow::Error::new(ResolveError::from(rl_core::ChannelError::new(
            ChannelErrorKind::HostKey,
            "mismatch",
        )));
        assert!(failure_hint(&err).unwrap().contains("known_hosts"));
        assert!(!should_retry(&err));

        let err = anyhow::Error::new(BridgeError::Disposed);
        assert!(!should_retry(&err));
        assert!(failure_hint(&anyhow::anyhow!("plain")).is_none());
    }

    #[tokio::test]
    async fn test_authentication_failure_is_fatal() {
        let connector = ScriptedConnector::failing(ChannelErrorKind::Authentication);
        let orchestrator = Arc::new(SessionOrchestrator::new(
            config(),
            Arc::new(connector.clone()),
            Arc::new(PlainCodecFactory),
        ));

        let (_input_tx, input_rx) = tokio::io::duplex(64);
        let mut output = Vec::new();
        let err = run_session(orchestrator, "ssh-udp+devbox", input_rx, &mut output)
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<ResolveError>().is_some());
        assert_eq!(connector.connects().len(), 1);
    }
}
