//! End-to-end resolve and connect against scripted remotes

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use rl_core::{ChannelErrorKind, ConnectionTarget};
use rl_protocol::{HandshakeResult, PlainCodecFactory};
use rl_remote::testing::{ScriptedChannel, ScriptedConnector, Step};
use rl_session::{ChannelEvent, ResolveError, ResolveStage, Session, SessionOrchestrator};

use common::{connect_line, echo_server, test_config, KEY};

const AUTHORITY: &str = "ssh-udp+dev@127.0.0.1";

fn orchestrator(connector: ScriptedConnector) -> SessionOrchestrator {
    SessionOrchestrator::new(test_config(), Arc::new(connector), Arc::new(PlainCodecFactory))
}

#[tokio::test]
async fn test_bootstrap_failure_degrades_to_no_agent() {
    let channel = ScriptedChannel::new()
        .on("mosh-server", vec![Step::StdoutOwned(connect_line(60001)), Step::Hang])
        .on("uname -m", vec![Step::Stdout("x86_64\n"), Step::Exit(0)])
        .on(
            "curl",
            vec![Step::Stderr("download failed after 3 attempts\n"), Step::Exit(3)],
        );
    let log = channel.log();
    let orch = orchestrator(ScriptedConnector::new(channel));

    let resolved = orch.resolve(AUTHORITY, 0).await.unwrap();
    assert_eq!(resolved.udp_port, 60001);
    assert!(resolved.agent.is_none());
    assert_eq!(resolved.summary().session_key, "4NeC...");
    assert_eq!(log.closes(), 1);
    assert_eq!(log.count("--start-server"), 0);
}

#[tokio::test]
async fn test_installed_agent_is_started() {
    let channel = ScriptedChannel::new()
        .on("mosh-server", vec![Step::StdoutOwned(connect_line(60002)), Step::Hang])
        .on("uname -m", vec![Step::Stdout("aarch64\n"), Step::Exit(0)])
        .on(
            "--start-server",
            vec![
                Step::Stdout("roamlink-agent-pid: 4242\n"),
                Step::Delay(Duration::from_millis(10)),
                Step::Stdout("*\n* Visual Studio Code Server\n*\n"),
                Step::Stdout("Extension host agent listening on 39423\n"),
                Step::Hang,
            ],
        )
        .on("[ -f", vec![Step::Exit(0)]);
    let log = channel.log();
    let orch = orchestrator(ScriptedConnector::new(channel));
    let mut stages = orch.subscribe_stage();

    let resolved = orch.resolve(AUTHORITY, 0).await.unwrap();
    let agent = resolved.agent.expect("agent should be running");
    assert_eq!(agent.listen_port, 39423);
    assert_eq!(agent.pid, Some(4242));
    assert_eq!(log.count("curl"), 0);
    assert_eq!(*stages.borrow_and_update(), ResolveStage::SessionReady);
}

#[tokio::test]
async fn test_retry_disposes_before_connecting() {
    let orch = orchestrator(ScriptedConnector::failing(ChannelErrorKind::Refused));

    let target = ConnectionTarget::parse(AUTHORITY, 60001).unwrap();
    let handshake = HandshakeResult::parse(&connect_line(60001)).unwrap();
    let old = Arc::new(Session::new(
        AUTHORITY,
        target,
        handshake,
        None,
        1280,
        Duration::from_millis(50),
    ));
    orch.registry().insert(Arc::clone(&old));

    let err = orch.resolve(AUTHORITY, 1).await.unwrap_err();
    assert!(old.is_disposed());
    assert!(orch.registry().is_empty());
    assert_eq!(err.stage(), ResolveStage::ConnectingControl);
    match err {
        ResolveError::Channel(e) => assert_eq!(e.kind, ChannelErrorKind::Refused),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_handshake_timeout_carries_output() {
    let channel = ScriptedChannel::new().on(
        "mosh-server",
        vec![Step::Stdout("mosh-server (mosh 1.4.0)\n"), Step::Hang],
    );
    let mut config = test_config();
    config.handshake.timeout = Duration::from_millis(100);
    let orch = SessionOrchestrator::new(
        config,
        Arc::new(ScriptedConnector::new(channel)),
        Arc::new(PlainCodecFactory),
    );

    let err = orch.resolve(AUTHORITY, 0).await.unwrap_err();
    assert!(matches!(err, ResolveError::HandshakeTimeout { .. }));
    assert!(err.output().unwrap().contains("mosh 1.4.0"));
    assert!(!err.hint().is_empty());
}

#[tokio::test]
async fn test_message_channel_over_loopback() {
    let server = echo_server().await;
    let channel = ScriptedChannel::new()
        .on("mosh-server", vec![Step::StdoutOwned(connect_line(server.port)), Step::Hang]);
    let mut config = test_config();
    config.agent.enabled = false;
    let orch = SessionOrchestrator::new(
        config,
        Arc::new(ScriptedConnector::new(channel)),
        Arc::new(PlainCodecFactory),
    );

    let resolved = orch.resolve(AUTHORITY, 0).await.unwrap();
    let mut messages = resolved.connector.connect().await.unwrap();
    messages.send(b"hello over udp").await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), messages.next_event())
        .await
        .unwrap();
    assert_eq!(
        event,
        Some(ChannelEvent::Message(Bytes::from_static(b"hello over udp")))
    );
    assert!(resolved.summary().bridge_active);

    // A second connect replaces the bridge and ends the first channel
    let mut replacement = resolved.connector.connect().await.unwrap();
    assert_eq!(messages.next_event().await, Some(ChannelEvent::Ended));

    replacement.send(b"again").await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), replacement.next_event())
        .await
        .unwrap();
    assert_eq!(event, Some(ChannelEvent::Message(Bytes::from_static(b"again"))));

    orch.shutdown();
    assert_eq!(replacement.next_event().await, Some(ChannelEvent::Ended));
    assert!(orch.sessions().is_empty());
}

#[test]
fn test_fixture_key_is_valid() {
    assert!(HandshakeResult::parse(&format!("MOSH CONNECT 1 {}\n", KEY)).is_some());
}
