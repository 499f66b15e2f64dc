//! IpcChannel behaviour against an in-process fake engine.
mod support;

use std::sync::Arc;
use std::time::Duration;

use svcmon::ipc::{ChannelState, IpcChannel, IpcError};
use svcmon::types::Request;
use support::{standard_reply, FakeEngine};

const T: Duration = Duration::from_secs(2);

fn engine() -> FakeEngine {
    FakeEngine::new(|req| standard_reply(req, &[("Spooler", 1.5, 20.0), ("W32Time", 0.1, 4.0)], true))
}

#[tokio::test]
async fn concurrent_requests_never_overlap() {
    let engine = engine().with_delay(Duration::from_millis(15));
    let channel = Arc::new(IpcChannel::new(engine.clone()));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let ch = channel.clone();
        let target = if i % 2 == 0 { "Spooler" } else { "W32Time" };
        tasks.push(tokio::spawn(async move { ch.send(&Request::status(target), T).await }));
    }
    for t in tasks {
        assert!(t.await.unwrap().unwrap().is_ok());
    }

    let log = engine.log();
    assert_eq!(log.len(), 16);
    for pair in log.chunks(2) {
        let open = pair[0].strip_prefix("open ").expect("round trip must start with open");
        let close = pair[1].strip_prefix("close ").expect("and end with close");
        assert_eq!(open, close, "interleaved round trips: {log:?}");
    }
    assert_eq!(engine.connects(), 1);
}

#[tokio::test]
async fn never_connected_channel_degrades_then_recovers() {
    let engine = engine();
    engine.set_up(false);
    let channel = IpcChannel::new(engine.clone()).with_connect_timeout(Duration::from_millis(200));
    assert_eq!(channel.state(), ChannelState::Disconnected);

    let err = channel.send(&Request::ping(), T).await.unwrap_err();
    assert!(matches!(err, IpcError::NotConnected));
    assert_eq!(channel.state(), ChannelState::Faulted);
    assert!(!channel.ping(T).await);

    engine.set_up(true);
    channel.connect(T).await.unwrap();
    assert!(channel.is_connected());
    assert!(channel.ping(T).await);
}

#[tokio::test]
async fn send_connects_implicitly_once() {
    let engine = engine();
    let channel = IpcChannel::new(engine.clone());
    let snap = channel.send(&Request::status("spooler"), T).await.unwrap();
    assert_eq!(snap.cpu_percent, 1.5);
    assert_eq!(snap.uptime_seconds, 42);
    channel.send(&Request::all_status(), T).await.unwrap();
    assert_eq!(engine.connects(), 1);
}

#[tokio::test]
async fn peer_hangup_tears_down_and_next_call_reconnects() {
    let engine = FakeEngine::new(|req| match req["command"].as_str() {
        Some("GET_STATUS") => None,
        _ => standard_reply(req, &[], true),
    });
    let channel = IpcChannel::new(engine.clone());
    let mut states = channel.subscribe();

    let err = channel.send(&Request::status("x"), T).await.unwrap_err();
    assert!(matches!(err, IpcError::PeerClosed));
    assert_eq!(*states.borrow_and_update(), ChannelState::Disconnected);

    assert!(channel.ping(T).await);
    assert_eq!(engine.connects(), 2);
}

#[tokio::test]
async fn slow_reply_times_out_and_drops_connection() {
    let engine = engine().with_delay(Duration::from_millis(500));
    let channel = IpcChannel::new(engine.clone());
    let err = channel
        .send(&Request::ping(), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, IpcError::Timeout("request", _)));
    assert_eq!(channel.state(), ChannelState::Disconnected);
}

#[tokio::test]
async fn malformed_reply_is_a_protocol_error() {
    let engine = FakeEngine::new(|_| Some("not json".to_string()));
    let channel = IpcChannel::new(engine);
    let err = channel.send(&Request::ping(), T).await.unwrap_err();
    assert!(matches!(err, IpcError::Protocol(_)));
}

#[tokio::test]
async fn status_without_target_fails_before_connecting() {
    let engine = engine();
    let channel = IpcChannel::new(engine.clone());
    let err = channel.send(&Request::status(""), T).await.unwrap_err();
    assert!(matches!(err, IpcError::Protocol(_)));
    assert_eq!(engine.connects(), 0);
}

#[tokio::test]
async fn disconnect_is_safe_when_idle() {
    let channel = IpcChannel::new(engine());
    channel.disconnect().await;
    channel.disconnect().await;
    assert_eq!(channel.state(), ChannelState::Disconnected);
}

#[cfg(unix)]
mod unix_socket {
    use super::*;
    use svcmon::frame::{read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES};
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn round_trips_over_a_real_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while let Ok(req) = read_frame(&mut stream, DEFAULT_MAX_FRAME_BYTES).await {
                let req: serde_json::Value = serde_json::from_slice(&req).unwrap();
                let reply = standard_reply(&req, &[("cron", 0.5, 3.0), ("sshd", 0.0, 6.5)], true).unwrap();
                write_frame(&mut stream, reply.as_bytes(), DEFAULT_MAX_FRAME_BYTES)
                    .await
                    .unwrap();
            }
        });

        let channel = IpcChannel::local(path.to_str().unwrap());
        assert!(channel.ping(T).await);
        let snap = channel.send(&Request::all_status(), T).await.unwrap();
        let names: Vec<_> = snap
            .per_entity
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["cron", "sshd"]);
    }

    #[tokio::test]
    async fn missing_socket_is_not_connected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");
        let channel = IpcChannel::local(path.to_str().unwrap());
        assert!(matches!(
            channel.send(&Request::ping(), T).await,
            Err(IpcError::NotConnected)
        ));
        assert_eq!(channel.state(), ChannelState::Faulted);
    }
}
