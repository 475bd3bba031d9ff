// Live-socket tests for `DeviceLink` against a loopback tungstenite server:
// connect coalescing, round-trip send, and reconnect with surviving
// subscriptions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use flowcon_link::{DeviceLink, Envelope, LinkConfig, LinkError, LinkState};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the loopback device does with each accepted connection.
#[derive(Clone, Copy)]
enum ServerScript {
    /// Echo every text frame back unchanged.
    Echo,
    /// Send one `state_changed` frame, then close the connection.
    AnnounceAndClose,
}

/// Spawn a loopback WebSocket server; returns its config and a counter of
/// accepted connections.
async fn spawn_device(script: ServerScript) -> (LinkConfig, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("local addr");
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                match script {
                    ServerScript::Echo => {
                        while let Some(Ok(frame)) = ws.next().await {
                            if let Message::Text(text) = frame {
                                if ws.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    ServerScript::AnnounceAndClose => {
                        let announce = serde_json::to_string(&Envelope::full("state_changed"))
                            .expect("serialize announce");
                        let _ = ws.send(Message::Text(announce.into())).await;
                        let _ = ws.send(Message::Close(None)).await;
                    }
                }
            });
        }
    });

    let url = format!("ws://{addr}").parse().expect("loopback url");
    let mut config = LinkConfig::new(url);
    config.reconnect_delay = Duration::from_millis(50);
    (config, accepted)
}

// ── Connect coalescing ───────────────────────────────────────────────

#[tokio::test]
async fn concurrent_connects_share_one_socket() {
    init_tracing();
    let (config, accepted) = spawn_device(ServerScript::Echo).await;
    let link = DeviceLink::new(config);

    let mut joins = Vec::new();
    for _ in 0..8 {
        let link = link.clone();
        joins.push(tokio::spawn(async move { link.connect().await }));
    }
    for join in joins {
        join.await.expect("join").expect("connect succeeds");
    }

    assert_eq!(*link.state().borrow(), LinkState::Open);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    link.shutdown();
}

#[tokio::test]
async fn connect_failure_rejects_all_joined_callers() {
    init_tracing();
    // Nothing listens on this port; every coalesced caller sees the failure.
    let config = LinkConfig::new("ws://127.0.0.1:1".parse().expect("static url"));
    let link = DeviceLink::new(config);

    let a = link.clone();
    let b = link.clone();
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.connect().await }),
        tokio::spawn(async move { b.connect().await }),
    );

    assert!(ra.expect("join").is_err());
    assert!(rb.expect("join").is_err());

    link.shutdown();
}

#[tokio::test]
async fn shutdown_unblocks_a_pending_connect() {
    init_tracing();
    // A listener that accepts TCP but never answers the WebSocket
    // handshake, so the connect attempt stays in flight indefinitely.
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let config = LinkConfig::new(format!("ws://{addr}").parse().expect("loopback url"));
    let link = DeviceLink::new(config);

    let pending = tokio::spawn({
        let link = link.clone();
        async move { link.connect().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    link.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("connect() must resolve after shutdown")
        .expect("join");
    assert!(matches!(result, Err(LinkError::Closed { .. })));
}

// ── Round trip ───────────────────────────────────────────────────────

#[tokio::test]
async fn sent_frames_come_back_through_the_subscription() {
    init_tracing();
    let (config, _) = spawn_device(ServerScript::Echo).await;
    let link = DeviceLink::new(config);

    let mut frames = link.subscribe();
    link.connect().await.expect("connect");

    link.send(&Envelope::stream("write_config", "S1"));

    let frame = tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("frame before deadline")
        .expect("broadcast alive");
    assert_eq!(frame.command, "write_config");
    assert_eq!(frame.stream_id.as_deref(), Some("S1"));

    link.shutdown();
}

// ── Reconnect ────────────────────────────────────────────────────────

#[tokio::test]
async fn subscribers_survive_reconnect() {
    init_tracing();
    let (config, accepted) = spawn_device(ServerScript::AnnounceAndClose).await;
    let link = DeviceLink::new(config);

    // Subscribe once, before the first connect, and never re-register.
    let mut frames = link.subscribe();
    link.connect().await.expect("connect");

    let deadline = Duration::from_secs(5);
    let first = tokio::time::timeout(deadline, frames.recv())
        .await
        .expect("first announce before deadline")
        .expect("broadcast alive");
    assert_eq!(first.command, "state_changed");

    // The server closed the socket after announcing; the link reconnects on
    // its own and the same subscription sees the second announce.
    let second = tokio::time::timeout(deadline, frames.recv())
        .await
        .expect("second announce before deadline")
        .expect("broadcast alive");
    assert_eq!(second.command, "state_changed");

    assert!(accepted.load(Ordering::SeqCst) >= 2);

    link.shutdown();
}
