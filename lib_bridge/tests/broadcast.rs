//! End-to-end tests for the broadcast bridge over real sockets: start a
//! server on an ephemeral port, connect tungstenite clients, feed payloads
//! through `accept` and check what the clients observe.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lib_bridge::{BridgeConfig, BridgeError, BroadcastServer};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const MESSAGE_COUNT: usize = 100;
const CLIENT_COUNT: usize = 10;
const RECV_TIMEOUT: Duration = Duration::from_secs(10);
/// Mirrors the per-connection grace the server allows for close frames.
const CLOSE_FRAME_GRACE: Duration = Duration::from_millis(500);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> BridgeConfig {
    BridgeConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        path: "/some_websocket_path".to_string(),
        threads: 2,
        queue_depth: 32,
        send_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(5),
    }
}

async fn start_server() -> Arc<BroadcastServer> {
    let server = Arc::new(BroadcastServer::new(test_config()).expect("valid config"));
    server.start().await.expect("server failed to start");
    server
}

async fn connect_client(server: &BroadcastServer) -> Client {
    let addr = server.local_addr().expect("server not started");
    let url = format!("ws://{}{}", addr, server.config().path);
    let (client, _) = connect_async(url).await.expect("handshake failed");
    client
}

/// Waits until the server's registry holds exactly `count` connections.
async fn wait_for_clients(server: &BroadcastServer, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.connection_count() != count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {} registered client(s), have {}",
            count,
            server.connection_count()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn read_text_frames(client: &mut Client, count: usize) -> Vec<String> {
    let mut frames = Vec::with_capacity(count);
    while frames.len() < count {
        let msg = tokio::time::timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection ended before all frames arrived")
            .expect("transport error while reading frames");
        if let Message::Text(text) = msg {
            frames.push(text.as_str().to_string());
        }
    }
    frames
}

fn sequential_messages(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("message_{}", i)).collect()
}

fn message_index(frame: &str) -> usize {
    frame
        .strip_prefix("message_")
        .and_then(|n| n.parse().ok())
        .unwrap_or_else(|| panic!("unexpected frame payload: {:?}", frame))
}

#[tokio::test]
async fn multiple_messages_single_subscriber() {
    let server = start_server().await;
    let mut client = connect_client(&server).await;
    wait_for_clients(&server, 1).await;

    let messages = sequential_messages(MESSAGE_COUNT);
    for message in &messages {
        server.accept(message.as_bytes()).await.expect("accept failed");
    }

    let received = read_text_frames(&mut client, MESSAGE_COUNT).await;
    assert_eq!(received, messages);

    server.stop().await.expect("stop failed");
}

#[tokio::test]
async fn single_message_multiple_subscribers() {
    let server = start_server().await;
    let mut clients = Vec::with_capacity(CLIENT_COUNT);
    for _ in 0..CLIENT_COUNT {
        clients.push(connect_client(&server).await);
    }
    wait_for_clients(&server, CLIENT_COUNT).await;

    let payload = format!("payload_{:016x}", rand::random::<u64>());
    server.accept(payload.as_bytes()).await.expect("accept failed");

    for client in &mut clients {
        let received = read_text_frames(client, 1).await;
        assert_eq!(received, vec![payload.clone()]);
    }

    server.stop().await.expect("stop failed");
}

#[tokio::test]
async fn multiple_messages_multiple_subscribers() {
    let server = start_server().await;
    let mut clients = Vec::with_capacity(CLIENT_COUNT);
    for _ in 0..CLIENT_COUNT {
        clients.push(connect_client(&server).await);
    }
    wait_for_clients(&server, CLIENT_COUNT).await;

    let messages = sequential_messages(MESSAGE_COUNT);
    for message in &messages {
        server.accept(message.as_bytes()).await.expect("accept failed");
    }

    // Every client sees all messages, in order, identical across clients.
    for client in &mut clients {
        let received = read_text_frames(client, MESSAGE_COUNT).await;
        assert_eq!(received, messages);
    }

    server.stop().await.expect("stop failed");
}

#[tokio::test]
async fn late_subscriber_gets_no_replay() {
    let server = start_server().await;
    let mut early = connect_client(&server).await;
    wait_for_clients(&server, 1).await;

    server.accept(b"first").await.expect("accept failed");
    // Delivery to the early client confirms the first broadcast resolved.
    assert_eq!(read_text_frames(&mut early, 1).await, vec!["first".to_string()]);

    let mut late = connect_client(&server).await;
    wait_for_clients(&server, 2).await;

    server.accept(b"second").await.expect("accept failed");
    assert_eq!(read_text_frames(&mut late, 1).await, vec!["second".to_string()]);
    assert_eq!(read_text_frames(&mut early, 1).await, vec!["second".to_string()]);

    server.stop().await.expect("stop failed");
}

#[tokio::test]
async fn closed_client_is_removed_and_others_continue() {
    let server = start_server().await;
    let mut survivor = connect_client(&server).await;
    let mut leaver = connect_client(&server).await;
    wait_for_clients(&server, 2).await;

    leaver.close(None).await.expect("close failed");
    wait_for_clients(&server, 1).await;

    let messages = sequential_messages(10);
    for message in &messages {
        server.accept(message.as_bytes()).await.expect("accept failed");
    }
    assert_eq!(read_text_frames(&mut survivor, 10).await, messages);

    server.stop().await.expect("stop failed");
}

#[tokio::test]
async fn dropped_client_does_not_stall_the_broadcast() {
    let server = start_server().await;
    let mut survivor = connect_client(&server).await;
    let dropped = connect_client(&server).await;
    wait_for_clients(&server, 2).await;

    // No close handshake; the transport just goes away.
    drop(dropped);

    let messages = sequential_messages(MESSAGE_COUNT);
    for message in &messages {
        server.accept(message.as_bytes()).await.expect("accept failed");
    }
    assert_eq!(read_text_frames(&mut survivor, MESSAGE_COUNT).await, messages);

    wait_for_clients(&server, 1).await;

    server.stop().await.expect("stop failed");
}

#[tokio::test]
async fn lifecycle_is_enforced() {
    let server = BroadcastServer::new(test_config()).expect("valid config");
    assert!(matches!(server.accept(b"early").await, Err(BridgeError::NotRunning)));
    assert!(matches!(server.stop().await, Err(BridgeError::NotRunning)));
    assert!(server.local_addr().is_none());

    server.start().await.expect("server failed to start");
    assert!(matches!(server.start().await, Err(BridgeError::AlreadyStarted)));

    server.stop().await.expect("stop failed");
    assert!(matches!(server.accept(b"late").await, Err(BridgeError::NotRunning)));
    assert!(matches!(server.stop().await, Err(BridgeError::NotRunning)));
}

#[tokio::test]
async fn stop_closes_connections_within_the_timeout() {
    let server = start_server().await;
    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect_client(&server).await);
    }
    wait_for_clients(&server, 3).await;

    server.accept(b"in_flight").await.expect("accept failed");

    let started = tokio::time::Instant::now();
    server.stop().await.expect("stop failed");
    // Worst case: pool drain and listener join are each bounded by the
    // shutdown timeout, plus the close-frame grace for each connection.
    let worst_case = test_config().shutdown_timeout * 2 + CLOSE_FRAME_GRACE * 3;
    assert!(
        started.elapsed() < worst_case,
        "stop took {:?}, bound is {:?}",
        started.elapsed(),
        worst_case
    );
    assert_eq!(server.connection_count(), 0);

    // Every client's stream terminates once the server is gone.
    for mut client in clients {
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, client.next())
                .await
                .expect("client stream did not terminate")
            {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    }

    // The listener is released as well: new handshakes are refused.
    let addr = server.local_addr().expect("server was started");
    let url = format!("ws://{}{}", addr, server.config().path);
    assert!(connect_async(url).await.is_err());
}

#[tokio::test]
async fn subscriber_joining_mid_broadcast_sees_a_contiguous_suffix() {
    const STREAM_LEN: usize = 300;
    let server = start_server().await;
    let mut baseline = connect_client(&server).await;
    wait_for_clients(&server, 1).await;

    let producer = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            for message in sequential_messages(STREAM_LEN) {
                server.accept(message.as_bytes()).await.expect("accept failed");
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };

    // Handshakes landing mid-stream must be included in a broadcast entirely
    // or not at all: each joiner sees a duplicate-free run of consecutive
    // indices starting from its first frame, never a gap or a repeat.
    let mut joiners = Vec::new();
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let mut client = connect_client(&server).await;
        let received = read_text_frames(&mut client, 20).await;
        let first = message_index(&received[0]);
        for (offset, frame) in received.iter().enumerate() {
            assert_eq!(
                message_index(frame),
                first + offset,
                "joiner stream not contiguous: {:?}",
                received
            );
        }
        joiners.push(client);
    }

    producer.await.expect("producer task panicked");

    // The whole time, the baseline client saw every message in order.
    let received = read_text_frames(&mut baseline, STREAM_LEN).await;
    assert_eq!(received, sequential_messages(STREAM_LEN));

    drop(joiners);
    server.stop().await.expect("stop failed");
}

#[tokio::test]
async fn unresponsive_client_is_timed_out_and_removed() {
    let mut config = test_config();
    config.send_timeout = Duration::from_millis(200);
    let server = Arc::new(BroadcastServer::new(config).expect("valid config"));
    server.start().await.expect("server failed to start");

    let reader = connect_client(&server).await;
    let stalled = connect_client(&server).await;
    wait_for_clients(&server, 2).await;

    // The stalled client never reads. Frames large enough to overrun its
    // socket buffers stall the write until it runs into the send timeout,
    // which must evict the client rather than wedge its dispatch shard.
    let filler = "x".repeat(1024 * 1024);
    let messages: Vec<String> = (0..32).map(|i| format!("bulk_{:04}_{}", i, filler)).collect();

    // Drain the healthy client concurrently so only the stalled one backs up.
    let reader_task = tokio::spawn(async move {
        let mut reader = reader;
        let received = read_text_frames(&mut reader, 32).await;
        (reader, received)
    });
    for message in &messages {
        server.accept(message.as_bytes()).await.expect("accept failed");
    }

    let (reader, received) = reader_task.await.expect("reader task panicked");
    assert_eq!(received, messages);
    wait_for_clients(&server, 1).await;
    drop(reader);

    drop(stalled);
    server.stop().await.expect("stop failed");
}

#[tokio::test]
async fn handshakes_racing_stop_leave_no_registered_connections() {
    let server = start_server().await;
    let addr = server.local_addr().expect("server not started");
    let url = format!("ws://{}{}", addr, server.config().path);

    // Hammer the handshake path so some upgrades land in the window between
    // the lifecycle check and registration while stop is tearing down.
    let mut dialers = Vec::new();
    for _ in 0..16 {
        let url = url.clone();
        dialers.push(tokio::spawn(async move {
            loop {
                match connect_async(url.clone()).await {
                    Ok((mut client, _)) => {
                        // Hold the socket until the server closes it.
                        while let Some(Ok(_)) = client.next().await {}
                    }
                    // Listener gone, the shutdown finished.
                    Err(_) => break,
                }
            }
        }));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    server.stop().await.expect("stop failed");

    for dialer in dialers {
        dialer.await.expect("dialer task panicked");
    }
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn ephemeral_port_is_queryable() {
    let server = start_server().await;
    let addr = server.local_addr().expect("bound address");
    assert_ne!(addr.port(), 0);
    assert_eq!(server.port(), Some(addr.port()));

    server.stop().await.expect("stop failed");
}
