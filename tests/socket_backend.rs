//! ETSI 004 over TCP: `SocketStreamBackend` against a `StreamServer`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use qkd_etsi_api::config::SocketConfig;
use qkd_etsi_api::etsi004::{
    Ksid, Metadata, Qos, Role, SimulatedStreamBackend, SocketStreamBackend, StreamEngine,
    StreamServer, StreamStatus,
};
use qkd_etsi_api::protocol::{Header, HEADER_SIZE};
use qkd_etsi_api::{StreamError, WireError};

/// Start a node backed by the simulator. Returns its `server://` URI.
async fn spawn_node() -> String {
    spawn_node_with(SimulatedStreamBackend::new()).await
}

async fn spawn_node_with(backend: SimulatedStreamBackend) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = StreamServer::new(Arc::new(backend));
    tokio::spawn(server.serve(listener));
    format!("server://{}", addr)
}

fn socket_engine() -> StreamEngine {
    StreamEngine::with_backend(Arc::new(SocketStreamBackend::new()))
}

#[tokio::test]
async fn test_remote_stream_lifecycle() {
    let node = spawn_node().await;
    let alice = socket_engine();
    let bob = socket_engine();
    let qos = Qos::default();

    let opened = alice
        .open("app://alice", &node, &qos, Role::Initiator)
        .await
        .unwrap();
    assert_eq!(opened.status, StreamStatus::PeerDisconnected);
    assert!(!opened.ksid.is_nil());

    let joined = bob
        .open("app://bob", &node, &qos, Role::Responder(opened.ksid))
        .await
        .unwrap();
    assert_eq!(joined.status, StreamStatus::Success);
    assert_eq!(joined.qos, qos);

    let mut metadata = Metadata::with_capacity(128);
    let a = alice
        .get_key(opened.ksid, 0, Some(&mut metadata))
        .await
        .unwrap();
    let b = bob.get_key(opened.ksid, 0, None).await.unwrap();
    assert_eq!(a.len(), 32);
    assert_eq!(a.key(), b.key());
    assert!(!metadata.is_empty());

    let err = alice
        .get_key(opened.ksid, 1_000_000, None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StreamStatus::InsufficientKey);

    alice.close(opened.ksid).await.unwrap();
    // Still served by the node until its TTL runs out.
    bob.get_key(opened.ksid, 0, None).await.unwrap();
}

#[tokio::test]
async fn test_remote_metadata_too_small() {
    let node = spawn_node().await;
    let engine = socket_engine();
    let ksid = engine
        .open("a", &node, &Qos::default(), Role::Initiator)
        .await
        .unwrap()
        .ksid;

    let mut metadata = Metadata::with_capacity(2);
    let err = engine
        .get_key(ksid, 0, Some(&mut metadata))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StreamStatus::MetadataSizeError);
    assert!(matches!(err, StreamError::MetadataSize { capacity: 2, .. }));
    assert!(metadata.is_empty());
}

#[tokio::test]
async fn test_dropped_client_frees_its_slot() {
    let node = spawn_node_with(SimulatedStreamBackend::builder().capacity(1).build()).await;
    let qos = Qos::default();

    let first = socket_engine();
    first.open("a", &node, &qos, Role::Initiator).await.unwrap();
    drop(first);

    // The node notices the hang-up asynchronously.
    let second = socket_engine();
    let mut attempts = 0;
    let opened = loop {
        match second.open("b", &node, &qos, Role::Initiator).await {
            Ok(opened) => break opened,
            Err(e) => {
                assert_eq!(e.status(), StreamStatus::NoConnection);
                attempts += 1;
                assert!(attempts < 50, "slot never freed");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    };
    assert_eq!(opened.status, StreamStatus::PeerDisconnected);
}

#[tokio::test]
async fn test_remote_ksid_in_use() {
    let node = spawn_node().await;
    let engine = socket_engine();
    let qos = Qos::default();
    let ksid = engine
        .open("a", &node, &qos, Role::Initiator)
        .await
        .unwrap()
        .ksid;
    engine
        .open("b", &node, &qos, Role::Responder(ksid))
        .await
        .unwrap();

    let err = socket_engine()
        .open("c", &node, &qos, Role::Responder(ksid))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StreamStatus::KsidInUse);
}

#[tokio::test]
async fn test_connect_refused_is_no_connection() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = socket_engine()
        .open("a", &format!("server://{}", addr), &Qos::default(), Role::Initiator)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StreamStatus::NoConnection);
}

/// Peer that reads one request frame, writes `reply` and hangs up.
async fn spawn_broken_peer(reply: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut header = [0u8; HEADER_SIZE];
        socket.read_exact(&mut header).await.unwrap();
        let header = Header::decode(&header).unwrap();
        let mut payload = vec![0u8; header.payload_length as usize];
        socket.read_exact(&mut payload).await.unwrap();

        socket.write_all(&reply).await.unwrap();
        socket.shutdown().await.unwrap();
    });
    format!("server://{}", addr)
}

#[tokio::test]
async fn test_truncated_header_from_peer() {
    let node = spawn_broken_peer(vec![1, 0, 1]).await;
    let err = socket_engine()
        .open("a", &node, &Qos::default(), Role::Initiator)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::Wire(WireError::IncompleteHeader {
            received: 3,
            expected: 8
        })
    ));
    assert_eq!(err.status(), StreamStatus::NoConnection);
}

#[tokio::test]
async fn test_truncated_payload_from_peer() {
    // OpenResp header announcing 10 bytes, followed by only 4.
    let node = spawn_broken_peer(vec![1, 0, 1, 0x03, 0, 0, 0, 10, 0, 0, 0, 0]).await;
    let err = socket_engine()
        .open("a", &node, &Qos::default(), Role::Initiator)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::Wire(WireError::IncompletePayload {
            received: 4,
            expected: 10
        })
    ));
}

/// OpenResp carrying a bare PeerDisconnected status.
const BARE_PEER_DISCONNECTED: [u8; 12] = [1, 0, 1, 0x03, 0, 0, 0, 4, 0, 0, 0, 1];

#[tokio::test]
async fn test_bare_peer_disconnected_keeps_requested_ksid() {
    let node = spawn_broken_peer(BARE_PEER_DISCONNECTED.to_vec()).await;
    let ksid = Ksid::generate();
    let qos = Qos::default();
    let opened = socket_engine()
        .open("b", &node, &qos, Role::Responder(ksid))
        .await
        .unwrap();
    assert_eq!(opened.status, StreamStatus::PeerDisconnected);
    assert_eq!(opened.ksid, ksid);
    assert_eq!(opened.qos, qos);

    // An initiator has no KSID to fall back on.
    let node = spawn_broken_peer(BARE_PEER_DISCONNECTED.to_vec()).await;
    let err = socket_engine()
        .open("a", &node, &qos, Role::Initiator)
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::Wire(WireError::Malformed(_))));
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(socket);
    });

    let qos = Qos {
        timeout: 50,
        ..Qos::default()
    };
    let backend = SocketStreamBackend::with_config(
        SocketConfig::new().connect_timeout(Duration::from_secs(1)),
    );
    let err = StreamEngine::with_backend(Arc::new(backend))
        .open("a", &format!("server://{}", addr), &qos, Role::Initiator)
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::Timeout(50)));
}
