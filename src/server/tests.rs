use super::*;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::events::{PlayerJoined, PLAYER_JOINED};

fn test_config() -> HostConfig {
    HostConfig {
        bind_host: "127.0.0.1".to_string(),
        advertise_address: Some("192.168.1.20".to_string()),
        read_timeout_ms: 500,
        ..HostConfig::default()
    }
}

async fn started(session_id: &str) -> (HostServer, SocketAddr) {
    let mut server = HostServer::new(test_config(), EventBus::new());
    let addr = server.start(session_id, 0).await.unwrap();
    (server, addr)
}

/// Send raw bytes and return (status, headers, JSON body).
async fn exchange(addr: SocketAddr, raw: &[u8]) -> (u16, String, Value) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    let status = head.split(' ').nth(1).unwrap().parse().unwrap();
    (status, head.to_string(), serde_json::from_str(body).unwrap())
}

fn join_request(session_id: &str, body: &str) -> Vec<u8> {
    format!(
        "POST /api/session/{session_id}/join HTTP/1.1\r\nHost: test\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

#[tokio::test]
async fn test_lifecycle() {
    let mut server = HostServer::new(test_config(), EventBus::new());
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.local_addr().is_none());

    let addr = server.start("s", 0).await.unwrap();
    assert_eq!(server.state(), ServerState::Listening);
    assert_eq!(server.local_addr(), Some(addr));
    assert!(server.registry().unwrap().contains("s").await);

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.registry().is_none());

    // Idempotent.
    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_start_twice_fails() {
    let (mut server, addr) = started("s").await;
    let err = server.start("other", 0).await.unwrap_err();
    assert!(matches!(err, ServerError::AlreadyListening(a) if a == addr));
    server.stop().await;
}

#[tokio::test]
async fn test_bind_conflict_fails() {
    let (mut first, addr) = started("s").await;
    let mut second = HostServer::new(test_config(), EventBus::new());

    let err = second.start("s", addr.port()).await.unwrap_err();

    assert!(matches!(err, ServerError::Bind { .. }));
    assert_eq!(second.state(), ServerState::Stopped);
    first.stop().await;
}

#[tokio::test]
async fn test_join_response_wire_format() {
    let (mut server, addr) = started("session-42").await;

    let (status, head, body) =
        exchange(addr, &join_request("session-42", r#"{"name":"Alice"}"#)).await;

    assert_eq!(status, 200);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Type: application/json"));
    assert!(head.contains("Connection: close"));
    assert_eq!(body, json!({"ok": true, "players": ["Alice"]}));
    server.stop().await;
}

#[tokio::test]
async fn test_join_event_published() {
    let mut server = HostServer::new(test_config(), EventBus::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _sub = server
        .bus()
        .subscribe_event(PLAYER_JOINED, move |event: PlayerJoined| {
            tx.send(event)?;
            Ok(())
        });
    let addr = server.start("s", 0).await.unwrap();

    exchange(addr, &join_request("s", r#"{"name":"Alice"}"#)).await;

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        PlayerJoined {
            name: "Alice".to_string()
        }
    );
    server.stop().await;
}

#[tokio::test]
async fn test_error_statuses() {
    let (mut server, addr) = started("s").await;

    let cases: Vec<(Vec<u8>, u16, &str)> = vec![
        (join_request("missing", r#"{"name":"A"}"#), 404, "Session not found"),
        (join_request("s", "{not json"), 400, "Invalid JSON"),
        (join_request("s", r#"{"name":""}"#), 400, "Missing player name"),
        (join_request("s", r#"{"other":1}"#), 400, "Missing player name"),
        (
            b"POST /api/session/s/leave HTTP/1.1\r\nContent-Length: 0\r\n\r\n".to_vec(),
            404,
            "Not found",
        ),
        (b"GET /api/session/s/join HTTP/1.1\r\n\r\n".to_vec(), 404, "Not found"),
    ];

    for (raw, expected_status, expected_error) in cases {
        let (status, _, body) = exchange(addr, &raw).await;
        assert_eq!(status, expected_status, "{}", String::from_utf8_lossy(&raw));
        assert_eq!(body, json!({"ok": false, "error": expected_error}));
    }

    let registry = server.registry().unwrap();
    assert!(registry.participants("s").await.unwrap().is_empty());
    assert!(!registry.contains("missing").await);
    server.stop().await;
}

#[tokio::test]
async fn test_malformed_request_is_rejected_by_framing() {
    let (mut server, addr) = started("s").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"garbage\r\n\r\n").await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    assert!(server.registry().unwrap().participants("s").await.unwrap().is_empty());
    server.stop().await;
}

#[tokio::test]
async fn test_expect_continue_gets_interim_response() {
    let (mut server, addr) = started("s").await;
    let body = r#"{"name":"Carl"}"#;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "POST /api/session/s/join HTTP/1.1\r\nHost: test\r\nContent-Type: application/json\r\nExpect: 100-continue\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();

    let mut interim = [0u8; 25];
    tokio::time::timeout(Duration::from_millis(400), stream.read_exact(&mut interim))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");

    stream.write_all(body.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with(r#"{"ok":true,"players":["Carl"]}"#));
    server.stop().await;
}

#[tokio::test]
async fn test_oversized_request_is_internal_error() {
    let mut config = test_config();
    config.max_request_bytes = 256;
    let mut server = HostServer::new(config, EventBus::new());
    let addr = server.start("s", 0).await.unwrap();

    let name = "x".repeat(1024);
    let (status, _, body) =
        exchange(addr, &join_request("s", &format!(r#"{{"name":"{name}"}}"#))).await;

    assert_eq!(status, 500);
    assert_eq!(body, json!({"ok": false, "error": "Internal server error"}));
    server.stop().await;
}

#[tokio::test]
async fn test_chunked_join() {
    let (mut server, addr) = started("s").await;
    let raw = b"POST /api/session/s/join HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n7\r\n{\"name\"\r\n9\r\n:\"Chunk\"}\r\n0\r\n\r\n";

    let (status, _, body) = exchange(addr, raw).await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({"ok": true, "players": ["Chunk"]}));
    server.stop().await;
}

#[tokio::test]
async fn test_split_writes() {
    let (mut server, addr) = started("s").await;
    let raw = join_request("s", r#"{"name":"Slow"}"#);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    for part in raw.chunks(7) {
        stream.write_all(part).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with(r#"{"ok":true,"players":["Slow"]}"#));
    server.stop().await;
}

#[tokio::test]
async fn test_slow_client_does_not_block_others() {
    let (mut server, addr) = started("s").await;

    // Opens a connection and never sends a full request.
    let mut stalled = TcpStream::connect(addr).await.unwrap();
    stalled.write_all(b"POST /api/session/s/jo").await.unwrap();

    let (status, _, _) = tokio::time::timeout(
        Duration::from_millis(400),
        exchange(addr, &join_request("s", r#"{"name":"Fast"}"#)),
    )
    .await
    .unwrap();
    assert_eq!(status, 200);

    // The stalled connection is dropped after the read timeout, unanswered.
    let mut rest = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(2), stalled.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
    server.stop().await;
}

#[tokio::test]
async fn test_duplicate_name_both_ok() {
    let (mut server, addr) = started("s").await;

    let (first, _, _) = exchange(addr, &join_request("s", r#"{"name":"Alice"}"#)).await;
    let (second, _, body) = exchange(addr, &join_request("s", r#"{"name":"Alice"}"#)).await;

    assert_eq!(first, 200);
    assert_eq!(second, 200);
    assert_eq!(body, json!({"ok": true, "players": ["Alice"]}));
    server.stop().await;
}

#[tokio::test]
async fn test_cancel_session() {
    let (mut server, addr) = started("s").await;

    assert!(server.cancel_session("s").await);
    let (status, _, body) = exchange(addr, &join_request("s", r#"{"name":"Alice"}"#)).await;

    assert_eq!(status, 404);
    assert_eq!(body, json!({"ok": false, "error": "Session not found"}));
    server.stop().await;
    assert!(!server.cancel_session("s").await);
}

#[tokio::test]
async fn test_stop_closes_listener_and_connections() {
    let (mut server, addr) = started("s").await;
    let mut in_flight = TcpStream::connect(addr).await.unwrap();
    in_flight.write_all(b"POST /api/session/s/join HTTP/1.1\r\n").await.unwrap();
    // Let the server accept it before stopping.
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.stop().await;

    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(1), in_flight.read_to_end(&mut rest))
        .await
        .unwrap();
    // Aborted without a response: clean EOF or reset.
    assert!(rest.is_empty() || read.is_err());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_restart_gets_fresh_registry() {
    let (mut server, addr) = started("s").await;
    exchange(addr, &join_request("s", r#"{"name":"Alice"}"#)).await;
    server.stop().await;

    server.start("s", 0).await.unwrap();

    assert_eq!(
        server.registry().unwrap().participants("s").await.unwrap(),
        Vec::<String>::new()
    );
    server.stop().await;
}

#[tokio::test]
async fn test_connection_token_uses_advertise_address() {
    let (mut server, addr) = started("session-42").await;

    let token = server.connection_token().await.unwrap();

    assert_eq!(token.session_id, "session-42");
    assert_eq!(token.host_address, "192.168.1.20");
    assert_eq!(token.host_port, addr.port());
    server.stop().await;

    assert!(matches!(
        server.connection_token().await,
        Err(ServerError::NotListening)
    ));
}
