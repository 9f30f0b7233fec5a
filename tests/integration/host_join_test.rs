//! Host and join client exercised together over loopback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lanlobby::client::{JoinClient, JoinError, JoinOptions};
use lanlobby::config::HostConfig;
use lanlobby::events::{EventBus, PlayerJoined, PLAYER_JOINED};
use lanlobby::server::HostServer;
use lanlobby::token::{ConnectionToken, Protocol};

fn host_config() -> HostConfig {
    HostConfig {
        bind_host: "127.0.0.1".to_string(),
        advertise_address: Some("127.0.0.1".to_string()),
        read_timeout_ms: 1000,
        ..HostConfig::default()
    }
}

fn client() -> JoinClient {
    JoinClient::new(JoinOptions {
        timeout: Duration::from_millis(1000),
        retry_count: 1,
        backoff: Duration::from_millis(50),
    })
    .unwrap()
}

#[tokio::test]
async fn test_scan_and_join_flow() {
    let bus = EventBus::new();
    let joined = Arc::new(Mutex::new(Vec::new()));
    let seen = joined.clone();
    let _sub = bus.subscribe_event(PLAYER_JOINED, move |event: PlayerJoined| {
        seen.lock().unwrap().push(event.name);
        Ok(())
    });

    let mut server = HostServer::new(host_config(), bus);
    server.start("session-42", 0).await.unwrap();
    // The token travels as JSON, as it would inside a scanned code.
    let scanned = server.connection_token().await.unwrap().to_json().unwrap();
    let token = ConnectionToken::from_json(&scanned).unwrap();
    let client = client();

    let alice = client.notify_host_player_joined(&token, "Alice").await.unwrap();
    assert!(alice.ok);
    assert_eq!(alice.status, 200);
    assert_eq!(alice.players(), Some(vec!["Alice".to_string()]));

    let bob = client.notify_host_player_joined(&token, "Bob").await.unwrap();
    assert_eq!(
        bob.players(),
        Some(vec!["Alice".to_string(), "Bob".to_string()])
    );

    // Delivery is off the request path; give it a moment.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut names = joined.lock().unwrap().clone();
    names.sort();
    assert_eq!(names, vec!["Alice", "Bob"]);

    let leave = reqwest::Client::new()
        .post(format!("{}/api/session/session-42/leave", token.base_url()))
        .json(&serde_json::json!({"name": "Alice"}))
        .send()
        .await
        .unwrap();
    assert_eq!(leave.status().as_u16(), 404);
    let body: serde_json::Value = leave.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"ok": false, "error": "Not found"}));

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_session_is_a_response_not_an_error() {
    let mut server = HostServer::new(host_config(), EventBus::new());
    let addr = server.start("session-42", 0).await.unwrap();
    let token = ConnectionToken::new("session-7", "127.0.0.1", addr.port(), Protocol::Http).unwrap();

    let response = client()
        .notify_host_player_joined(&token, "Alice")
        .await
        .unwrap();

    assert!(!response.ok);
    assert_eq!(response.status, 404);
    assert_eq!(response.error(), Some("Session not found"));
    server.stop().await;
}

#[tokio::test]
async fn test_cancelled_session_rejects_joins() {
    let mut server = HostServer::new(host_config(), EventBus::new());
    server.start("session-42", 0).await.unwrap();
    let token = server.connection_token().await.unwrap();
    let client = client();

    client.notify_host_player_joined(&token, "Alice").await.unwrap();
    assert!(server.cancel_session("session-42").await);
    let response = client.notify_host_player_joined(&token, "Bob").await.unwrap();

    assert_eq!(response.status, 404);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_all_land() {
    let mut server = HostServer::new(host_config(), EventBus::new());
    server.start("party", 0).await.unwrap();
    let token = server.connection_token().await.unwrap();
    let client = client();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..16 {
        let (client, token) = (client.clone(), token.clone());
        tasks.spawn(async move {
            client
                .notify_host_player_joined(&token, &format!("player-{i}"))
                .await
                .unwrap()
        });
    }
    while let Some(response) = tasks.join_next().await {
        assert!(response.unwrap().ok);
    }

    let mut roster = server
        .registry()
        .unwrap()
        .participants("party")
        .await
        .unwrap();
    roster.sort();
    let mut expected: Vec<String> = (0..16).map(|i| format!("player-{i}")).collect();
    expected.sort();
    assert_eq!(roster, expected);
    server.stop().await;
}

#[tokio::test]
async fn test_stopped_host_is_unreachable() {
    let mut server = HostServer::new(host_config(), EventBus::new());
    server.start("session-42", 0).await.unwrap();
    let token = server.connection_token().await.unwrap();
    server.stop().await;

    let err = client()
        .notify_host_player_joined(&token, "Alice")
        .await
        .unwrap_err();

    assert!(matches!(err, JoinError::Network { attempts: 2, .. }));
}
