//! Client supervision: reconnect policy and session resumption over TCP.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use arena_protocol::error::ErrorCode;
use arena_protocol::service::client::{ClientEvent, GameClient};
use common::{client_config, eventually, fast_config, next_event, start_server, PASSWORD, USERNAME};
use std::time::Duration;
use tokio::sync::mpsc;

async fn kick_all(server: &common::TestServer, reason: &str, code: Option<ErrorCode>) {
    for conn in server.server.connections() {
        conn.disconnect_with_notice(reason.to_string(), code).await;
    }
}

async fn assert_quiet(events: &mut mpsc::Receiver<ClientEvent>) {
    if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(300), events.recv()).await {
        panic!("unexpected event {event:?}");
    }
}

#[tokio::test]
async fn test_reconnect_resumes_session() {
    let server = start_server(fast_config()).await;
    let (client, mut events) = GameClient::new(client_config(&server));

    client.connect().await.expect("connect");
    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));
    let session = client.login(USERNAME, PASSWORD).await.expect("login");

    eventually(|| server.server.connection_count() == 1).await;
    kick_all(&server, "maintenance", Some(ErrorCode::ServerMaintenance)).await;

    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected(_)));
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::Reconnecting { attempt: 1 }
    ));
    assert!(matches!(next_event(&mut events).await, ClientEvent::Reconnected));
    match next_event(&mut events).await {
        ClientEvent::SessionResumed { player_id } => assert_eq!(player_id, session.player_id),
        other => panic!("unexpected event {other:?}"),
    }

    assert!(client.is_connected());
    assert_eq!(client.session(), Some(session.clone()));
    eventually(|| server.server.sessions().online_count() == 1).await;
    assert_eq!(server.server.metrics().snapshot().sessions_resumed, 1);

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_expired_session_is_dropped_after_reconnect() {
    let server = start_server(fast_config()).await;
    let (client, mut events) = GameClient::new(client_config(&server));

    client.connect().await.expect("connect");
    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));
    let session = client.login(USERNAME, PASSWORD).await.expect("login");

    server.server.sessions().invalidate(&session.session_token);
    kick_all(&server, "timeout", Some(ErrorCode::Timeout)).await;

    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected(_)));
    assert!(matches!(next_event(&mut events).await, ClientEvent::Reconnecting { .. }));
    assert!(matches!(next_event(&mut events).await, ClientEvent::Reconnected));
    assert!(matches!(next_event(&mut events).await, ClientEvent::SessionLost { .. }));
    assert!(client.session().is_none());
    assert!(client.is_connected());

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_intentional_disconnect_does_not_reconnect() {
    let server = start_server(fast_config()).await;
    let (client, mut events) = GameClient::new(client_config(&server));

    client.connect().await.expect("connect");
    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));

    client.disconnect().await;
    match next_event(&mut events).await {
        ClientEvent::Disconnected(info) => assert!(info.initiated_locally),
        other => panic!("unexpected event {other:?}"),
    }
    assert_quiet(&mut events).await;
    assert!(!client.is_connected());

    // Explicit connect still works afterwards.
    client.connect().await.expect("connect again");
    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_forbidden_notice_vetoes_reconnect() {
    let server = start_server(fast_config()).await;
    let (client, mut events) = GameClient::new(client_config(&server));

    client.connect().await.expect("connect");
    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));
    eventually(|| server.server.connection_count() == 1).await;

    kick_all(&server, "banned", Some(ErrorCode::Forbidden)).await;

    match next_event(&mut events).await {
        ClientEvent::Disconnected(info) => {
            assert_eq!(info.error_code, Some(ErrorCode::Forbidden));
            assert!(!info.allows_reconnect());
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_quiet(&mut events).await;

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let server = start_server(fast_config()).await;
    let (client, mut events) = GameClient::new(client_config(&server));

    client.connect().await.expect("connect");
    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));
    eventually(|| server.server.connection_count() == 1).await;

    // The maintenance notice allows reconnecting, but nothing listens anymore.
    server.stop().await;

    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected(_)));
    for expected in 1..=3 {
        match next_event(&mut events).await {
            ClientEvent::Reconnecting { attempt } => assert_eq!(attempt, expected),
            other => panic!("unexpected event {other:?}"),
        }
    }
    match next_event(&mut events).await {
        ClientEvent::ReconnectFailed { attempts } => assert_eq!(attempts, 3),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!client.is_connected());

    client.shutdown().await;
}
