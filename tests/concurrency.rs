#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use arena_protocol::core::codec::{decode_packet, encode_packet, FrameCodec};
use arena_protocol::config::MAX_PACKET_SIZE;
use arena_protocol::protocol::message::{Packet, PacketType};
use arena_protocol::service::client::GameClient;
use arena_protocol::transport::{tcp, ConnectionOptions};
use bytes::BytesMut;
use common::{client_config, eventually, fast_config, start_server, PASSWORD};
use std::collections::HashSet;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::codec::{Decoder, Encoder};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_encode_decode_heavy() {
    let iterations = 5_000usize;
    let text_sizes = [1usize, 64, 512, 4096, 65536];

    let mut tasks = JoinSet::new();
    for &size in &text_sizes {
        tasks.spawn(async move {
            let mut codec = FrameCodec::default();
            let mut buf = BytesMut::new();
            for i in 0..iterations {
                let text = "x".repeat(size);
                let packet = Packet::chat(format!("sender{i}"), text).with_correlation_id(i as u32 + 1);
                let body = encode_packet(&packet, MAX_PACKET_SIZE).unwrap();
                codec.encode(body, &mut buf).unwrap();

                let frame = codec.decode(&mut buf).unwrap().expect("complete frame");
                let decoded = decode_packet(&frame).unwrap();
                assert_eq!(decoded, packet);
                assert!(buf.is_empty());
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_on_one_connection_get_their_own_replies() {
    let mut config = fast_config();
    config.rate_limit = config.rate_limit.with_limit(PacketType::Heartbeat, 1_000);
    let server = start_server(config).await;

    let (conn, _events) = tcp::connect(&server.address, Duration::from_secs(2), ConnectionOptions::default())
        .await
        .expect("connect");

    let mut tasks = JoinSet::new();
    for id in 1..=64u32 {
        let conn = conn.clone();
        tasks.spawn(async move {
            let reply = conn
                .send_request(Packet::heartbeat().with_correlation_id(id), Duration::from_secs(5))
                .await
                .unwrap()
                .expect("reply");
            assert_eq!(reply.packet_type(), PacketType::HeartbeatAck);
            reply.correlation_id().expect("correlated")
        });
    }

    let mut seen = HashSet::new();
    while let Some(res) = tasks.join_next().await {
        assert!(seen.insert(res.unwrap()));
    }
    assert_eq!(seen.len(), 64);
    assert_eq!(conn.pending_requests(), 0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_clients_log_in_concurrently() {
    let server = start_server(fast_config()).await;
    let clients = 32;

    let mut tasks = JoinSet::new();
    for i in 0..clients {
        let config = client_config(&server);
        tasks.spawn(async move {
            let (client, _events) = GameClient::new(config);
            client.connect().await.unwrap();
            let session = client.login(&format!("player{i}"), PASSWORD).await.unwrap();
            (client, session)
        });
    }

    let mut players = HashSet::new();
    let mut handles = Vec::new();
    while let Some(res) = tasks.join_next().await {
        let (client, session) = res.unwrap();
        assert!(players.insert(session.player_id));
        handles.push(client);
    }

    assert_eq!(players.len(), clients);
    eventually(|| server.server.sessions().online_count() == clients).await;
    assert_eq!(server.server.metrics().snapshot().sessions_created, clients as u64);

    for client in handles {
        client.shutdown().await;
    }
    eventually(|| server.server.connection_count() == 0).await;
    assert_eq!(server.server.sessions().online_count(), 0);
    assert_eq!(server.server.sessions().len(), clients);

    server.stop().await;
}
