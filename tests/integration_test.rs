//! Integration tests for muxtun
//!
//! Tests the client against a scripted in-process peer that speaks the
//! tunnel protocol: it issues handshake challenges, verifies tokens,
//! and echoes link traffic back through the multiplexer.

use muxtun::config::ClientConfig;
use muxtun::crypto::{Authenticator, CHALLENGE_LEN};
use muxtun::mux::{wire, Frame, FrameType};
use muxtun::Client;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Start an echo peer: every authenticated tunnel echoes Data frames
/// and acknowledges LinkClose with a LinkClose of its own.
async fn start_echo_peer(secret: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(serve_tunnel(stream, secret));
        }
    });

    addr
}

async fn serve_tunnel(mut stream: TcpStream, secret: &str) {
    let auth = Authenticator::new(secret);

    let challenge = auth.issue_challenge();
    if stream.write_all(&challenge).await.is_err() {
        return;
    }

    let mut token = [0u8; CHALLENGE_LEN];
    if stream.read_exact(&mut token).await.is_err() {
        return;
    }
    if !auth.verify_token(&challenge, &token) {
        return;
    }

    let key = auth.session_key(&challenge).unwrap();
    let (read_half, write_half) = stream.into_split();
    let (mut reader, mut writer) = wire::wrap(read_half, write_half, &key);

    while let Ok(frame) = reader.read_frame().await {
        let reply = match frame.frame_type {
            FrameType::Data => Frame::data(frame.link_id, frame.payload),
            FrameType::LinkClose => Frame::link_close(frame.link_id),
            FrameType::LinkCreate | FrameType::Heartbeat => continue,
        };
        if writer.write_frame(&reply).await.is_err() {
            break;
        }
    }
}

fn client_config(server: SocketAddr, secret: &str, tunnels: usize) -> ClientConfig {
    ClientConfig {
        listen: "127.0.0.1:0".to_string(),
        server: server.to_string(),
        secret: secret.to_string(),
        tunnels,
    }
}

/// Poll until `check` passes or the deadline expires
async fn eventually<F: Fn() -> bool>(check: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Startup with two tunnels: both dials succeed, the pool holds two
/// idle hubs, and the acceptor is listening.
#[tokio::test]
async fn test_startup_two_tunnels() {
    let server = start_echo_peer("integration secret").await;
    let client = Client::new(&client_config(server, "integration secret", 2));

    client.start().await.expect("startup should succeed");

    assert_eq!(client.active_hubs(), 2);
    assert_eq!(client.hub_loads(), vec![0, 0]);
    assert!(client.local_addr().is_some(), "acceptor must be bound");
}

/// A first-attempt dial failure aborts startup before anything listens.
#[tokio::test]
async fn test_startup_fails_fast_on_dial_error() {
    // Bind then drop to get an address that refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::new(&client_config(dead_addr, "secret", 2));

    assert!(client.start().await.is_err());
    assert!(client.local_addr().is_none(), "acceptor must not start");
}

/// A secret mismatch fails the handshake; no hub enters the pool.
#[tokio::test]
async fn test_startup_fails_on_wrong_secret() {
    let server = start_echo_peer("right secret").await;
    let client = Client::new(&client_config(server, "wrong secret", 1));

    assert!(client.start().await.is_err());
    assert_eq!(client.active_hubs(), 0);
    assert!(client.local_addr().is_none());
}

/// One connection end to end: bytes echo through the tunnel, the hub's
/// load rises to one during the connection and returns to zero after
/// the local socket closes.
#[tokio::test]
async fn test_single_connection_echo() {
    let server = start_echo_peer("echo secret").await;
    let client = Client::new(&client_config(server, "echo secret", 1));
    client.start().await.unwrap();
    let addr = client.local_addr().unwrap();

    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(b"ping through the tunnel").await.unwrap();

    let mut buf = [0u8; 23];
    tokio::time::timeout(Duration::from_secs(5), conn.read_exact(&mut buf))
        .await
        .expect("echo should arrive")
        .unwrap();
    assert_eq!(&buf, b"ping through the tunnel");

    assert_eq!(client.hub_loads(), vec![1]);

    drop(conn);
    eventually(
        || client.hub_loads().iter().sum::<i64>() == 0,
        "load to return to zero",
    )
    .await;
    assert_eq!(client.active_hubs(), 1, "the hub itself stays pooled");
}

/// Several concurrent connections spread across two hubs and all clean
/// up on close.
#[tokio::test]
async fn test_concurrent_connections_clean_up() {
    let server = start_echo_peer("spread secret").await;
    let client = Client::new(&client_config(server, "spread secret", 2));
    client.start().await.unwrap();
    let addr = client.local_addr().unwrap();

    let mut conns = Vec::new();
    for i in 0..4u8 {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(&[i; 8]).await.unwrap();
        let mut buf = [0u8; 8];
        tokio::time::timeout(Duration::from_secs(5), conn.read_exact(&mut buf))
            .await
            .expect("echo should arrive")
            .unwrap();
        assert_eq!(buf, [i; 8]);
        conns.push(conn);
    }

    eventually(
        || client.hub_loads().iter().sum::<i64>() == 4,
        "all four admissions to be accounted",
    )
    .await;

    drop(conns);
    eventually(
        || client.hub_loads().iter().sum::<i64>() == 0,
        "all loads to drain",
    )
    .await;
}
