// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use rewire_core::{Acceptor, BoxFuture, Connector, ReverseAddr, RewireError};
use rewire_transport::{AdapterState, ReverseDialer};
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};

async fn loopback() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn connect_and_send(addr: SocketAddr, byte: u8) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&[byte]).await.unwrap();
    stream
}

#[tokio::test]
async fn dial_returns_inbound_connection() {
    let (listener, addr) = loopback().await;
    let dialer = ReverseDialer::new(listener);
    assert_eq!(dialer.state(), AdapterState::Uninitialized);
    assert_eq!(dialer.local_addr(), ReverseAddr::REVERSE);

    let client = tokio::spawn(connect_and_send(addr, 7));
    let mut conn = dialer.dial("ignored:0", Some(Duration::from_secs(2))).await.unwrap();
    let mut byte = [0u8; 1];
    conn.read_exact(&mut byte).await.unwrap();
    assert_eq!(byte[0], 7);
    assert_eq!(dialer.state(), AdapterState::Running);

    drop(client.await.unwrap());
    assert!(matches!(dialer.close().await, Err(RewireError::Cancelled)));
}

#[tokio::test]
async fn concurrent_dials_get_distinct_connections() {
    let (listener, addr) = loopback().await;
    let dialer = Arc::new(ReverseDialer::new(listener));

    let callers: Vec<_> = (0..2)
        .map(|_| {
            let dialer = dialer.clone();
            tokio::spawn(async move {
                let mut conn = dialer.dial("", Some(Duration::from_secs(2))).await.unwrap();
                let mut byte = [0u8; 1];
                conn.read_exact(&mut byte).await.unwrap();
                byte[0]
            })
        })
        .collect();

    let _a = connect_and_send(addr, 1).await;
    let _b = connect_and_send(addr, 2).await;

    let mut seen = HashSet::new();
    for caller in callers {
        seen.insert(caller.await.unwrap());
    }
    assert_eq!(seen, HashSet::from([1, 2]));
}

#[tokio::test]
async fn timeout_leaves_dialer_running() {
    let (listener, addr) = loopback().await;
    let dialer = ReverseDialer::new(listener);

    let err = dialer.dial("", Some(Duration::from_millis(50))).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_terminal());
    assert_eq!(dialer.state(), AdapterState::Running);

    let _client = connect_and_send(addr, 3).await;
    assert!(dialer.dial("", Some(Duration::from_secs(2))).await.is_ok());
}

#[tokio::test]
async fn close_stops_dialing() {
    let (listener, _addr) = loopback().await;
    let dialer = Arc::new(ReverseDialer::new(listener));

    let blocked = {
        let dialer = dialer.clone();
        tokio::spawn(async move { dialer.dial("", None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(dialer.close().await, Err(RewireError::Cancelled)));
    assert!(matches!(blocked.await.unwrap(), Err(RewireError::Cancelled)));
    assert!(matches!(dialer.dial("", None).await, Err(RewireError::Cancelled)));
    assert_eq!(dialer.state(), AdapterState::Stopped);
}

#[tokio::test]
async fn works_as_a_connector() {
    let (listener, addr) = loopback().await;
    let dialer = ReverseDialer::new(listener);

    let _client = connect_and_send(addr, 9).await;
    let mut conn = dialer
        .connect("anything", Some(Duration::from_secs(2)))
        .await
        .unwrap();
    let mut byte = [0u8; 1];
    conn.read_exact(&mut byte).await.unwrap();
    assert_eq!(byte[0], 9);
}

/// Acceptor whose first accept fails.
struct Broken;

impl Acceptor for Broken {
    type Conn = DuplexStream;

    fn accept(&mut self) -> BoxFuture<'_, io::Result<DuplexStream>> {
        Box::pin(async { Err(io::Error::new(io::ErrorKind::PermissionDenied, "no")) })
    }
}

#[tokio::test]
async fn accept_failure_is_memoized() {
    let dialer = ReverseDialer::new(Broken);

    for _ in 0..2 {
        match dialer.dial("", Some(Duration::from_secs(1))).await {
            Err(RewireError::AcceptFailed(e)) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("expected accept failure, got {:?}", other.map(|_| ())),
        }
    }
    assert_eq!(dialer.state(), AdapterState::Stopped);
    assert!(matches!(dialer.close().await, Err(RewireError::AcceptFailed(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn unix_listener_backs_the_dialer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rewire.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    let dialer = ReverseDialer::new(listener);

    let client = tokio::spawn({
        let path = path.clone();
        async move {
            let mut stream = tokio::net::UnixStream::connect(path).await.unwrap();
            stream.write_all(b"u").await.unwrap();
            stream
        }
    });

    let mut conn = dialer.dial("", Some(Duration::from_secs(2))).await.unwrap();
    let mut byte = [0u8; 1];
    conn.read_exact(&mut byte).await.unwrap();
    assert_eq!(&byte, b"u");
    drop(client.await.unwrap());
    assert!(matches!(dialer.close().await, Err(RewireError::Cancelled)));
}
