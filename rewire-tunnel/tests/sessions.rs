// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use rewire_core::RewireError;
use rewire_model::ClosePolicy;
use rewire_transport::Deadline;
use rewire_tunnel::SessionTable;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

/// Loopback echo server; returns its address.
async fn echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Server that sends `payload` to every client, then stays silent.
async fn greeter(payload: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                stream.write_all(payload).await.unwrap();
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });
    addr
}

fn is_not_connected(err: &RewireError) -> bool {
    matches!(err, RewireError::Transport(e) if e.kind() == io::ErrorKind::NotConnected)
}

#[tokio::test]
async fn concurrent_opens_get_unique_increasing_ids() {
    let addr = echo_server().await;
    let table = Arc::new(SessionTable::default());

    let opens = (0..16).map(|_| {
        let table = table.clone();
        let addr = addr.clone();
        async move { table.open_session("tcp", &addr, Deadline::none()).await.unwrap() }
    });
    let mut ids = futures::future::join_all(opens).await;
    ids.sort_unstable();

    assert_eq!(ids, (1..=16).collect::<Vec<u64>>());
    assert_eq!(table.len().await, 16);
}

#[tokio::test]
async fn read_returns_only_available_bytes() {
    let addr = greeter(b"0123456789").await;
    let table = SessionTable::default();
    let sid = table.open_session("tcp", &addr, Deadline::none()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let data = table
        .read_session(sid, 100, Deadline::after(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(data, b"0123456789");
}

#[tokio::test]
async fn write_then_read_through_echo() {
    let addr = echo_server().await;
    let table = SessionTable::default();
    let sid = table.open_session("tcp4", &addr, Deadline::none()).await.unwrap();

    let deadline = Deadline::after(Duration::from_secs(2));
    assert_eq!(table.write_session(sid, &[1, 2, 3], deadline).await.unwrap(), 3);
    let data = table.read_session(sid, 3, deadline).await.unwrap();
    assert_eq!(data, vec![1, 2, 3]);
}

#[tokio::test]
async fn unknown_session_is_reported() {
    let table = SessionTable::default();
    let none = Deadline::none();

    assert!(matches!(table.read_session(999, 8, none).await, Err(RewireError::SessionNotFound(999))));
    assert!(matches!(table.write_session(999, b"x", none).await, Err(RewireError::SessionNotFound(999))));
    assert!(matches!(table.close_session(999).await, Err(RewireError::SessionNotFound(999))));
}

#[tokio::test]
async fn retained_session_reports_closed_socket() {
    let addr = echo_server().await;
    let table = SessionTable::new(ClosePolicy::Retain);
    let sid = table.open_session("tcp", &addr, Deadline::none()).await.unwrap();

    table.close_session(sid).await.unwrap();
    assert!(table.contains(sid).await);

    let err = table.read_session(sid, 8, Deadline::none()).await.unwrap_err();
    assert!(is_not_connected(&err), "unexpected error: {:?}", err);
    let err = table.write_session(sid, b"late", Deadline::none()).await.unwrap_err();
    assert!(is_not_connected(&err), "unexpected error: {:?}", err);
    let err = table.close_session(sid).await.unwrap_err();
    assert!(is_not_connected(&err), "unexpected error: {:?}", err);
}

#[tokio::test]
async fn evicted_session_is_forgotten() {
    let addr = echo_server().await;
    let table = SessionTable::new(ClosePolicy::Evict);
    let sid = table.open_session("tcp", &addr, Deadline::none()).await.unwrap();

    table.close_session(sid).await.unwrap();
    assert!(!table.contains(sid).await);
    assert!(matches!(
        table.read_session(sid, 8, Deadline::none()).await,
        Err(RewireError::SessionNotFound(id)) if id == sid
    ));
    assert!(matches!(table.close_session(sid).await, Err(RewireError::SessionNotFound(_))));
}

#[tokio::test]
async fn close_unblocks_pending_read() {
    let addr = greeter(b"").await;
    let table = Arc::new(SessionTable::default());
    let sid = table.open_session("tcp", &addr, Deadline::none()).await.unwrap();

    let reader = {
        let table = table.clone();
        tokio::spawn(async move { table.read_session(sid, 8, Deadline::none()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    table.close_session(sid).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .unwrap()
        .unwrap();
    assert!(is_not_connected(&result.unwrap_err()));
}

#[tokio::test]
async fn blocked_read_does_not_block_write() {
    let addr = echo_server().await;
    let table = Arc::new(SessionTable::default());
    let sid = table.open_session("tcp", &addr, Deadline::none()).await.unwrap();

    let reader = {
        let table = table.clone();
        tokio::spawn(async move {
            table
                .read_session(sid, 4, Deadline::after(Duration::from_secs(2)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let written = table
        .write_session(sid, b"ping", Deadline::after(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(written, 4);
    assert_eq!(reader.await.unwrap().unwrap(), b"ping");
}

#[cfg(unix)]
#[tokio::test]
async fn unix_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("echo.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (mut r, mut w) = stream.split();
        let _ = tokio::io::copy(&mut r, &mut w).await;
    });

    let table = SessionTable::default();
    let sid = table
        .open_session("unix", path.to_str().unwrap(), Deadline::none())
        .await
        .unwrap();
    let deadline = Deadline::after(Duration::from_secs(2));
    table.write_session(sid, b"abc", deadline).await.unwrap();
    assert_eq!(table.read_session(sid, 16, deadline).await.unwrap(), b"abc");
}
