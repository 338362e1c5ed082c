// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use rewire_core::{Connection, Signal};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

/// A connection that reports when it has been closed.
///
/// Reads and writes pass straight through. `close` (or dropping the value)
/// releases the socket and then fires the closed signal, which is how a
/// reverse listener learns it may dial again.
pub struct MonitoredConnection<C> {
    inner: Option<C>,
    closed: Signal,
}

impl<C: Connection> MonitoredConnection<C> {
    pub fn new(conn: C) -> Self {
        Self {
            inner: Some(conn),
            closed: Signal::new(),
        }
    }

    /// Handle that becomes ready once the first close has completed.
    pub fn closed_signal(&self) -> Signal {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn get_ref(&self) -> Option<&C> {
        self.inner.as_ref()
    }

    /// Shuts the connection down and fires the signal. Only the first call
    /// touches the socket; later calls succeed trivially.
    pub async fn close(&mut self) -> io::Result<()> {
        let Some(mut conn) = self.inner.take() else {
            return Ok(());
        };
        let result = conn.shutdown().await;
        drop(conn);
        self.closed.fire();
        match result {
            // The peer may already be gone; the socket is released either way.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn inner_mut(&mut self) -> io::Result<&mut C> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))
    }
}

impl<C> fmt::Debug for MonitoredConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredConnection")
            .field("closed", &self.inner.is_none())
            .field("signal_fired", &self.closed.is_fired())
            .finish()
    }
}

impl<C> Drop for MonitoredConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.inner.take() {
            drop(conn);
            self.closed.fire();
        }
    }
}

impl<C: Connection> AsyncRead for MonitoredConnection<C> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().inner_mut() {
            Ok(conn) => Pin::new(conn).poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl<C: Connection> AsyncWrite for MonitoredConnection<C> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().inner_mut() {
            Ok(conn) => Pin::new(conn).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner_mut() {
            Ok(conn) => Pin::new(conn).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    /// Half-closes the write side only; the closed signal fires on `close` or drop.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner_mut() {
            Ok(conn) => Pin::new(conn).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_passthrough_and_close_fires_once() {
        let (near, mut far) = tokio::io::duplex(64);
        let mut conn = MonitoredConnection::new(near);
        let signal = conn.closed_signal();

        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        assert!(!signal.is_fired());
        assert_eq!(format!("{:?}", conn), "MonitoredConnection { closed: false, signal_fired: false }");
        conn.close().await.unwrap();
        assert!(signal.is_fired());
        assert!(conn.is_closed());

        // Second close is a no-op, I/O afterwards fails.
        conn.close().await.unwrap();
        let err = conn.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        // The peer sees EOF.
        assert_eq!(far.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drop_fires_signal() {
        let (near, _far) = tokio::io::duplex(64);
        let conn = MonitoredConnection::new(near);
        let signal = conn.closed_signal();

        let waiter = tokio::spawn(async move { signal.fired().await });
        drop(conn);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("signal never fired")
            .unwrap();
    }
}
