// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use crate::client::{unexpected, TunnelClient};
use rewire_core::{BoxFuture, ReverseAddr, RewireError};
use rewire_model::{StreamConfig, TunnelEnvelope, TunnelRequest, TunnelResponse, MAX_WRITE_CHUNK};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

/// A socket living on the far side of a tunnel.
///
/// Each read, write and close is one RPC carrying a fresh deadline of the
/// configured timeout. Reads and writes may be short, exactly like the remote
/// socket calls they stand for.
pub struct RemoteStream {
    client: Arc<dyn TunnelClient>,
    sid: u64,
    timeout: Duration,
    leftover: Vec<u8>,
    pending_read: Option<BoxFuture<'static, Result<Vec<u8>, RewireError>>>,
    pending_write: Option<BoxFuture<'static, Result<usize, RewireError>>>,
    pending_close: Option<BoxFuture<'static, Result<(), RewireError>>>,
    closed: bool,
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("sid", &self.sid)
            .field("timeout", &self.timeout)
            .field("closed", &self.closed)
            .finish()
    }
}

impl RemoteStream {
    /// Asks the server to connect to `config.address` and wraps the new session.
    pub async fn open(client: Arc<dyn TunnelClient>, config: &StreamConfig) -> Result<Self, RewireError> {
        let request = TunnelRequest::Dial {
            network: config.network.clone(),
            address: config.address.clone(),
        };
        let sid = match client.call(TunnelEnvelope::new(request, Some(config.timeout))).await? {
            TunnelResponse::Dialed { sid } => sid,
            other => return Err(unexpected("dialed", &other)),
        };
        debug!(sid, network = %config.network, address = %config.address, "remote stream opened");

        Ok(Self {
            client,
            sid,
            timeout: config.timeout,
            leftover: Vec::new(),
            pending_read: None,
            pending_write: None,
            pending_close: None,
            closed: false,
        })
    }

    pub fn session_id(&self) -> u64 {
        self.sid
    }

    /// Reads up to `buf.len()` bytes. `Ok(0)` means the remote socket hit EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, RewireError> {
        if !self.leftover.is_empty() {
            return Ok(self.drain_leftover(buf));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let data = read_call(self.client.clone(), self.sid, buf.len(), self.timeout).await?;
        Ok(self.deliver(data, buf))
    }

    /// Writes once; may accept fewer bytes than offered. At most
    /// `MAX_WRITE_CHUNK` bytes go out per call.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, RewireError> {
        write_call(self.client.clone(), self.sid, write_chunk(buf), self.timeout).await
    }

    /// Closes the remote socket. The result is the remote close result.
    pub async fn close(&mut self) -> Result<(), RewireError> {
        self.closed = true;
        close_call(self.client.clone(), self.sid, self.timeout).await
    }

    pub fn set_deadline(&self, _deadline: Instant) -> Result<(), RewireError> {
        Err(RewireError::Unsupported("set_deadline"))
    }

    pub fn set_read_deadline(&self, _deadline: Instant) -> Result<(), RewireError> {
        Err(RewireError::Unsupported("set_read_deadline"))
    }

    pub fn set_write_deadline(&self, _deadline: Instant) -> Result<(), RewireError> {
        Err(RewireError::Unsupported("set_write_deadline"))
    }

    pub fn local_addr(&self) -> ReverseAddr {
        ReverseAddr::PIPE
    }

    pub fn peer_addr(&self) -> ReverseAddr {
        ReverseAddr::PIPE
    }

    fn drain_leftover(&mut self, buf: &mut [u8]) -> usize {
        let n = self.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        n
    }

    fn deliver(&mut self, data: Vec<u8>, buf: &mut [u8]) -> usize {
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.leftover.extend_from_slice(&data[n..]);
        n
    }
}

fn read_call(
    client: Arc<dyn TunnelClient>,
    sid: u64,
    n: usize,
    timeout: Duration,
) -> BoxFuture<'static, Result<Vec<u8>, RewireError>> {
    let n = u32::try_from(n).unwrap_or(u32::MAX);
    Box::pin(async move {
        let request = TunnelRequest::Read { sid, n };
        match client.call(TunnelEnvelope::new(request, Some(timeout))).await? {
            TunnelResponse::Data { buf } => Ok(buf),
            other => Err(unexpected("data", &other)),
        }
    })
}

fn write_chunk(buf: &[u8]) -> Vec<u8> {
    buf[..buf.len().min(MAX_WRITE_CHUNK)].to_vec()
}

fn write_call(
    client: Arc<dyn TunnelClient>,
    sid: u64,
    buf: Vec<u8>,
    timeout: Duration,
) -> BoxFuture<'static, Result<usize, RewireError>> {
    Box::pin(async move {
        let request = TunnelRequest::Write { sid, buf };
        match client.call(TunnelEnvelope::new(request, Some(timeout))).await? {
            TunnelResponse::Written { n } => Ok(n as usize),
            other => Err(unexpected("written", &other)),
        }
    })
}

fn close_call(
    client: Arc<dyn TunnelClient>,
    sid: u64,
    timeout: Duration,
) -> BoxFuture<'static, Result<(), RewireError>> {
    Box::pin(async move {
        match client.call(TunnelEnvelope::new(TunnelRequest::Close { sid }, Some(timeout))).await? {
            TunnelResponse::Closed => Ok(()),
            other => Err(unexpected("closed", &other)),
        }
    })
}

impl AsyncRead for RemoteStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.leftover.is_empty() {
            let n = this.leftover.len().min(buf.remaining());
            buf.put_slice(&this.leftover[..n]);
            this.leftover.drain(..n);
            return Poll::Ready(Ok(()));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let (client, sid, timeout, want) = (this.client.clone(), this.sid, this.timeout, buf.remaining());
        let fut = this
            .pending_read
            .get_or_insert_with(|| read_call(client, sid, want, timeout));
        let result = ready!(fut.as_mut().poll(cx));
        this.pending_read = None;

        let data = result.map_err(io::Error::from)?;
        let n = data.len().min(buf.remaining());
        buf.put_slice(&data[..n]);
        this.leftover.extend_from_slice(&data[n..]);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for RemoteStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "stream closed")));
        }
        // The in-flight call owns a copy of the buffer from the first poll.
        // Callers re-poll with the same bytes after Pending, so the count it
        // returns applies to `buf` as well.
        let (client, sid, timeout) = (this.client.clone(), this.sid, this.timeout);
        let fut = this
            .pending_write
            .get_or_insert_with(|| write_call(client, sid, write_chunk(buf), timeout));
        let result = ready!(fut.as_mut().poll(cx));
        this.pending_write = None;
        Poll::Ready(result.map_err(io::Error::from))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed && this.pending_close.is_none() {
            return Poll::Ready(Ok(()));
        }
        let (client, sid, timeout) = (this.client.clone(), this.sid, this.timeout);
        let fut = this
            .pending_close
            .get_or_insert_with(|| close_call(client, sid, timeout));
        this.closed = true;
        let result = ready!(fut.as_mut().poll(cx));
        this.pending_close = None;
        Poll::Ready(result.map_err(io::Error::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionTable;

    #[tokio::test]
    async fn test_deadline_setters_are_unsupported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let table = Arc::new(SessionTable::default());
        let stream = RemoteStream::open(table, &StreamConfig::new("tcp", addr, Duration::from_secs(1)))
            .await
            .unwrap();

        let err = stream.set_deadline(Instant::now()).unwrap_err();
        assert!(matches!(err, RewireError::Unsupported("set_deadline")));
        assert!(stream.set_read_deadline(Instant::now()).is_err());
        assert!(stream.set_write_deadline(Instant::now()).is_err());
        assert_eq!(stream.local_addr(), ReverseAddr::PIPE);
        assert_eq!(stream.peer_addr().to_string(), "pipe");
    }
}
