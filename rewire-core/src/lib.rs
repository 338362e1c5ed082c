// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod addr;
pub mod error;
pub mod signal;

pub use addr::ReverseAddr;
pub use error::RewireError;
pub use signal::{Memo, Signal};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A duplex byte stream. Closing is `shutdown` followed by drop.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxConnection = Box<dyn Connection>;

/// Listener-shaped capability: hands out inbound connections one at a time.
/// The listener is closed by dropping it.
pub trait Acceptor: Send + 'static {
    type Conn: Connection;

    fn accept(&mut self) -> BoxFuture<'_, io::Result<Self::Conn>>;
}

/// Dial-shaped capability. `target` is a hint some implementations ignore;
/// `timeout` of `None` waits indefinitely.
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    fn connect<'a>(
        &'a self,
        target: &'a str,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, io::Result<Self::Conn>>;
}

/// Client side of a request/response RPC substrate.
pub trait Transport: Send + Sync {
    fn call(&self, data: &[u8]) -> BoxFuture<'_, Result<Vec<u8>, RewireError>>;
}

impl Acceptor for tokio::net::TcpListener {
    type Conn = tokio::net::TcpStream;

    fn accept(&mut self) -> BoxFuture<'_, io::Result<Self::Conn>> {
        Box::pin(async move {
            let (stream, _) = tokio::net::TcpListener::accept(self).await?;
            Ok(stream)
        })
    }
}

#[cfg(unix)]
impl Acceptor for tokio::net::UnixListener {
    type Conn = tokio::net::UnixStream;

    fn accept(&mut self) -> BoxFuture<'_, io::Result<Self::Conn>> {
        Box::pin(async move {
            let (stream, _) = tokio::net::UnixListener::accept(self).await?;
            Ok(stream)
        })
    }
}
