// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use rewire_core::{BoxConnection, BoxFuture, Connector};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

/// Plain TCP dialing; `target` is `host:port`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Conn = TcpStream;

    fn connect<'a>(
        &'a self,
        target: &'a str,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, io::Result<Self::Conn>> {
        Box::pin(async move { with_timeout(timeout, TcpStream::connect(target)).await })
    }
}

/// Unix domain socket dialing; `target` is the socket path.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixConnector;

#[cfg(unix)]
impl Connector for UnixConnector {
    type Conn = tokio::net::UnixStream;

    fn connect<'a>(
        &'a self,
        target: &'a str,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, io::Result<Self::Conn>> {
        Box::pin(async move { with_timeout(timeout, tokio::net::UnixStream::connect(target)).await })
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl std::future::Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match timeout {
        None => fut.await,
        Some(t) => tokio::time::timeout(t, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?,
    }
}

/// Opens a real connection by network family name.
///
/// Supported families: `tcp`, `tcp4`, `tcp6` and, on unix, `unix`.
pub async fn connect_network(network: &str, address: &str) -> io::Result<BoxConnection> {
    debug!(network, address, "opening outbound connection");
    match network {
        "tcp" => Ok(Box::new(TcpStream::connect(address).await?)),
        "tcp4" => Ok(Box::new(connect_family(address, SocketAddr::is_ipv4).await?)),
        "tcp6" => Ok(Box::new(connect_family(address, SocketAddr::is_ipv6).await?)),
        #[cfg(unix)]
        "unix" => Ok(Box::new(tokio::net::UnixStream::connect(address).await?)),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unknown network {}", other),
        )),
    }
}

async fn connect_family(address: &str, keep: fn(&SocketAddr) -> bool) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in lookup_host(address).await?.filter(|a| keep(a)) {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address of the requested family for {}", address),
        )
    }))
}
