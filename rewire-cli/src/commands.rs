// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use crate::config::CliConfig;
use anyhow::{bail, Context, Result};
use rewire_core::{Acceptor, Connector, RewireError};
use rewire_model::StreamConfig;
use rewire_transport::{FramedTransport, ReverseDialer, ReverseListener, RetryingDialer, TcpConnector};
use rewire_tunnel::{ping, RemoteStream, RpcTunnelClient, SessionTable, TunnelServer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A socket address given on the command line: `host:port` or `unix:/path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(path) = raw.strip_prefix("unix:") {
            if path.is_empty() {
                bail!("unix endpoint needs a path: {:?}", raw);
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if raw.is_empty() {
            bail!("empty endpoint");
        }
        Ok(Self::Tcp(raw.to_string()))
    }
}

impl std::str::FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => f.write_str(addr),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// How the client gets its control connection to a tunnel server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Dial the server.
    Connect(Endpoint),
    /// Listen and wait for a reverse-serving server to dial in.
    Accept(Endpoint),
}

/// Cancels the returned token on Ctrl-C.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        trigger.cancel();
    });
    token
}

fn server(config: &CliConfig) -> TunnelServer {
    TunnelServer::new(Arc::new(SessionTable::new(config.close_policy)))
}

/// `rewire serve`: tunnel server on a real listener.
pub async fn serve(listen: Endpoint, config: &CliConfig, shutdown: CancellationToken) -> Result<()> {
    let server = server(config);
    info!(listen = %listen, policy = ?config.close_policy, "starting tunnel server");
    match listen {
        Endpoint::Tcp(addr) => {
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {}", addr))?;
            server.serve(listener, shutdown).await?;
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let listener = tokio::net::UnixListener::bind(&path)
                .with_context(|| format!("failed to bind {}", path.display()))?;
            let result = server.serve(listener, shutdown).await;
            let _ = std::fs::remove_file(&path);
            result?;
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => bail!("unix sockets are not available on this platform"),
    }
    Ok(())
}

/// `rewire reverse-serve`: tunnel server that dials out to its clients.
pub async fn reverse_serve(target: Endpoint, config: &CliConfig, shutdown: CancellationToken) -> Result<()> {
    info!(target_addr = %target, "starting reverse tunnel server");
    match target {
        Endpoint::Tcp(addr) => serve_dialing(TcpConnector, addr, config, shutdown).await,
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let path = path.to_string_lossy().into_owned();
            serve_dialing(rewire_transport::UnixConnector, path, config, shutdown).await
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => bail!("unix sockets are not available on this platform"),
    }
}

async fn serve_dialing<T: Connector>(
    connector: T,
    target: String,
    config: &CliConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let dialer = RetryingDialer::new(connector, target, &config.backoff);
    let listener = ReverseListener::new(dialer.into_dial_fn());
    server(config).serve(listener, shutdown).await?;
    Ok(())
}

async fn transport_over<A: Acceptor>(listener: A) -> Result<FramedTransport> {
    let dialer = ReverseDialer::new(listener);
    info!("waiting for the server to dial in");
    let transport = FramedTransport::connect(&dialer, "", None)
        .await
        .context("no reverse connection")?;
    match dialer.close().await {
        Ok(()) | Err(RewireError::Cancelled) => {}
        Err(e) => warn!(error = %e, "reverse dialer stopped with error"),
    }
    Ok(transport)
}

/// Opens the control connection and wraps it in a tunnel client.
pub async fn connect(control: &Control, config: &CliConfig) -> Result<RpcTunnelClient<FramedTransport>> {
    let timeout = Some(config.timeout);
    let transport = match control {
        Control::Connect(Endpoint::Tcp(addr)) => FramedTransport::connect(&TcpConnector, addr, timeout)
            .await
            .with_context(|| format!("failed to connect to {}", addr))?,
        #[cfg(unix)]
        Control::Connect(Endpoint::Unix(path)) => {
            let path = path.to_string_lossy();
            FramedTransport::connect(&rewire_transport::UnixConnector, &path, timeout)
                .await
                .with_context(|| format!("failed to connect to {}", path))?
        }
        Control::Accept(Endpoint::Tcp(addr)) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {}", addr))?;
            transport_over(listener).await?
        }
        #[cfg(unix)]
        Control::Accept(Endpoint::Unix(path)) => {
            let listener = tokio::net::UnixListener::bind(path)
                .with_context(|| format!("failed to bind {}", path.display()))?;
            let transport = transport_over(listener).await;
            let _ = std::fs::remove_file(path);
            transport?
        }
        #[cfg(not(unix))]
        _ => bail!("unix sockets are not available on this platform"),
    };
    Ok(RpcTunnelClient::new(transport))
}

/// `rewire cat`: copies a remote socket to stdout.
pub async fn cat(control: Control, network: String, address: String, config: &CliConfig) -> Result<()> {
    let client = connect(&control, config).await?;
    let stream_config = StreamConfig::new(network, address, config.timeout);
    let mut stream = RemoteStream::open(Arc::new(client), &stream_config)
        .await
        .with_context(|| format!("remote dial of {} failed", stream_config.address))?;
    info!(sid = stream.session_id(), "remote stream open");

    let copied = tokio::io::copy(&mut stream, &mut tokio::io::stdout()).await;
    let closed = stream.close().await;
    let copied = copied.context("copy to stdout failed")?;
    info!(bytes = copied, "remote stream finished");
    closed.context("remote close failed")?;
    Ok(())
}

/// `rewire ping`: health check against a tunnel server.
pub async fn health(control: Control, config: &CliConfig) -> Result<String> {
    let client = connect(&control, config).await?;
    let greeting = ping(&client, config.timeout).await.context("ping failed")?;
    Ok(greeting)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(Endpoint::parse("127.0.0.1:9000").unwrap(), Endpoint::Tcp("127.0.0.1:9000".into()));
        assert_eq!(
            Endpoint::parse("unix:/tmp/rewire.sock").unwrap(),
            Endpoint::Unix(PathBuf::from("/tmp/rewire.sock"))
        );
        assert!(Endpoint::parse("unix:").is_err());
        assert!(Endpoint::parse("").is_err());
        assert_eq!(Endpoint::parse("unix:/a").unwrap().to_string(), "unix:/a");
    }

    #[tokio::test]
    async fn test_ping_against_served_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let config = CliConfig::default();
        let shutdown = CancellationToken::new();
        let server = server(&config);
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move { server.serve(listener, shutdown).await }
        });

        let greeting = health(Control::Connect(Endpoint::Tcp(addr)), &config).await.unwrap();
        assert_eq!(greeting, "HI");
        shutdown.cancel();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reverse_serve_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let config = CliConfig::default();
        let shutdown = CancellationToken::new();

        // The client listens first; the server keeps dialing until it appears.
        let client = tokio::spawn({
            let config = config.clone();
            let control = Control::Accept(Endpoint::Unix(path.clone()));
            async move { health(control, &config).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tokio::spawn({
            let shutdown = shutdown.clone();
            let config = config.clone();
            async move { reverse_serve(Endpoint::Unix(path), &config, shutdown).await }
        });

        assert_eq!(client.await.unwrap().unwrap(), "HI");
        shutdown.cancel();
    }
}
