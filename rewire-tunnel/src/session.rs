// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use rewire_core::{BoxConnection, RewireError};
use rewire_model::{ClosePolicy, TunnelEnvelope, TunnelRequest, TunnelResponse, WireError, MAX_READ_CHUNK, PING_GREETING};
use rewire_transport::{connect_network, Deadline};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Session {
    network: String,
    address: String,
    reader: Mutex<Option<ReadHalf<BoxConnection>>>,
    writer: Mutex<Option<WriteHalf<BoxConnection>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Session {
    fn new(network: &str, address: &str, conn: BoxConnection) -> Self {
        let (reader, writer) = tokio::io::split(conn);
        Self {
            network: network.to_string(),
            address: address.to_string(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    async fn read(&self, n: usize) -> Result<Vec<u8>, RewireError> {
        let mut reader = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(closed_error()),
            reader = self.reader.lock() => reader,
        };
        let reader = reader.as_mut().ok_or_else(closed_error)?;

        let mut buf = vec![0u8; n];
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(closed_error()),
            read = reader.read(&mut buf) => read?,
        };
        buf.truncate(read);
        Ok(buf)
    }

    async fn write(&self, data: &[u8]) -> Result<usize, RewireError> {
        let mut writer = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(closed_error()),
            writer = self.writer.lock() => writer,
        };
        let writer = writer.as_mut().ok_or_else(closed_error)?;

        let written = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(closed_error()),
            written = writer.write(data) => written?,
        };
        Ok(written)
    }

    async fn close(&self) -> Result<(), RewireError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(closed_error());
        }
        self.cancel.cancel();

        let reader = self.reader.lock().await.take();
        let writer = self.writer.lock().await.take();
        let (Some(reader), Some(writer)) = (reader, writer) else {
            return Ok(());
        };
        let mut conn = reader.unsplit(writer);
        match conn.shutdown().await {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(RewireError::transport(e)),
            _ => Ok(()),
        }
    }
}

fn closed_error() -> RewireError {
    RewireError::transport(io::Error::new(
        io::ErrorKind::NotConnected,
        "use of closed session",
    ))
}

/// Server side of the tunnel: real sockets keyed by session id.
///
/// Ids start at 1 and strictly increase. Operations on different sessions
/// never wait on each other, and a read blocked on one session does not hold
/// up a write to the same session.
pub struct SessionTable {
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    last_id: AtomicU64,
    policy: ClosePolicy,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new(ClosePolicy::default())
    }
}

impl SessionTable {
    pub fn new(policy: ClosePolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            last_id: AtomicU64::new(0),
            policy,
        }
    }

    pub fn policy(&self) -> ClosePolicy {
        self.policy
    }

    /// Number of entries, closed-but-retained sessions included.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn contains(&self, sid: u64) -> bool {
        self.sessions.read().await.contains_key(&sid)
    }

    async fn lookup(&self, sid: u64) -> Result<Arc<Session>, RewireError> {
        self.sessions
            .read()
            .await
            .get(&sid)
            .cloned()
            .ok_or(RewireError::SessionNotFound(sid))
    }

    /// Connects to `address` over `network` and registers the socket.
    pub async fn open_session(
        &self,
        network: &str,
        address: &str,
        deadline: Deadline,
    ) -> Result<u64, RewireError> {
        let conn = deadline
            .execute(async { connect_network(network, address).await.map_err(RewireError::transport) })
            .await?;

        let sid = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions
            .write()
            .await
            .insert(sid, Arc::new(Session::new(network, address, conn)));
        info!(sid, network, address, "session opened");
        Ok(sid)
    }

    /// One read of at most `max_bytes`. An empty result for a non-zero request means EOF.
    pub async fn read_session(
        &self,
        sid: u64,
        max_bytes: u32,
        deadline: Deadline,
    ) -> Result<Vec<u8>, RewireError> {
        let session = self.lookup(sid).await?;
        let n = max_bytes.min(MAX_READ_CHUNK) as usize;
        if n == 0 {
            return Ok(Vec::new());
        }
        let data = deadline.execute(session.read(n)).await?;
        debug!(sid, requested = max_bytes, read = data.len(), "session read");
        Ok(data)
    }

    /// One write call; returns how many bytes the socket accepted.
    pub async fn write_session(
        &self,
        sid: u64,
        data: &[u8],
        deadline: Deadline,
    ) -> Result<u32, RewireError> {
        let session = self.lookup(sid).await?;
        let written = deadline.execute(session.write(data)).await?;
        debug!(sid, offered = data.len(), written, "session write");
        Ok(written as u32)
    }

    /// Closes the socket, unblocking any read or write in flight on it.
    pub async fn close_session(&self, sid: u64) -> Result<(), RewireError> {
        let session = match self.policy {
            ClosePolicy::Retain => self.lookup(sid).await?,
            ClosePolicy::Evict => self
                .sessions
                .write()
                .await
                .remove(&sid)
                .ok_or(RewireError::SessionNotFound(sid))?,
        };
        let result = session.close().await;
        info!(
            sid,
            network = %session.network,
            address = %session.address,
            ok = result.is_ok(),
            "session closed"
        );
        result
    }

    /// Executes one request, with the envelope's timeout as its deadline.
    pub async fn dispatch(&self, envelope: TunnelEnvelope) -> Result<TunnelResponse, RewireError> {
        let deadline = Deadline::from_option(envelope.timeout());
        match envelope.request {
            TunnelRequest::Ping => Ok(TunnelResponse::Pong {
                greeting: PING_GREETING.to_string(),
            }),
            TunnelRequest::Dial { network, address } => {
                let sid = self.open_session(&network, &address, deadline).await?;
                Ok(TunnelResponse::Dialed { sid })
            }
            TunnelRequest::Read { sid, n } => {
                let buf = self.read_session(sid, n, deadline).await?;
                Ok(TunnelResponse::Data { buf })
            }
            TunnelRequest::Write { sid, buf } => {
                let n = self.write_session(sid, &buf, deadline).await?;
                Ok(TunnelResponse::Written { n })
            }
            TunnelRequest::Close { sid } => {
                self.close_session(sid).await?;
                Ok(TunnelResponse::Closed)
            }
        }
    }

    /// Like `dispatch`, with failures folded into the response.
    pub async fn handle(&self, envelope: TunnelEnvelope) -> TunnelResponse {
        match self.dispatch(envelope).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "tunnel request failed");
                TunnelResponse::Error(WireError::from(&e))
            }
        }
    }
}
