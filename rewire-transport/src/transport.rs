// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use rewire_core::{BoxFuture, Connection, Connector, Memo, RewireError, Transport};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Largest frame either side will accept.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const CALL_ID_LEN: usize = 8;

// Length (u32, little endian) + payload

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "frame too large"));
    }
    w.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    w.write_all(payload).await?;
    w.flush().await
}

/// Reads one frame. `Ok(None)` on a clean EOF before the length prefix.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }

    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Prefixes `payload` with the call id it belongs to.
pub fn tag_call(id: u64, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(CALL_ID_LEN + payload.len());
    frame.extend_from_slice(&id.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Splits a tagged frame into call id and payload.
pub fn untag_call(mut frame: Vec<u8>) -> io::Result<(u64, Vec<u8>)> {
    if frame.len() < CALL_ID_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame shorter than call id"));
    }
    let mut id = [0u8; CALL_ID_LEN];
    id.copy_from_slice(&frame[..CALL_ID_LEN]);
    frame.drain(..CALL_ID_LEN);
    Ok((u64::from_le_bytes(id), frame))
}

/// Pumps queued frames into `writer` until the queue closes or a write fails.
pub async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut frames: mpsc::Receiver<Vec<u8>>,
) -> io::Result<()> {
    while let Some(frame) = frames.recv().await {
        write_frame(&mut writer, &frame).await?;
    }
    writer.shutdown().await
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Vec<u8>>>>>;

/// Multiplexed request/response transport over one stream.
///
/// Every call is tagged with an id and any number of calls may be in flight.
/// Frames are written by a dedicated task, so dropping a call future never
/// leaves half a frame on the wire; its reply is simply discarded.
pub struct FramedTransport {
    frames: mpsc::Sender<Vec<u8>>,
    pending: Pending,
    next_id: AtomicU64,
    broken: Memo<RewireError>,
    reader: JoinHandle<()>,
}

impl FramedTransport {
    pub fn new<S: Connection>(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (frames, queued) = mpsc::channel(64);
        let pending: Pending = Arc::default();
        let broken = Memo::new();

        tokio::spawn(writer_task(write_half, queued, broken.clone(), pending.clone()));
        let reader = tokio::spawn(reader_task(read_half, pending.clone(), broken.clone()));

        Self {
            frames,
            pending,
            next_id: AtomicU64::new(1),
            broken,
            reader,
        }
    }

    pub async fn connect<T: Connector>(
        connector: &T,
        target: &str,
        timeout: Option<Duration>,
    ) -> io::Result<Self> {
        Ok(Self::new(connector.connect(target, timeout).await?))
    }

    /// True once the underlying stream has failed or been closed by the peer.
    pub fn is_broken(&self) -> bool {
        self.broken.is_set()
    }

    fn failure(&self) -> RewireError {
        self.broken.get().unwrap_or_else(|| {
            RewireError::transport(io::Error::new(io::ErrorKind::NotConnected, "transport closed"))
        })
    }

    async fn call_inner(&self, data: Vec<u8>) -> Result<Vec<u8>, RewireError> {
        if let Some(err) = self.broken.get() {
            return Err(err);
        }
        // An oversized frame would kill the writer task and every other call
        // with it; fail just this one.
        if data.len() > MAX_FRAME_LEN - CALL_ID_LEN {
            return Err(RewireError::transport(io::Error::new(
                io::ErrorKind::InvalidInput,
                "frame too large",
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let _guard = {
            let mut pending = lock(&self.pending);
            pending.insert(id, tx);
            PendingGuard {
                pending: self.pending.clone(),
                id,
            }
        };
        // The reader settles `broken` before draining the table; re-check so a
        // call registered after the drain does not wait forever.
        if let Some(err) = self.broken.get() {
            return Err(err);
        }

        self.frames
            .send(tag_call(id, &data))
            .await
            .map_err(|_| self.failure())?;

        rx.await.map_err(|_| self.failure())
    }
}

impl Transport for FramedTransport {
    fn call(&self, data: &[u8]) -> BoxFuture<'_, Result<Vec<u8>, RewireError>> {
        let data = data.to_vec();
        Box::pin(self.call_inner(data))
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Forgets a call whose future went away before the reply arrived.
struct PendingGuard {
    pending: Pending,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Vec<u8>>>> {
    // Nothing panics while holding the lock, so a poisoned table is still consistent.
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn settle(broken: &Memo<RewireError>, pending: &Pending, err: io::Error) {
    if broken.set(RewireError::transport(err)) {
        debug!("[FramedTransport] stream ended, failing pending calls");
    }
    lock(pending).clear();
}

async fn writer_task<S: Connection>(
    writer: WriteHalf<S>,
    frames: mpsc::Receiver<Vec<u8>>,
    broken: Memo<RewireError>,
    pending: Pending,
) {
    if let Err(e) = write_loop(writer, frames).await {
        settle(&broken, &pending, e);
    }
}

async fn reader_task<S: Connection>(
    mut reader: ReadHalf<S>,
    pending: Pending,
    broken: Memo<RewireError>,
) {
    let err = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the transport"),
            Err(e) => break e,
        };
        let (id, reply) = match untag_call(frame) {
            Ok(tagged) => tagged,
            Err(e) => break e,
        };
        if let Some(tx) = lock(&pending).remove(&id) {
            let _ = tx.send(reply);
        }
    };
    settle(&broken, &pending, err);
}
