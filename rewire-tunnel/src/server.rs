// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use crate::session::SessionTable;
use rewire_core::{Acceptor, Connection, RewireError};
use rewire_model::codec::{decode_envelope, encode_response};
use rewire_model::{TunnelResponse, WireError};
use rewire_transport::{read_frame, tag_call, untag_call, write_loop};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Serves a `SessionTable` to tunnel clients.
///
/// Every control connection gets its own task, and every request on it runs
/// concurrently, so a blocked remote read does not stall other calls.
#[derive(Clone)]
pub struct TunnelServer {
    table: Arc<SessionTable>,
}

impl TunnelServer {
    pub fn new(table: Arc<SessionTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    /// Accepts control connections until `shutdown` fires or the acceptor fails.
    pub async fn serve<A: Acceptor>(
        &self,
        mut acceptor: A,
        shutdown: CancellationToken,
    ) -> Result<(), RewireError> {
        info!("[TunnelServer] serving");
        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("[TunnelServer] shutting down");
                    return Ok(());
                }
                accepted = acceptor.accept() => accepted,
            };

            match accepted {
                Ok(conn) => {
                    debug!("[TunnelServer] control connection accepted");
                    let table = self.table.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(table, conn, shutdown).await {
                            warn!(error = %e, "[TunnelServer] control connection failed");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "[TunnelServer] accept failed, server stopping");
                    return Err(RewireError::accept_failed(e));
                }
            }
        }
    }
}

/// Answers tagged requests on one control connection until the peer hangs up.
pub async fn serve_connection<C: Connection>(
    table: Arc<SessionTable>,
    conn: C,
    shutdown: CancellationToken,
) -> Result<(), RewireError> {
    let (mut reader, writer) = tokio::io::split(conn);
    let (replies, queued) = mpsc::channel::<Vec<u8>>(64);
    let writer = tokio::spawn(write_loop(writer, queued));

    let outcome = loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break Ok(()),
            frame = read_frame(&mut reader) => frame,
        };
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(RewireError::transport(e)),
        };
        let (id, payload) = match untag_call(frame) {
            Ok(tagged) => tagged,
            Err(e) => break Err(RewireError::transport(e)),
        };

        let table = table.clone();
        let replies = replies.clone();
        tokio::spawn(async move {
            let response = match decode_envelope(&payload) {
                Ok(envelope) => table.handle(envelope).await,
                Err(e) => TunnelResponse::Error(WireError::from(&e)),
            };
            match encode_response(&response) {
                Ok(bytes) => {
                    // The connection may be gone by now; nobody is waiting then.
                    let _ = replies.send(tag_call(id, &bytes)).await;
                }
                Err(e) => warn!(error = %e, "[TunnelServer] could not encode reply"),
            }
        });
    };

    // Nobody reads replies once the request side is gone.
    drop(replies);
    writer.abort();
    match writer.await {
        Ok(Err(e)) => debug!(error = %e, "[TunnelServer] reply writer ended with error"),
        Err(e) if !e.is_cancelled() => warn!(error = %e, "[TunnelServer] reply writer panicked"),
        _ => {}
    }
    debug!("[TunnelServer] control connection finished");
    outcome
}
