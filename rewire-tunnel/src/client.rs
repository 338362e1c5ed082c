// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use crate::session::SessionTable;
use rewire_core::{BoxFuture, RewireError, Transport};
use rewire_model::codec::{decode_response, encode_envelope};
use rewire_model::{TunnelEnvelope, TunnelRequest, TunnelResponse};
use rewire_transport::Deadline;
use std::sync::Arc;
use std::time::Duration;

/// Slack on top of the server side deadline, so a server timeout arrives as a
/// reply instead of being cut off locally.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Issues tunnel requests. Error replies surface as `Err`.
pub trait TunnelClient: Send + Sync {
    fn call(&self, envelope: TunnelEnvelope) -> BoxFuture<'_, Result<TunnelResponse, RewireError>>;
}

impl<T: TunnelClient + ?Sized> TunnelClient for Arc<T> {
    fn call(&self, envelope: TunnelEnvelope) -> BoxFuture<'_, Result<TunnelResponse, RewireError>> {
        (**self).call(envelope)
    }
}

/// In-process loopback: requests go straight to the table.
impl TunnelClient for SessionTable {
    fn call(&self, envelope: TunnelEnvelope) -> BoxFuture<'_, Result<TunnelResponse, RewireError>> {
        Box::pin(self.dispatch(envelope))
    }
}

/// Tunnel client over an RPC transport.
pub struct RpcTunnelClient<T> {
    transport: T,
    grace: Duration,
}

impl<T: Transport> RpcTunnelClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    async fn call_inner(&self, envelope: TunnelEnvelope) -> Result<TunnelResponse, RewireError> {
        let budget = envelope.timeout();
        let bytes = encode_envelope(&envelope)?;

        let reply = Deadline::from_option(budget)
            .extended(self.grace)
            .execute(self.transport.call(&bytes))
            .await
            .map_err(|e| match (e, budget) {
                (RewireError::Timeout(_), Some(budget)) => RewireError::Timeout(budget),
                (e, _) => e,
            })?;

        match decode_response(&reply)? {
            TunnelResponse::Error(e) => Err(e.into()),
            response => Ok(response),
        }
    }
}

impl<T: Transport> TunnelClient for RpcTunnelClient<T> {
    fn call(&self, envelope: TunnelEnvelope) -> BoxFuture<'_, Result<TunnelResponse, RewireError>> {
        Box::pin(self.call_inner(envelope))
    }
}

pub(crate) fn unexpected(expected: &str, got: &TunnelResponse) -> RewireError {
    RewireError::Remote(format!("expected {} reply, got {}", expected, got.kind()))
}

/// Health check; returns the server's greeting.
pub async fn ping<C: TunnelClient + ?Sized>(client: &C, timeout: Duration) -> Result<String, RewireError> {
    match client.call(TunnelEnvelope::new(TunnelRequest::Ping, Some(timeout))).await? {
        TunnelResponse::Pong { greeting } => Ok(greeting),
        other => Err(unexpected("pong", &other)),
    }
}
