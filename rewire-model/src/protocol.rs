// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use crate::error::WireError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Greeting returned by the health check.
pub const PING_GREETING: &str = "HI";

/// Upper bound on a single tunneled read, whatever the caller asks for.
pub const MAX_READ_CHUNK: u32 = 1 << 20;

/// Upper bound on the bytes carried by one tunneled write. Larger writes are
/// short and report how much was taken.
pub const MAX_WRITE_CHUNK: usize = 1 << 20;

#[derive(Serialize, Deserialize, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub enum TunnelRequest {
    Ping,
    Dial { network: String, address: String },
    Read { sid: u64, n: u32 },
    Write { sid: u64, buf: Vec<u8> },
    Close { sid: u64 },
}

/// One RPC call: the request plus the caller's deadline, relative to receipt.
#[derive(Serialize, Deserialize, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct TunnelEnvelope {
    pub timeout_ms: Option<u64>,
    pub request: TunnelRequest,
}

impl TunnelEnvelope {
    pub fn new(request: TunnelRequest, timeout: Option<Duration>) -> Self {
        Self {
            timeout_ms: timeout.map(|t| t.as_millis().min(u64::MAX as u128) as u64),
            request,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Serialize, Deserialize, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub enum TunnelResponse {
    Pong { greeting: String },
    Dialed { sid: u64 },
    Data { buf: Vec<u8> },
    Written { n: u32 },
    Closed,
    Error(WireError),
}

impl TunnelResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pong { .. } => "pong",
            Self::Dialed { .. } => "dialed",
            Self::Data { .. } => "data",
            Self::Written { .. } => "written",
            Self::Closed => "closed",
            Self::Error(_) => "error",
        }
    }
}
