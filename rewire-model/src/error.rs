// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use rewire_core::RewireError;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;

/// `RewireError` flattened for the wire.
#[derive(Serialize, Deserialize, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct WireError {
    pub code: u16,
    pub kind: u16,
    pub sid: u64,
    pub timeout_ms: u64,
    pub message: String,
}

impl From<&RewireError> for WireError {
    fn from(err: &RewireError) -> Self {
        let (sid, timeout_ms, message) = match err {
            RewireError::SessionNotFound(sid) => (*sid, 0, err.to_string()),
            RewireError::Timeout(t) => (0, t.as_millis().min(u64::MAX as u128) as u64, err.to_string()),
            RewireError::DialFailed(e) | RewireError::AcceptFailed(e) | RewireError::Transport(e) => {
                (0, 0, e.to_string())
            }
            RewireError::Codec(m) | RewireError::Remote(m) => (0, 0, m.clone()),
            _ => (0, 0, err.to_string()),
        };
        Self {
            code: err.code(),
            kind: kind_to_code(err.io_kind()),
            sid,
            timeout_ms,
            message,
        }
    }
}

impl From<WireError> for RewireError {
    fn from(err: WireError) -> Self {
        let io_err = || io::Error::new(kind_from_code(err.kind), err.message.clone());
        match err.code {
            100 => RewireError::dial_failed(io_err()),
            101 => RewireError::accept_failed(io_err()),
            102 => RewireError::Cancelled,
            103 => RewireError::Timeout(Duration::from_millis(err.timeout_ms)),
            104 => RewireError::SessionNotFound(err.sid),
            105 => RewireError::transport(io_err()),
            201 => RewireError::Codec(err.message),
            _ => RewireError::Remote(err.message),
        }
    }
}

const KINDS: &[(io::ErrorKind, u16)] = &[
    (io::ErrorKind::NotFound, 1),
    (io::ErrorKind::PermissionDenied, 2),
    (io::ErrorKind::ConnectionRefused, 3),
    (io::ErrorKind::ConnectionReset, 4),
    (io::ErrorKind::ConnectionAborted, 5),
    (io::ErrorKind::NotConnected, 6),
    (io::ErrorKind::AddrInUse, 7),
    (io::ErrorKind::AddrNotAvailable, 8),
    (io::ErrorKind::BrokenPipe, 9),
    (io::ErrorKind::AlreadyExists, 10),
    (io::ErrorKind::WouldBlock, 11),
    (io::ErrorKind::InvalidInput, 12),
    (io::ErrorKind::InvalidData, 13),
    (io::ErrorKind::TimedOut, 14),
    (io::ErrorKind::WriteZero, 15),
    (io::ErrorKind::Interrupted, 16),
    (io::ErrorKind::Unsupported, 17),
    (io::ErrorKind::UnexpectedEof, 18),
];

pub fn kind_to_code(kind: io::ErrorKind) -> u16 {
    KINDS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, code)| *code)
        .unwrap_or(0)
}

pub fn kind_from_code(code: u16) -> io::ErrorKind {
    KINDS
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(kind, _)| *kind)
        .unwrap_or(io::ErrorKind::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_survives_the_wire() {
        let wire = WireError::from(&RewireError::SessionNotFound(42));
        match RewireError::from(wire) {
            RewireError::SessionNotFound(sid) => assert_eq!(sid, 42),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_transport_error_keeps_kind_and_message() {
        let err = RewireError::transport(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"));
        let back = RewireError::from(WireError::from(&err));
        assert_eq!(back.io_kind(), io::ErrorKind::ConnectionReset);
        assert!(back.to_string().contains("peer went away"));
    }

    #[test]
    fn test_timeout_keeps_duration() {
        let err = RewireError::Timeout(Duration::from_millis(1500));
        match RewireError::from(WireError::from(&err)) {
            RewireError::Timeout(t) => assert_eq!(t, Duration::from_millis(1500)),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
