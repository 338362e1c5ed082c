// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Every failure the adapters and the tunnel can surface.
///
/// The type is `Clone` because terminal errors are memoized and handed to
/// every observer of a stopped adapter; io errors are shared behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum RewireError {
    /// The dial function of a reverse listener gave up. Terminal.
    #[error("dial failed: {0}")]
    DialFailed(Arc<io::Error>),

    /// The real listener behind a reverse dialer failed. Terminal.
    #[error("accept failed: {0}")]
    AcceptFailed(Arc<io::Error>),

    /// An explicit close raced a blocked operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A caller supplied deadline elapsed. Not terminal.
    #[error("deadline exceeded ({0:?})")]
    Timeout(Duration),

    #[error("session {0} not found")]
    SessionNotFound(u64),

    /// Socket level failure, passed through with its original kind.
    #[error("transport error: {0}")]
    Transport(Arc<io::Error>),

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("codec error: {0}")]
    Codec(String),

    /// Failure reported by the far side that has no closer local meaning.
    #[error("remote error: {0}")]
    Remote(String),
}

impl RewireError {
    pub fn transport(err: io::Error) -> Self {
        Self::Transport(Arc::new(err))
    }

    pub fn dial_failed(err: io::Error) -> Self {
        Self::DialFailed(Arc::new(err))
    }

    pub fn accept_failed(err: io::Error) -> Self {
        Self::AcceptFailed(Arc::new(err))
    }

    /// Stable numeric code, used when the error crosses the wire.
    pub fn code(&self) -> u16 {
        match self {
            Self::DialFailed(_) => 100,
            Self::AcceptFailed(_) => 101,
            Self::Cancelled => 102,
            Self::Timeout(_) => 103,
            Self::SessionNotFound(_) => 104,
            Self::Transport(_) => 105,
            Self::Unsupported(_) => 200,
            Self::Codec(_) => 201,
            Self::Remote(_) => 202,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// True for errors that end the lifetime of a reverse adapter.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DialFailed(_) | Self::AcceptFailed(_) | Self::Cancelled
        )
    }

    /// The io kind that best describes this error.
    pub fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::DialFailed(e) | Self::AcceptFailed(e) | Self::Transport(e) => e.kind(),
            Self::Cancelled => io::ErrorKind::Interrupted,
            Self::Timeout(_) => io::ErrorKind::TimedOut,
            Self::SessionNotFound(_) => io::ErrorKind::NotFound,
            Self::Unsupported(_) => io::ErrorKind::Unsupported,
            Self::Codec(_) => io::ErrorKind::InvalidData,
            Self::Remote(_) => io::ErrorKind::Other,
        }
    }
}

impl From<io::Error> for RewireError {
    fn from(err: io::Error) -> Self {
        Self::transport(err)
    }
}

impl From<RewireError> for io::Error {
    fn from(err: RewireError) -> Self {
        match err {
            RewireError::Transport(inner) => match Arc::try_unwrap(inner) {
                Ok(inner) => inner,
                Err(shared) => io::Error::new(shared.kind(), shared.to_string()),
            },
            other => io::Error::new(other.io_kind(), other),
        }
    }
}
