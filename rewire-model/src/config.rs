// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where a tunneled stream should connect on the remote host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub network: String,
    pub address: String,
    /// Deadline applied to every call the stream issues.
    pub timeout: Duration,
}

impl StreamConfig {
    pub fn new(network: impl Into<String>, address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
            timeout,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            address: "127.0.0.1:9003".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Exponential backoff parameters for reverse dialing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Jitter as a fraction of the current interval (0.0 - 1.0).
    pub randomization_factor: f64,
    /// `None` retries forever.
    pub max_elapsed: Option<Duration>,
    /// A connection that lived this long resets the backoff on the next dial.
    pub stable_after: Option<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_elapsed: None,
            stable_after: Some(Duration::from_secs(30)),
        }
    }
}

/// What closing a session does to its table entry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosePolicy {
    /// The entry stays after close; later calls report the closed socket.
    #[default]
    Retain,
    /// The entry is removed; later calls report `SessionNotFound`.
    Evict,
}
