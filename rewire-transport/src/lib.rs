// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

pub mod deadline;
pub mod dialer;
mod handoff;
pub mod listener;
pub mod monitored;
pub mod net;
pub mod retry;
pub mod transport;

pub use deadline::Deadline;
pub use dialer::ReverseDialer;
pub use handoff::AdapterState;
pub use listener::{DialFn, ReverseListener};
pub use monitored::MonitoredConnection;
pub use net::{connect_network, TcpConnector};
#[cfg(unix)]
pub use net::UnixConnector;
pub use retry::{retry_notify, Backoff, ExponentialBackoff, NoResetBackoff, RetryingDialer};
pub use transport::{read_frame, tag_call, untag_call, write_frame, write_loop, FramedTransport};
