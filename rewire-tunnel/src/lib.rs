// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

//! Remote socket sessions.
//!
//! A `TunnelServer` keeps real sockets in a `SessionTable`; clients drive them
//! through `RemoteStream`, one RPC per read, write or close.

pub mod client;
pub mod server;
pub mod session;
pub mod stream;

pub use client::{ping, RpcTunnelClient, TunnelClient, DEFAULT_GRACE};
pub use server::{serve_connection, TunnelServer};
pub use session::SessionTable;
pub use stream::RemoteStream;
