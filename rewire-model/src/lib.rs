// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;

pub use config::*;
pub use error::WireError;
pub use protocol::*;

pub use rkyv;
pub use serde;
