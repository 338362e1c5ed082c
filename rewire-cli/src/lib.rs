// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

pub mod commands;
pub mod config;
pub mod logging;

pub use commands::{Control, Endpoint};
pub use config::CliConfig;
pub use logging::init_logging;
