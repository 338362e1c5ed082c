// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. Logs go to stderr so `cat` output stays clean.
pub fn init_logging(json: bool) {
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .json()
    });
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(json_layer)
        .with(text_layer)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "rewire initialized");
}
