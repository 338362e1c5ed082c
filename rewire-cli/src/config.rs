// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use anyhow::{bail, Context, Result};
use rewire_model::{BackoffConfig, ClosePolicy};
use std::env;
use std::time::Duration;

/// Process-wide settings, read from `REWIRE_*` variables and then
/// overridden by command line flags.
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    /// Per call deadline for tunneled operations and control dials.
    pub timeout: Duration,
    pub backoff: BackoffConfig,
    pub close_policy: ClosePolicy,
    pub log_json: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
            close_policy: ClosePolicy::default(),
            log_json: false,
        }
    }
}

impl CliConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let timeout = millis(&get, "REWIRE_TIMEOUT_MS")?.unwrap_or(defaults.timeout);
        let initial_interval = millis(&get, "REWIRE_BACKOFF_INITIAL_MS")?
            .unwrap_or(defaults.backoff.initial_interval);
        let max_interval = millis(&get, "REWIRE_BACKOFF_MAX_MS")?
            .unwrap_or(defaults.backoff.max_interval);
        if max_interval < initial_interval {
            bail!("REWIRE_BACKOFF_MAX_MS must not be below REWIRE_BACKOFF_INITIAL_MS");
        }
        // Zero turns the stable connection reset off.
        let stable_after = match millis(&get, "REWIRE_STABLE_AFTER_MS")? {
            Some(d) if d.is_zero() => None,
            Some(d) => Some(d),
            None => defaults.backoff.stable_after,
        };

        let close_policy = if flag(&get, "REWIRE_EVICT_CLOSED")? {
            ClosePolicy::Evict
        } else {
            ClosePolicy::Retain
        };

        Ok(Self {
            timeout,
            backoff: BackoffConfig {
                initial_interval,
                max_interval,
                stable_after,
                ..defaults.backoff
            },
            close_policy,
            log_json: flag(&get, "REWIRE_LOG_JSON")?,
        })
    }
}

fn millis(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    let ms = raw
        .trim()
        .parse::<u64>()
        .with_context(|| format!("{} must be a number of milliseconds, got {:?}", key, raw))?;
    Ok(Some(Duration::from_millis(ms)))
}

fn flag(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<bool> {
    match get(key).as_deref().map(str::trim) {
        None | Some("") | Some("0") | Some("false") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some(other) => bail!("{} must be a boolean, got {:?}", key, other),
    }
}
