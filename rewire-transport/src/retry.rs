// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use rand::Rng;
use rewire_core::{BoxFuture, Connector, RewireError};
use rewire_model::BackoffConfig;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A retry delay strategy. `None` from `next_backoff` means give up.
pub trait Backoff: Send {
    fn next_backoff(&mut self) -> Option<Duration>;
    fn reset(&mut self);
}

impl<B: Backoff + ?Sized> Backoff for Box<B> {
    fn next_backoff(&mut self) -> Option<Duration> {
        (**self).next_backoff()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current: Duration,
    started: Instant,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial_interval,
            started: Instant::now(),
            config,
        }
    }

    /// The interval the next delay is drawn around, before jitter.
    pub fn current_interval(&self) -> Duration {
        self.current
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl Backoff for ExponentialBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.config.max_elapsed {
            if self.started.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current;
        let grown = interval.as_secs_f64() * self.config.multiplier;
        self.current = Duration::from_secs_f64(grown.min(self.config.max_interval.as_secs_f64()));

        Some(jitter(interval, self.config.randomization_factor))
    }

    fn reset(&mut self) {
        self.current = self.config.initial_interval;
        self.started = Instant::now();
    }
}

fn jitter(interval: Duration, factor: f64) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    if factor == 0.0 || interval.is_zero() {
        return interval;
    }
    let secs = interval.as_secs_f64();
    let delta = secs * factor;
    let picked = rand::thread_rng().gen_range((secs - delta)..=(secs + delta));
    Duration::from_secs_f64(picked.max(0.0))
}

/// Ignores `reset`, so delay state carries over between retry runs.
///
/// A connection that drops right after being established therefore does not
/// restart from the minimum delay. Only `force_reset` rewinds the strategy.
#[derive(Clone, Debug)]
pub struct NoResetBackoff<B> {
    inner: B,
}

impl<B: Backoff> NoResetBackoff<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    pub fn force_reset(&mut self) {
        self.inner.reset();
    }

    pub fn get_ref(&self) -> &B {
        &self.inner
    }
}

impl<B: Backoff> Backoff for NoResetBackoff<B> {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.inner.next_backoff()
    }

    fn reset(&mut self) {}
}

/// Runs `op` until it succeeds, the strategy gives up, or `cancel` fires.
///
/// The strategy is reset once up front. Each failure that will be retried is
/// reported to `notify` together with the delay before the next attempt.
pub async fn retry_notify<B, T, E, F, Fut, N>(
    backoff: &mut B,
    cancel: &CancellationToken,
    mut op: F,
    mut notify: N,
) -> Result<T, E>
where
    B: Backoff + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnMut(&E, Duration),
    E: From<RewireError>,
{
    backoff.reset();
    loop {
        if cancel.is_cancelled() {
            return Err(RewireError::Cancelled.into());
        }

        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RewireError::Cancelled.into()),
            attempt = op() => attempt,
        };

        let err = match attempt {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some(delay) = backoff.next_backoff() else {
            return Err(err);
        };
        notify(&err, delay);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RewireError::Cancelled.into()),
            _ = sleep(delay) => {}
        }
    }
}

/// Dial function for a reverse listener: connects to a fixed target through
/// `connector`, retrying with a non-resetting exponential backoff.
///
/// The backoff is rewound only when the previously returned connection lived
/// at least `stable_after`, which is taken as sustained success.
pub struct RetryingDialer<T> {
    connector: T,
    target: String,
    backoff: Mutex<NoResetBackoff<ExponentialBackoff>>,
    stable_after: Option<Duration>,
    last_success: std::sync::Mutex<Option<Instant>>,
}

impl<T: Connector> RetryingDialer<T> {
    pub fn new(connector: T, target: impl Into<String>, config: &BackoffConfig) -> Self {
        Self {
            connector,
            target: target.into(),
            backoff: Mutex::new(NoResetBackoff::new(ExponentialBackoff::new(config.clone()))),
            stable_after: config.stable_after,
            last_success: std::sync::Mutex::new(None),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn previous_was_stable(&self) -> bool {
        let Some(stable_after) = self.stable_after else {
            return false;
        };
        match self.last_success.lock() {
            Ok(last) => matches!(*last, Some(at) if at.elapsed() >= stable_after),
            Err(_) => false,
        }
    }

    fn mark_success(&self) {
        if let Ok(mut last) = self.last_success.lock() {
            *last = Some(Instant::now());
        }
    }

    pub async fn dial(&self, cancel: CancellationToken) -> io::Result<T::Conn> {
        let mut backoff = self.backoff.lock().await;
        if self.previous_was_stable() {
            debug!(peer = %self.target, "previous connection was stable, resetting backoff");
            backoff.force_reset();
        }

        let connector = &self.connector;
        let target = self.target.as_str();
        let conn = retry_notify(
            &mut *backoff,
            &cancel,
            move || {
                debug!(peer = %target, "dialing");
                connector.connect(target, None)
            },
            |e: &io::Error, delay| {
                warn!(peer = %target, error = %e, delay = ?delay, "retryable error while dialing");
            },
        )
        .await?;

        self.mark_success();
        Ok(conn)
    }

    /// Turns the dialer into the closure shape `ReverseListener::new` takes.
    pub fn into_dial_fn(
        self,
    ) -> impl Fn(CancellationToken) -> BoxFuture<'static, io::Result<T::Conn>> + Send + Sync + 'static
    {
        let this = Arc::new(self);
        move |cancel| -> BoxFuture<'static, io::Result<T::Conn>> {
            let this = this.clone();
            Box::pin(async move { this.dial(cancel).await })
        }
    }
}
