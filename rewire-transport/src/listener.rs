// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use crate::handoff::{AdapterState, Handoff, SettleOnDrop, Slot};
use crate::monitored::MonitoredConnection;
use rewire_core::{Acceptor, BoxFuture, Connection, Memo, ReverseAddr, RewireError};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Dials one connection. Retry and backoff are the function's own business;
/// an error stops the listener for good.
pub type DialFn<C> = Box<dyn Fn(CancellationToken) -> BoxFuture<'static, io::Result<C>> + Send + Sync>;

/// A listener that does not listen.
///
/// It dials out with the supplied function and offers each established
/// connection through `accept`. The next dial only happens once the previously
/// delivered connection has been closed, so at most one connection is in
/// flight at any time.
pub struct ReverseListener<C> {
    dial: Arc<DialFn<C>>,
    cancel: CancellationToken,
    handoff: OnceCell<Handoff<C>>,
    terminal: Memo<RewireError>,
}

impl<C: Connection> ReverseListener<C> {
    pub fn new<F, Fut>(dial: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<C>> + Send + 'static,
    {
        let dial: DialFn<C> = Box::new(move |cancel| -> BoxFuture<'static, io::Result<C>> {
            Box::pin(dial(cancel))
        });
        Self {
            dial: Arc::new(dial),
            cancel: CancellationToken::new(),
            handoff: OnceCell::new(),
            terminal: Memo::new(),
        }
    }

    async fn start(&self) -> &Handoff<C> {
        self.handoff
            .get_or_init(|| async {
                debug!("[ReverseListener] starting dial loop");
                let dial = self.dial.clone();
                let cancel = self.cancel.clone();
                let terminal = self.terminal.clone();
                Handoff::spawn(move |slot| dial_loop(dial, cancel, slot, terminal))
            })
            .await
    }

    /// Waits for and returns the next dialed connection.
    pub async fn accept(&self) -> Result<MonitoredConnection<C>, RewireError> {
        let handoff = self.start().await;
        handoff.next(&self.cancel, &self.terminal).await
    }

    /// Stops dialing. Blocked `accept` calls return; an established but
    /// undelivered connection is closed.
    ///
    /// Returns the memoized terminal error, the same one `accept` callers
    /// see: `Cancelled` after an explicit close, or the dial error if the
    /// dial function had already failed.
    pub async fn close(&self) -> Result<(), RewireError> {
        let handoff = self.start().await;
        Err(handoff
            .shutdown(&self.cancel, &self.terminal, "reverse-listener")
            .await)
    }

    pub fn state(&self) -> AdapterState {
        if !self.handoff.initialized() {
            AdapterState::Uninitialized
        } else if self.terminal.is_set() {
            AdapterState::Stopped
        } else {
            AdapterState::Running
        }
    }

    /// The memoized terminal error, once the listener has stopped.
    pub fn terminal_error(&self) -> Option<RewireError> {
        self.terminal.get()
    }

    /// Placeholder; a reverse listener has no address of its own.
    pub fn local_addr(&self) -> ReverseAddr {
        ReverseAddr::REVERSE
    }
}

impl<C> Drop for ReverseListener<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn dial_loop<C: Connection>(
    dial: Arc<DialFn<C>>,
    cancel: CancellationToken,
    slot: Slot<C>,
    terminal: Memo<RewireError>,
) {
    let _settle = SettleOnDrop(terminal.clone());

    let outcome = loop {
        let dialed = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RewireError::Cancelled,
            dialed = (dial)(cancel.child_token()) => dialed,
        };

        let mut conn = match dialed {
            Ok(conn) => MonitoredConnection::new(conn),
            Err(e) => {
                warn!(error = %e, "[ReverseListener] dial failed, listener stopping");
                break RewireError::dial_failed(e);
            }
        };
        let closed = conn.closed_signal();

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = slot.reserve() => permit.ok(),
        };
        let Some(permit) = permit else {
            // Ownership never transferred, so closing it is on us.
            if let Err(e) = conn.close().await {
                debug!(error = %e, "[ReverseListener] close of unclaimed connection failed");
            }
            break RewireError::Cancelled;
        };
        permit.send(conn);
        debug!("[ReverseListener] connection handed off");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break RewireError::Cancelled,
            _ = closed.fired() => debug!("[ReverseListener] connection closed, dialing again"),
        }
    };

    terminal.set(outcome);
    drop(slot);
}

impl<C: Connection> Acceptor for ReverseListener<C> {
    type Conn = MonitoredConnection<C>;

    fn accept(&mut self) -> BoxFuture<'_, io::Result<Self::Conn>> {
        let this: &ReverseListener<C> = self;
        Box::pin(async move { ReverseListener::<C>::accept(this).await.map_err(io::Error::from) })
    }
}
