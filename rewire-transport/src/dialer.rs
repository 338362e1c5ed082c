// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use crate::deadline::Deadline;
use crate::handoff::{AdapterState, Handoff, SettleOnDrop, Slot};
use crate::monitored::MonitoredConnection;
use rewire_core::{Acceptor, BoxFuture, Connector, Memo, ReverseAddr, RewireError};
use std::io;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A traditional listening server that hands out inbound connections as if
/// they had been dialed.
///
/// Callers are expected to call `dial` repeatedly, the way a server calls
/// accept in a loop. The target passed to `dial` is ignored.
pub struct ReverseDialer<A: Acceptor> {
    listener: Mutex<Option<A>>,
    cancel: CancellationToken,
    handoff: OnceCell<Handoff<A::Conn>>,
    terminal: Memo<RewireError>,
}

impl<A: Acceptor> ReverseDialer<A> {
    pub fn new(listener: A) -> Self {
        Self {
            listener: Mutex::new(Some(listener)),
            cancel: CancellationToken::new(),
            handoff: OnceCell::new(),
            terminal: Memo::new(),
        }
    }

    async fn start(&self) -> &Handoff<A::Conn> {
        self.handoff
            .get_or_init(|| async {
                let listener = self.listener.lock().ok().and_then(|mut slot| slot.take());
                let cancel = self.cancel.clone();
                let terminal = self.terminal.clone();
                debug!("[ReverseDialer] starting accept loop");
                Handoff::spawn(move |slot| accept_loop(listener, cancel, slot, terminal))
            })
            .await
    }

    /// Returns the next inbound connection.
    ///
    /// `timeout` of `None` waits indefinitely. Running out of time yields
    /// `RewireError::Timeout` and leaves the dialer running; once the dialer
    /// has stopped every call fails with the memoized error.
    pub async fn dial(
        &self,
        _target: &str,
        timeout: Option<Duration>,
    ) -> Result<MonitoredConnection<A::Conn>, RewireError> {
        let handoff = self.start().await;
        if let Some(err) = self.terminal.get() {
            return Err(err);
        }
        Deadline::from_option(timeout)
            .execute(handoff.next(&self.cancel, &self.terminal))
            .await
    }

    /// Stops accepting and drops the wrapped listener.
    ///
    /// Always yields the memoized terminal error, matching what blocked
    /// `dial` calls observe.
    pub async fn close(&self) -> Result<(), RewireError> {
        let handoff = self.start().await;
        Err(handoff
            .shutdown(&self.cancel, &self.terminal, "reverse-dialer")
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

    pub fn terminal_error(&self) -> Option<RewireError> {
        self.terminal.get()
    }

    pub fn local_addr(&self) -> ReverseAddr {
        ReverseAddr::REVERSE
    }
}

impl<A: Acceptor> Drop for ReverseDialer<A> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop<A: Acceptor>(
    listener: Option<A>,
    cancel: CancellationToken,
    slot: Slot<A::Conn>,
    terminal: Memo<RewireError>,
) {
    let _settle = SettleOnDrop(terminal.clone());

    let Some(mut listener) = listener else {
        terminal.set(RewireError::Remote("listener already taken".to_string()));
        return;
    };

    let outcome = loop {
        // Claim the slot before accepting so at most one accepted connection
        // is ever waiting for a caller.
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RewireError::Cancelled,
            permit = slot.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break RewireError::Cancelled,
            },
        };

        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RewireError::Cancelled,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(conn) => {
                permit.send(MonitoredConnection::new(conn));
                debug!("[ReverseDialer] inbound connection queued");
            }
            Err(e) => {
                warn!(error = %e, "[ReverseDialer] accept failed, dialer stopping");
                break RewireError::accept_failed(e);
            }
        }
    };

    terminal.set(outcome);
    drop(slot);
    drop(listener);
}

impl<A: Acceptor> Connector for ReverseDialer<A> {
    type Conn = MonitoredConnection<A::Conn>;

    fn connect<'a>(
        &'a self,
        target: &'a str,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, io::Result<Self::Conn>> {
        Box::pin(async move { self.dial(target, timeout).await.map_err(io::Error::from) })
    }
}
