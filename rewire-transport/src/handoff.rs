// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use crate::monitored::MonitoredConnection;
use rewire_core::{Connection, Memo, RewireError};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lifecycle of a reverse adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Running,
    Stopped,
}

pub(crate) type Slot<C> = mpsc::Sender<MonitoredConnection<C>>;

/// Consumer side of the capacity-one handoff between a background loop and
/// its callers, plus the loop's join handle.
pub(crate) struct Handoff<C> {
    conns: Mutex<mpsc::Receiver<MonitoredConnection<C>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connection> Handoff<C> {
    /// Spawns `run` with the producer half of a fresh single-slot channel.
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(Slot<C>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(run(tx));
        Self {
            conns: Mutex::new(rx),
            task: Mutex::new(Some(task)),
        }
    }

    /// Next delivered connection, or the memoized error once the loop has stopped.
    pub(crate) async fn next(
        &self,
        cancel: &CancellationToken,
        terminal: &Memo<RewireError>,
    ) -> Result<MonitoredConnection<C>, RewireError> {
        if let Some(err) = terminal.get() {
            return Err(err);
        }

        let mut conns = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(terminal.wait().await),
            conns = self.conns.lock() => conns,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(terminal.wait().await),
            conn = conns.recv() => match conn {
                Some(conn) => Ok(conn),
                None => Err(terminal.wait().await),
            },
        }
    }

    /// Cancels the loop, waits for it to exit, then closes whatever is still
    /// sitting undelivered in the slot. Returns the memoized outcome.
    pub(crate) async fn shutdown(
        &self,
        cancel: &CancellationToken,
        terminal: &Memo<RewireError>,
        label: &'static str,
    ) -> RewireError {
        cancel.cancel();

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(adapter = label, error = %e, "background loop did not exit cleanly");
            }
        }

        let mut conns = self.conns.lock().await;
        conns.close();
        while let Some(mut conn) = conns.recv().await {
            debug!(adapter = label, "closing undelivered connection");
            if let Err(e) = conn.close().await {
                debug!(adapter = label, error = %e, "undelivered connection closed with error");
            }
        }
        drop(conns);

        terminal.wait().await
    }
}

/// Records a fallback outcome if the loop is torn down without settling one
/// (panic, runtime shutdown). Normal exits set the memo first, so this loses.
pub(crate) struct SettleOnDrop(pub(crate) Memo<RewireError>);

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        if self
            .0
            .set(RewireError::Remote("background loop ended unexpectedly".to_string()))
        {
            warn!("reverse adapter loop ended without an outcome");
        }
    }
}
