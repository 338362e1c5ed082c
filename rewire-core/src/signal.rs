// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use std::sync::Arc;
use tokio::sync::watch;

/// Single-assignment completion cell with a broadcast ready signal.
///
/// The first `set` wins; later values are discarded. Every waiter, whether it
/// arrived before or after the value was set, observes the same value.
/// Cloning shares the cell.
#[derive(Debug)]
pub struct Memo<T> {
    slot: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Clone> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Memo<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Stores `value` if nothing was stored yet. Returns whether this call won.
    pub fn set(&self, value: T) -> bool {
        let mut value = Some(value);
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    pub fn get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    pub fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Waits until a value has been stored and returns a copy of it.
    pub async fn wait(&self) -> T {
        let mut rx = self.slot.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().as_ref() {
                return value.clone();
            }
            // The sender lives inside `self`, so this only errors after drop.
            let _ = rx.changed().await;
        }
    }
}

/// One-shot broadcast: fires at most once, every waiter wakes.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Memo<()>,
}

impl Signal {
    pub fn new() -> Self {
        Self { inner: Memo::new() }
    }

    /// Fires the signal. Firing twice is a no-op; returns whether this call fired it.
    pub fn fire(&self) -> bool {
        self.inner.set(())
    }

    pub fn is_fired(&self) -> bool {
        self.inner.is_set()
    }

    pub async fn fired(&self) {
        self.inner.wait().await
    }
}
