// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use rewire_core::RewireError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// Absolute point in time after which an operation fails with `Timeout`.
///
/// `Deadline::none()` never expires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
            budget: timeout,
        }
    }

    pub fn none() -> Self {
        Self {
            at: None,
            budget: Duration::ZERO,
        }
    }

    pub fn from_option(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_else(Self::none)
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// The same deadline pushed back by `grace`.
    pub fn extended(&self, grace: Duration) -> Self {
        Self {
            at: self.at.map(|at| at + grace),
            budget: self.budget + grace,
        }
    }

    pub async fn execute<F, T>(&self, f: F) -> Result<T, RewireError>
    where
        F: Future<Output = Result<T, RewireError>>,
    {
        match self.at {
            None => f.await,
            Some(at) => match timeout_at(at, f).await {
                Ok(result) => result,
                Err(_) => Err(RewireError::Timeout(self.budget)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_exceeded_is_timeout() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let result: Result<(), RewireError> = deadline
            .execute(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(RewireError::Timeout(t)) if t == Duration::from_millis(20)));
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_unbounded_deadline_passes_result_through() {
        let deadline = Deadline::none();
        assert_eq!(deadline.remaining(), None);
        let value = deadline.execute(async { Ok::<_, RewireError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
