//! Bounded pool of live remote sessions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

use super::Deadline;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session pool is closed")]
    PoolClosed,

    #[error("deadline of {}s elapsed", .0.as_secs())]
    DeadlineElapsed(Duration),
}

/// Caps the number of concurrently open sessions across all endpoints.
///
/// Cloning shares the same slots.
#[derive(Debug, Clone)]
pub struct SessionPool {
    slots: Arc<Semaphore>,
    limit: usize,
}

impl SessionPool {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run one session while holding a slot.
    ///
    /// Waits for a free slot first; the deadline starts once the slot is held.
    /// If the deadline passes, the session future is dropped, which closes
    /// whatever connection it owned. The slot is released on every path.
    pub async fn run<F, Fut, T>(&self, budget: Duration, session: F) -> Result<T, SessionError>
    where
        F: FnOnce(Deadline) -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| SessionError::PoolClosed)?;

        let deadline = Deadline::after(budget);
        tokio::time::timeout_at(deadline.instant(), session(deadline))
            .await
            .map_err(|_| SessionError::DeadlineElapsed(budget))
    }

    /// Refuse new sessions. Sessions already running are unaffected.
    pub fn close(&self) {
        self.slots.close();
    }
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new(crate::settings::DEFAULT_SESSION_LIMIT)
    }
}
