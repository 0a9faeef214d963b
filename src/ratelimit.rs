//! Process-wide rate-limit coordination.
//!
//! One shared gate pauses every worker when the upstream signals
//! throttling. This is simpler than per-worker backoff and correct for
//! the dominant case of a single shared API quota: the first worker to
//! observe a 429 trips the gate, and all workers sleep until the
//! deadline passes.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Global gate shared by all workers of one pipeline.
///
/// The only state is an optional `blocked_until` deadline behind a
/// mutex. The lock is held only to read or write the deadline, never
/// across a sleep or any I/O.
#[derive(Debug, Default)]
pub struct RateLimitCoordinator {
    blocked_until: Mutex<Option<Instant>>,
}

impl RateLimitCoordinator {
    /// Creates an open (unblocked) coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the gate is open.
    ///
    /// Called by a worker before initiating an LLM call. If a deadline
    /// is set and still in the future, sleeps until then; re-checks
    /// after waking in case another worker extended the deadline in
    /// the meantime. Multiple simultaneous acquirers all resume once
    /// the deadline passes.
    pub async fn acquire(&self) {
        loop {
            let remaining = {
                let guard = self.lock();
                guard.and_then(|deadline| deadline.checked_duration_since(Instant::now()))
            };

            match remaining {
                Some(wait) if !wait.is_zero() => {
                    debug!(wait_secs = wait.as_secs_f64(), "rate limit gate closed, waiting");
                    tokio::time::sleep(wait).await;
                }
                _ => return,
            }
        }
    }

    /// Closes the gate for `retry_after` from now.
    ///
    /// The deadline only ever extends: a trip that would land earlier
    /// than the current deadline leaves it unchanged, so late-arriving
    /// 429s from already-in-flight calls cannot shorten the cooldown.
    pub fn trip(&self, retry_after: Duration) {
        let candidate = Instant::now() + retry_after;
        let mut guard = self.lock();
        let extended = guard.is_none_or(|current| candidate > current);
        if extended {
            *guard = Some(candidate);
            drop(guard);
            warn!(
                retry_after_secs = retry_after.as_secs_f64(),
                "rate limit tripped, pausing all workers"
            );
        }
    }

    /// Non-blocking observation for progress display.
    ///
    /// Returns whether the gate is closed and the remaining cooldown.
    #[must_use]
    pub fn is_blocked(&self) -> (bool, Duration) {
        let guard = self.lock();
        match *guard {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => (true, remaining),
                _ => (false, Duration::ZERO),
            },
            None => (false, Duration::ZERO),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        // A poisoned lock only means a panicking thread observed the
        // deadline; the Option itself is always coherent.
        match self.blocked_until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
