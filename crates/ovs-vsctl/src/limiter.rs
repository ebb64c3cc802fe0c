//! Global concurrency limiter for switch commands.
//!
//! A counting semaphore whose capacity can be changed at runtime. Lowering
//! the capacity never revokes permits that were already granted: the
//! in-flight count simply stays above the limit until enough permits are
//! released, and new acquisitions wait until it drops below.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Counting semaphore with an adjustable capacity.
#[derive(Debug)]
pub struct CommandLimiter {
    limit: AtomicUsize,
    in_flight: AtomicUsize,
    changed: Notify,
}

impl CommandLimiter {
    /// Creates a limiter allowing `limit` concurrent commands.
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            limit: AtomicUsize::new(limit.get()),
            in_flight: AtomicUsize::new(0),
            changed: Notify::new(),
        }
    }

    /// Returns the current capacity.
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    /// Returns the number of permits currently granted.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Replaces the capacity. Waiters re-check immediately.
    pub fn set_limit(&self, limit: NonZeroUsize) {
        self.limit.store(limit.get(), Ordering::Release);
        self.changed.notify_waiters();
    }

    /// Waits for a permit. The permit is returned when the guard drops.
    pub async fn acquire(self: &Arc<Self>) -> CommandPermit {
        loop {
            // Register interest before checking so a release between the
            // check and the await still wakes us.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            notified.await;
        }
    }

    /// Takes a permit if one is free right now.
    pub fn try_acquire(self: &Arc<Self>) -> Option<CommandPermit> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.limit() {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(CommandPermit {
                        limiter: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.changed.notify_waiters();
    }
}

/// A granted permit. Dropping it releases the slot on every exit path.
#[derive(Debug)]
pub struct CommandPermit {
    limiter: Arc<CommandLimiter>,
}

impl Drop for CommandPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
