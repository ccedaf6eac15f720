use r3_defer::EventSemaphore;
use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// The real-time length of a tick used by [`StdSemaphore::take`]'s timeout.
const TICK_PERIOD: Duration = Duration::from_millis(1);

/// A bounded counting semaphore implementing [`EventSemaphore`] for the host
/// environment.
///
/// A timeout passed to [`EventSemaphore::take`] is measured in real time,
/// with one tick corresponding to one millisecond. It's independent from the
/// simulated tick count of the port.
#[derive(Debug)]
pub struct StdSemaphore {
    count: Mutex<usize>,
    cond: Condvar,
    max_count: usize,
}

impl StdSemaphore {
    /// Construct a `StdSemaphore` whose count is initially zero and saturates
    /// at `max_count`.
    pub const fn new(max_count: usize) -> Self {
        Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
            max_count,
        }
    }

    /// Get the current count.
    pub fn count(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        // The count is always in a valid state, so poisoning can be ignored
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSemaphore for StdSemaphore {
    fn give(&self) {
        let mut count = self.lock();
        if *count < self.max_count {
            *count += 1;
        }
        drop(count);
        self.cond.notify_one();
    }

    fn take(&self, timeout: Option<u32>) -> bool {
        let count = self.lock();
        let mut count = match timeout {
            None => self
                .cond
                .wait_while(count, |count| *count == 0)
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                self.cond
                    .wait_timeout_while(count, TICK_PERIOD * timeout, |count| *count == 0)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };

        if *count == 0 {
            log::trace!("take: timed out");
            false
        } else {
            *count -= 1;
            true
        }
    }

    fn reset(&self) {
        *self.lock() = 0;
    }
}
