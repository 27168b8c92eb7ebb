// SPDX-License-Identifier: Apache-2.0
//! The condition variable the receive threads use to wake the render thread.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the guard if a thread died while holding it.
/// Shared state here is plain counters, always valid.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wakeup channel between receive threads and the render thread.
///
/// The guarded value is a generation counter so a notification between
/// predicate checks is never lost: waiters re-check their predicate whenever
/// the generation advances or the poll interval elapses.
#[derive(Debug, Default)]
pub struct SyncSignal {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl SyncSignal {
    /// Create a signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        let mut generation = lock(&self.generation);
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Block until `done()` returns true or `timeout` elapses.
    ///
    /// `on_waiting` runs once if the wait exceeds one second, mirroring the
    /// render loop's "waiting for peer" diagnostics. Returns whether the
    /// predicate was satisfied.
    pub fn wait_until(
        &self,
        timeout: Duration,
        mut done: impl FnMut() -> bool,
        on_waiting: impl FnOnce(),
    ) -> bool {
        let start = Instant::now();
        let mut on_waiting = Some(on_waiting);

        let mut generation = lock(&self.generation);
        loop {
            if done() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            if start.elapsed() >= Duration::from_secs(1) {
                if let Some(cb) = on_waiting.take() {
                    cb();
                }
            }

            let (guard, _) = self
                .condvar
                .wait_timeout(generation, Duration::from_millis(100))
                .unwrap_or_else(PoisonError::into_inner);
            generation = guard;
        }
    }
}

// --- Unit tests -----------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn wait_returns_once_predicate_flips() {
        let signal = Arc::new(SyncSignal::new());
        let flag = Arc::new(AtomicBool::new(false));

        let signal2 = Arc::clone(&signal);
        let flag2 = Arc::clone(&flag);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag2.store(true, Ordering::SeqCst);
            signal2.notify_all();
        });

        let ok = signal.wait_until(
            Duration::from_secs(5),
            || flag.load(Ordering::SeqCst),
            || {},
        );
        assert!(ok);
        handle.join().expect("notifier");
    }

    #[test]
    fn wait_times_out_when_nothing_happens() {
        let signal = SyncSignal::new();
        let ok = signal.wait_until(Duration::from_millis(50), || false, || {});
        assert!(!ok);
    }
}
