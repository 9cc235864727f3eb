//! FIFO binary lock guarding the mutation critical section.
//!
//! Non-reentrant and non-owning: `acquire` suspends until the caller holds
//! the lock, `release` hands it directly to the head waiter so there is no
//! observable unlocked window between holders. Waiters are resumed in
//! strict arrival order, which makes overtaking impossible and the lock
//! starvation-free. The API never fails.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

#[derive(Default)]
struct LockState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Async binary lock with strict FIFO waiting.
#[derive(Default)]
pub struct FifoLock {
    state: Mutex<LockState>,
}

impl FifoLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes once the caller holds the lock.
    ///
    /// A free lock is taken in one indivisible step; otherwise the caller
    /// is appended to the tail of the waiter list and suspends until a
    /// release hands the lock over.
    pub async fn acquire(&self) {
        let waiter = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.held {
                state.held = true;
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        // The sender side is only dropped together with the lock itself,
        // so a handoff always arrives while the lock is alive.
        let _ = waiter.await;
    }

    /// Release the lock, handing it to the head waiter if one exists.
    ///
    /// The lock stays marked held across a handoff; it is only marked free
    /// when no waiter is left to take it.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(waiter) = state.waiters.pop_front() {
            // A waiter whose acquire future was dropped cannot take the
            // handoff; skip to the next one.
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.held = false;
    }

    /// Whether the lock is currently held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .held
    }

    /// Number of suspended waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waiters
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn free_lock_is_taken_immediately() {
        let lock = FifoLock::new();
        lock.acquire().await;
        assert!(lock.is_locked());
        lock.release();
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn release_without_waiters_frees_the_lock() {
        let lock = FifoLock::new();
        lock.acquire().await;
        lock.release();
        // Progress: a fresh acquire must not hang.
        lock.acquire().await;
        lock.release();
    }

    #[tokio::test]
    async fn mutual_exclusion_under_contention() {
        let lock = Arc::new(FifoLock::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let lock = lock.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                lock.acquire().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                lock.release();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn waiters_resume_in_arrival_order() {
        let lock = Arc::new(FifoLock::new());
        lock.acquire().await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let lock = lock.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                lock.acquire().await;
                order.lock().unwrap().push(i);
                lock.release();
            }));
            // Let each task reach its acquire before spawning the next so
            // arrival order is deterministic.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(lock.waiter_count(), 8);

        lock.release();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn dropped_waiter_is_skipped() {
        let lock = Arc::new(FifoLock::new());
        lock.acquire().await;

        // First waiter gives up before the handoff.
        let abandoned = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        abandoned.abort();
        let _ = abandoned.await;

        // Second waiter must still make progress.
        let second = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.acquire().await;
                lock.release();
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        lock.release();
        second.await.unwrap();
        assert!(!lock.is_locked());
    }
}
