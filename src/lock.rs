//! Single-holder indexing lock.
//!
//! At most one indexing run may touch a project's store at a time. The lock
//! is a compare-and-set over an atomic flag: acquisition never blocks, and a
//! busy indexer is reported to the caller instead of queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Non-blocking exclusive lock for one indexer instance.
///
/// `try_acquire` is an atomic free→held transition; among any number of
/// concurrent callers exactly one observes `true`.
#[derive(Debug, Default)]
pub struct IndexLock {
    held: AtomicBool,
}

impl IndexLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to take the lock. Returns `false` immediately if held.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the lock. Caller must have acquired it.
    pub fn release(&self) {
        let was_held = self.held.swap(false, Ordering::AcqRel);
        debug_assert!(was_held, "release() without a matching try_acquire()");
    }

    /// Whether the lock is currently held. Advisory only; the answer can be
    /// stale by the time the caller acts on it.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Acquire as an RAII guard that releases on drop, or `None` if busy.
    pub fn guard(self: &Arc<Self>) -> Option<LockGuard> {
        if self.try_acquire() {
            Some(LockGuard {
                lock: Arc::clone(self),
            })
        } else {
            None
        }
    }
}

/// Releases the owning [`IndexLock`] on drop.
///
/// Dropping the guard on every exit path (including cancellation unwinds)
/// keeps release deterministic.
#[derive(Debug)]
pub struct LockGuard {
    lock: Arc<IndexLock>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}
