//! Exclusive control of the playback backend.
//!
//! At most one queue connection may drive the backend at a time. The lease is
//! a single slot: acquisition never waits, and the slot is handed back when
//! the [`LeaseGuard`] is dropped, on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide single-slot lease. Cloning shares the same slot.
#[derive(Clone, Default)]
pub struct MasterLease {
    held: Arc<AtomicBool>,
}

impl MasterLease {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to become master. Returns `None` when another connection holds the lease.
    pub fn try_acquire(&self) -> Option<LeaseGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LeaseGuard {
                held: Arc::clone(&self.held),
                released: false,
            })
    }

    /// `true` while some connection holds the lease.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of holding the master lease.
pub struct LeaseGuard {
    held: Arc<AtomicBool>,
    released: bool,
}

impl LeaseGuard {
    /// Hand the lease back. Calling it more than once is a no-op.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.held.store(false, Ordering::Release);
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.release();
    }
}
