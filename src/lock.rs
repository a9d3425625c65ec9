//! Compact reader/writer lock for a single bucket.
//!
//! Mirrors the read_lock/read_unlock/write_lock/write_unlock shape of a
//! cross-process `pthread_rwlock_t` wrapper, but a `pthread_rwlock_t` is
//! 56+ bytes on Linux x86_64 — too large to embed in a 128-byte bucket
//! alongside `coll_next`/`flags` and still leave room for packed
//! records. This is a small spinning reader-count/writer-bit lock
//! instead, sized to a single `u32`, safe to embed directly in shared
//! memory and to copy-construct via zeroing (an all-zero word is the
//! unlocked state, matching how fresh MDR blocks are handed out).
use std::sync::atomic::{AtomicU32, Ordering};

const WRITER: u32 = 1 << 31;
const READERS_MASK: u32 = WRITER - 1;

/// A reader/writer lock embedded directly in the region.
///
/// All-zero bytes mean "unlocked, no readers" — the same
/// zero-is-a-valid-initial-state property the rest of the layout
/// depends on when a fresh block is handed out by the allocator.
#[repr(C)]
pub struct BucketLock {
    state: AtomicU32,
}

const _: () = assert!(std::mem::size_of::<BucketLock>() == 4);

impl BucketLock {
    /// Acquire a read lock. Spins until no writer holds the lock.
    pub fn read_lock(&self) {
        loop {
            let cur = self.state.load(Ordering::Relaxed);
            if cur & WRITER == 0
                && self
                    .state
                    .compare_exchange_weak(cur, cur + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            std::hint::spin_loop();
        }
    }

    /// Release a read lock.
    pub fn read_unlock(&self) {
        let prev = self.state.fetch_sub(1, Ordering::Release);
        debug_assert!(prev & READERS_MASK > 0, "read_unlock without matching read_lock");
    }

    /// Acquire a write lock. Spins until no reader or writer holds the
    /// lock.
    pub fn write_lock(&self) {
        loop {
            if self
                .state
                .compare_exchange_weak(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            std::hint::spin_loop();
        }
    }

    /// Release a write lock.
    pub fn write_unlock(&self) {
        let prev = self.state.swap(0, Ordering::Release);
        debug_assert_eq!(prev & WRITER, WRITER, "write_unlock without matching write_lock");
    }
}
