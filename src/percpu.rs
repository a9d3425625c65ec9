//! Per-CPU write cursors for the allocator.
//!
//! The source this engine is descended from is a Linux kernel module,
//! where per-CPU data is indexed by the running CPU with preemption
//! disabled around access so a softirq can't reenter the same cursor
//! from the same CPU. There is no such thing as disabling preemption
//! from userspace, so this is adapted rather than ported literally:
//! cursors are indexed by `sched_getcpu()` (falling back to a
//! thread-local round-robin index on non-Linux targets), and the
//! "preemption disabled" requirement becomes the simple fact that a
//! cursor is only ever touched through [`PerCpuTable::with_cursor`],
//! which samples the CPU id once and confines all mutation to that one
//! slot for the duration of the closure. If the thread migrates mid-call
//! the only consequence is that the allocation gets charged to whichever
//! CPU's cursor it touched — never a data race, since cursors are never
//! shared or locked against each other.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Two offsets: the current partially-written index block and the
/// current partially-written data block, forfeited on every restart.
#[repr(align(64))] // avoid false sharing between adjacent CPUs' cursors
pub struct PerCpuState {
    pub i_wcl: AtomicU64,
    pub d_wcl: AtomicU64,
}

impl PerCpuState {
    const fn new() -> Self {
        PerCpuState {
            i_wcl: AtomicU64::new(0),
            d_wcl: AtomicU64::new(0),
        }
    }
}

/// A fixed-size table of per-CPU cursor pairs, one slot per detected
/// CPU (or a conservative default if detection fails).
pub struct PerCpuTable {
    slots: Vec<PerCpuState>,
}

impl PerCpuTable {
    /// Build a table sized to the number of logical CPUs visible to this
    /// process.
    pub fn new() -> Self {
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(1);
        let mut slots = Vec::with_capacity(n);
        for _ in 0..n {
            slots.push(PerCpuState::new());
        }
        PerCpuTable { slots }
    }

    #[inline]
    fn slot(&self, cpu: usize) -> &PerCpuState {
        &self.slots[cpu % self.slots.len()]
    }

    /// Run `f` with exclusive (by convention, not by lock) access to the
    /// calling thread's current-CPU cursor pair.
    #[inline]
    pub fn with_cursor<R>(&self, f: impl FnOnce(&PerCpuState) -> R) -> R {
        f(self.slot(current_cpu()))
    }
}

impl Default for PerCpuTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
#[inline]
fn current_cpu() -> usize {
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        thread_slot()
    } else {
        cpu as usize
    }
}

#[cfg(not(target_os = "linux"))]
#[inline]
fn current_cpu() -> usize {
    thread_slot()
}

/// Stable small index assigned to each thread on first use, round-robin.
/// Used as the CPU-id fallback where `sched_getcpu` is unavailable or
/// fails.
fn thread_slot() -> usize {
    thread_local! {
        static SLOT: usize = next_slot();
    }
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    fn next_slot() -> usize {
        NEXT.fetch_add(1, Ordering::Relaxed)
    }
    SLOT.with(|s| *s)
}
