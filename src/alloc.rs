//! Extent/block allocator: carves the linear region into aligned blocks
//! for index nodes and data records without global contention on the
//! hot path.
use std::sync::atomic::{AtomicU64, Ordering};

use crate::layout::{self, BLOCK_SIZE, CACHE_LINE, EXT_SZ, MDR};
use crate::percpu::PerCpuTable;

/// Sentinel returned by `alloc_index_blk`/`alloc_data_blk` on failure.
pub const ALLOC_FAILED: usize = 0;

/// Extent/block allocator over a region of `dbsz` bytes starting at
/// `base`. Holds no region ownership; it is handed raw pointers by the
/// engine and trusts they stay valid for its lifetime.
pub struct Allocator {
    base: *mut u8,
    dbsz: u64,
    /// Shared "next writable block" cursor — the only globally
    /// contended allocator state besides the extent bitmap.
    nwb: *const AtomicU64,
    ext_bmp: *const AtomicU64,
    ext_bmp_words: usize,
    percpu: PerCpuTable,
}

unsafe impl Send for Allocator {}
unsafe impl Sync for Allocator {}

impl Allocator {
    /// # Safety
    /// `base` must point to a region of at least `dbsz` bytes, `nwb`
    /// must point at the header's atomic cursor within that region, and
    /// `ext_bmp` at the start of `ext_bmp_words` contiguous `AtomicU64`
    /// words immediately following the header.
    pub unsafe fn new(
        base: *mut u8,
        dbsz: u64,
        nwb: *const AtomicU64,
        ext_bmp: *const AtomicU64,
        ext_bmp_words: usize,
    ) -> Self {
        Allocator {
            base,
            dbsz,
            nwb,
            ext_bmp,
            ext_bmp_words,
            percpu: PerCpuTable::new(),
        }
    }

    #[inline(always)]
    fn nwb(&self) -> &AtomicU64 {
        unsafe { &*self.nwb }
    }

    #[inline(always)]
    fn ext_bit(&self, extent_id: usize) -> &AtomicU64 {
        debug_assert!(extent_id / 64 < self.ext_bmp_words);
        unsafe { &*self.ext_bmp.add(extent_id / 64) }
    }

    /// Mark the extent containing `byte_off` as handed out, if not
    /// already.
    fn mark_extent(&self, byte_off: u64) {
        let extent_id = (byte_off / EXT_SZ as u64) as usize;
        let word = self.ext_bit(extent_id);
        let bit = 1u64 << (extent_id % 64);
        let mut cur = word.load(Ordering::Relaxed);
        loop {
            if cur & bit != 0 {
                return;
            }
            match word.compare_exchange_weak(cur, cur | bit, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Bump the global block cursor by one `BLOCK_SIZE` page. Returns
    /// the byte offset of the new block, or `None` if the region is
    /// exhausted.
    fn acquire_block(&self) -> Option<u64> {
        let off = self.nwb().fetch_add(BLOCK_SIZE as u64, Ordering::AcqRel);
        if off + BLOCK_SIZE as u64 > self.dbsz {
            return None;
        }
        self.mark_extent(off);
        Some(off)
    }

    /// Acquire a run of contiguous blocks large enough for `bytes`,
    /// independent of any per-CPU cursor. Used for oversized data
    /// records that don't fit the normal per-CPU block path.
    fn acquire_run(&self, bytes: usize) -> Option<u64> {
        let blocks = bytes.div_ceil(BLOCK_SIZE) as u64;
        let span = blocks * BLOCK_SIZE as u64;
        let off = self.nwb().fetch_add(span, Ordering::AcqRel);
        if off + span > self.dbsz {
            return None;
        }
        let mut cursor = off;
        while cursor < off + span {
            self.mark_extent(cursor);
            cursor += EXT_SZ as u64;
        }
        Some(off)
    }

    /// Allocate a fresh cache-line-aligned slot for an index node,
    /// advancing the calling CPU's index cursor. Returns a byte offset,
    /// or `None` on out-of-space.
    pub fn alloc_index_blk(&self) -> Option<usize> {
        self.percpu.with_cursor(|cursor| {
            loop {
                let wcl = cursor.i_wcl.load(Ordering::Relaxed);
                if wcl != 0 && wcl % BLOCK_SIZE as u64 != 0 {
                    // Room left in the current block.
                    if cursor
                        .i_wcl
                        .compare_exchange_weak(
                            wcl,
                            wcl + CACHE_LINE as u64,
                            Ordering::AcqRel,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        return Some(wcl as usize);
                    }
                    continue;
                }
                // Block exhausted (or first use): claim a new one.
                let new_block = self.acquire_block()?;
                let _ = cursor.i_wcl.compare_exchange(
                    wcl,
                    new_block + CACHE_LINE as u64,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                return Some(new_block as usize);
            }
        })
    }

    /// Allocate `size` bytes of data storage (rounded up to MDR units),
    /// advancing the calling CPU's data cursor. `size` may request a
    /// contiguous run larger than one MDR block for oversized records.
    /// Returns a byte offset, or `None` on out-of-space.
    pub fn alloc_data_blk(&self, size: usize) -> Option<usize> {
        let need = layout::align_up(size.max(MDR), MDR);

        if need > BLOCK_SIZE {
            // Oversized: bypass the per-CPU cursor entirely.
            return self.acquire_run(need).map(|o| o as usize);
        }

        self.percpu.with_cursor(|cursor| {
            loop {
                let wcl = cursor.d_wcl.load(Ordering::Relaxed);
                // Mirror `alloc_index_blk`'s boundary check: a cursor sitting
                // exactly on a block boundary must claim a fresh block rather
                // than being treated as having room, since `wcl % BLOCK_SIZE
                // == 0` there would otherwise satisfy the fits-check without
                // ever bumping `nwb`.
                let fits = wcl != 0
                    && wcl % BLOCK_SIZE as u64 != 0
                    && (wcl % BLOCK_SIZE as u64) + need as u64 <= BLOCK_SIZE as u64;
                if fits {
                    if cursor
                        .d_wcl
                        .compare_exchange_weak(
                            wcl,
                            wcl + need as u64,
                            Ordering::AcqRel,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        return Some(wcl as usize);
                    }
                    continue;
                }
                let new_block = self.acquire_block()?;
                let _ = cursor.d_wcl.compare_exchange(
                    wcl,
                    new_block + need as u64,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                return Some(new_block as usize);
            }
        })
    }

    /// Raw pointer to `offset` bytes into the region.
    ///
    /// # Safety
    /// `offset` must have come from one of this allocator's `alloc_*`
    /// calls (or the root-node offset).
    #[inline(always)]
    pub unsafe fn ptr(&self, offset: usize) -> *mut u8 {
        self.base.add(offset)
    }

    /// Mark the extent containing `byte_off` as handed out without
    /// going through the normal block-acquisition path. Used once at
    /// `init` to account for the header, extent bitmap and root node,
    /// which are carved out of extent 0 directly rather than claimed
    /// via `acquire_block`.
    pub(crate) fn reserve_extent_for(&self, byte_off: u64) {
        self.mark_extent(byte_off);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_allocator(dbsz: u64) -> (Vec<u8>, AtomicU64, Vec<AtomicU64>) {
        let buf = vec![0u8; dbsz as usize];
        let nwb = AtomicU64::new(
            layout::align_up(layout::root_offset(dbsz) + CACHE_LINE, layout::BLOCK_SIZE) as u64,
        );
        let words = layout::ext_bmp_words(dbsz).max(1);
        let bmp: Vec<AtomicU64> = (0..words).map(|_| AtomicU64::new(0)).collect();
        (buf, nwb, bmp)
    }

    #[test]
    fn alloc_index_blk_is_cache_line_aligned_and_monotonic() {
        let dbsz = 4 * 1024 * 1024;
        let (mut buf, nwb, bmp) = make_allocator(dbsz);
        let alloc = unsafe { Allocator::new(buf.as_mut_ptr(), dbsz, &nwb, bmp.as_ptr(), bmp.len()) };

        let mut seen = std::collections::HashSet::new();
        for _ in 0..2000 {
            let off = alloc.alloc_index_blk().expect("space available");
            assert_eq!(off % CACHE_LINE, 0);
            assert!(seen.insert(off), "offset {off} handed out twice");
        }
    }

    #[test]
    fn alloc_data_blk_is_mdr_aligned() {
        let dbsz = 4 * 1024 * 1024;
        let (mut buf, nwb, bmp) = make_allocator(dbsz);
        let alloc = unsafe { Allocator::new(buf.as_mut_ptr(), dbsz, &nwb, bmp.as_ptr(), bmp.len()) };

        for _ in 0..2000 {
            let off = alloc.alloc_data_blk(64).expect("space available");
            assert_eq!(off % MDR, 0);
        }
    }

    #[test]
    fn oversized_alloc_spans_multiple_blocks() {
        let dbsz = 16 * 1024 * 1024;
        let (mut buf, nwb, bmp) = make_allocator(dbsz);
        let alloc = unsafe { Allocator::new(buf.as_mut_ptr(), dbsz, &nwb, bmp.as_ptr(), bmp.len()) };

        let off = alloc.alloc_data_blk(200_000).expect("space available");
        assert_eq!(off % BLOCK_SIZE, 0);
    }

    #[test]
    fn exhaustion_returns_none() {
        let dbsz = layout::root_offset(256 * 1024) as u64 + BLOCK_SIZE as u64;
        let (mut buf, nwb, bmp) = make_allocator(dbsz);
        // Pin the cursor right at the exhaustion boundary: the very next
        // block acquisition must fail.
        nwb.store(dbsz, Ordering::Relaxed);
        let alloc = unsafe { Allocator::new(buf.as_mut_ptr(), dbsz, &nwb, bmp.as_ptr(), bmp.len()) };

        assert!(alloc.alloc_index_blk().is_none());
    }

    #[test]
    fn index_cursor_eventually_exhausts_region() {
        let dbsz = layout::root_offset(256 * 1024) as u64 + 2 * BLOCK_SIZE as u64;
        let (mut buf, nwb, bmp) = make_allocator(dbsz);
        nwb.store(dbsz - BLOCK_SIZE as u64, Ordering::Relaxed);
        let alloc = unsafe { Allocator::new(buf.as_mut_ptr(), dbsz, &nwb, bmp.as_ptr(), bmp.len()) };

        let mut got_none = false;
        for _ in 0..(BLOCK_SIZE / CACHE_LINE + 2) {
            if alloc.alloc_index_blk().is_none() {
                got_none = true;
                break;
            }
        }
        assert!(got_none, "allocator should exhaust after one block's worth of cache lines");
    }

    #[test]
    fn nwb_is_monotonic_under_concurrent_alloc() {
        use std::sync::Arc;
        use std::thread;

        let dbsz = 16 * 1024 * 1024;
        let (mut buf, nwb, bmp) = make_allocator(dbsz);
        let alloc = Arc::new(unsafe {
            Allocator::new(buf.as_mut_ptr(), dbsz, &nwb, bmp.as_ptr(), bmp.len())
        });
        // Keep `buf` alive for the duration; allocator holds a raw ptr into it.
        let _keep_alive = &mut buf;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let alloc = Arc::clone(&alloc);
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    alloc.alloc_data_blk(32);
                }
            }));
        }
        let mut last = 0u64;
        for h in handles {
            h.join().unwrap();
            let now = unsafe { &*alloc.nwb }.load(Ordering::SeqCst);
            assert!(now >= last);
            last = now;
        }
    }
}
