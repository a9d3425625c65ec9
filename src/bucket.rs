//! Bucket layer: a collision-chain element holding one or more packed
//! records, each bucket MDR-aligned and guarded by its own
//! reader/writer lock. Mirrors the teacher's slab-of-packed-entries
//! layout (`SlotHeader` + key bytes + value bytes back to back in one
//! arena slot), generalized to a variable-length chain of such slots
//! instead of one flat array plus a free list.
use crate::alloc::Allocator;
use crate::layout::{self, BucketHeader, Slot, BUCKET_HEADER_SIZE, MDR};
use crate::record::{frec_size, RecordRef};

/// A reference to a bucket at a known byte offset.
#[derive(Clone, Copy)]
pub struct BucketRef {
    pub offset: usize,
}

impl BucketRef {
    #[inline(always)]
    pub fn from_slot_offset(off: u32) -> BucketRef {
        BucketRef {
            offset: Slot::data_byte_offset(off),
        }
    }

    #[inline(always)]
    pub fn slot(&self) -> Slot {
        Slot::from_data_offset(self.offset)
    }

    /// # Safety
    /// `alloc` must have a `BucketHeader` at `self.offset`.
    unsafe fn header<'a>(&self, alloc: &'a Allocator) -> &'a BucketHeader {
        &*(alloc.ptr(self.offset) as *const BucketHeader)
    }

    /// # Safety
    /// Same as [`Self::header`].
    unsafe fn header_mut<'a>(&self, alloc: &'a Allocator) -> &'a mut BucketHeader {
        &mut *(alloc.ptr(self.offset) as *mut BucketHeader)
    }

    /// # Safety
    /// Same as [`Self::header`].
    pub unsafe fn read_lock(&self, alloc: &Allocator) {
        self.header(alloc).lock.read_lock();
    }

    /// # Safety
    /// Same as [`Self::header`].
    pub unsafe fn read_unlock(&self, alloc: &Allocator) {
        self.header(alloc).lock.read_unlock();
    }

    /// # Safety
    /// Same as [`Self::header`].
    pub unsafe fn write_lock(&self, alloc: &Allocator) {
        self.header(alloc).lock.write_lock();
    }

    /// # Safety
    /// Same as [`Self::header`].
    pub unsafe fn write_unlock(&self, alloc: &Allocator) {
        self.header(alloc).lock.write_unlock();
    }

    /// # Safety
    /// Same as [`Self::header`].
    pub unsafe fn next(&self, alloc: &Allocator) -> Option<BucketRef> {
        let n = self.header(alloc).coll_next;
        if n == 0 {
            None
        } else {
            Some(BucketRef::from_slot_offset(n))
        }
    }

    /// Link this bucket's `coll_next` to `next`. Caller must hold this
    /// bucket's write lock.
    ///
    /// # Safety
    /// Same as [`Self::header`], plus the locking requirement above.
    pub unsafe fn link_next(&self, alloc: &Allocator, next: BucketRef) {
        self.header_mut(alloc).coll_next = match next.slot() {
            Slot::Data(d) => d,
            _ => unreachable!("bucket offsets are always data-tagged"),
        };
    }

    /// Offset of the first record slot, immediately after the header.
    #[inline(always)]
    fn records_start(&self) -> usize {
        self.offset + BUCKET_HEADER_SIZE
    }

    /// Allocate and zero-initialize a fresh bucket. Returns its
    /// reference, or `None` on out-of-space.
    pub fn allocate(alloc: &Allocator, span: usize) -> Option<BucketRef> {
        let off = alloc.alloc_data_blk(span)?;
        let b = BucketRef { offset: off };
        unsafe {
            let h = b.header_mut(alloc);
            h.coll_next = 0;
            h.flags = 0;
            std::ptr::write_bytes(&mut h.lock as *mut _ as *mut u8, 0, std::mem::size_of_val(&h.lock));
        }
        Some(b)
    }

    /// Number of fixed-record slots that fit in one MDR bucket block
    /// for the given engine record length.
    #[inline(always)]
    pub fn fixed_slots_per_bucket(rec_len: u32) -> usize {
        ((MDR - BUCKET_HEADER_SIZE) / frec_size(rec_len)).max(1)
    }

    /// Number of fixed records currently packed into this bucket.
    /// Caller must hold at least a read lock.
    ///
    /// # Safety
    /// Same as [`Self::header`].
    pub unsafe fn fixed_count(&self, alloc: &Allocator) -> u32 {
        self.header(alloc).flags
    }

    /// Try to append a fixed record to this bucket's packed slots.
    /// Returns the new record on success, or `None` if the bucket has
    /// no trailing room (caller must then chain a new bucket).
    ///
    /// Acquires and releases this bucket's write lock internally.
    ///
    /// # Safety
    /// `alloc` must have a live bucket of `rec_len`-sized fixed-record
    /// slots at `self.offset`.
    pub unsafe fn try_append_fixed(
        &self,
        alloc: &Allocator,
        rec_len: u32,
        key: u64,
        data: &[u8],
    ) -> Option<RecordRef> {
        self.write_lock(alloc);
        let count = self.fixed_count(alloc) as usize;
        let cap = Self::fixed_slots_per_bucket(rec_len);
        if count >= cap {
            self.write_unlock(alloc);
            return None;
        }
        let rec = RecordRef {
            offset: self.records_start() + count * frec_size(rec_len),
        };
        rec.write_fixed(alloc, key, rec_len, data);
        self.header_mut(alloc).flags = (count + 1) as u32;
        self.write_unlock(alloc);
        Some(rec)
    }

    /// The `i`th packed fixed-record slot in this bucket, by pure
    /// offset arithmetic (no bounds check against the live count —
    /// callers typically already have `i` from `fixed_count`).
    #[inline(always)]
    pub fn nth_fixed(&self, rec_len: u32, i: usize) -> RecordRef {
        RecordRef {
            offset: self.records_start() + i * frec_size(rec_len),
        }
    }

    /// Scan this bucket's packed fixed records for the first live one
    /// matching `key`. Caller must hold at least a read lock.
    ///
    /// # Safety
    /// Same requirements as [`Self::try_append_fixed`].
    pub unsafe fn scan_fixed(&self, alloc: &Allocator, rec_len: u32, key: u64) -> Option<RecordRef> {
        let count = self.fixed_count(alloc) as usize;
        for i in 0..count {
            let rec = RecordRef {
                offset: self.records_start() + i * frec_size(rec_len),
            };
            if rec.is_live_fixed(alloc, rec_len) && rec.key(alloc) == key {
                return Some(rec);
            }
        }
        None
    }

    /// Continue a fixed-record scan from the slot after `from`, within
    /// this same bucket only (chain continuation is the caller's job).
    ///
    /// # Safety
    /// Same requirements as [`Self::try_append_fixed`].
    pub unsafe fn scan_fixed_after(
        &self,
        alloc: &Allocator,
        rec_len: u32,
        key: u64,
        from: RecordRef,
    ) -> Option<RecordRef> {
        let count = self.fixed_count(alloc) as usize;
        let start_idx = (from.offset - self.records_start()) / frec_size(rec_len) + 1;
        for i in start_idx..count {
            let rec = RecordRef {
                offset: self.records_start() + i * frec_size(rec_len),
            };
            if rec.is_live_fixed(alloc, rec_len) && rec.key(alloc) == key {
                return Some(rec);
            }
        }
        None
    }

    /// The single variable-record head packed into this bucket (var
    /// buckets hold exactly one logical record, since sizes vary too
    /// widely to pack several).
    #[inline(always)]
    pub fn var_head(&self) -> RecordRef {
        RecordRef {
            offset: self.records_start(),
        }
    }

    /// Minimum allocation span for a var-mode bucket carrying an
    /// initial chunk of `body_len` bytes.
    #[inline(always)]
    pub fn var_span(body_len: usize) -> usize {
        BUCKET_HEADER_SIZE + crate::record::vrec_size(body_len)
    }

    /// Minimum allocation span for a fixed-mode bucket.
    #[inline(always)]
    pub fn fixed_span(rec_len: u32) -> usize {
        layout::align_up(BUCKET_HEADER_SIZE + frec_size(rec_len), MDR)
    }
}
