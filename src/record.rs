//! Record encoders: fixed and variable record framing, liveness, and
//! chunk-chain extension.
//!
//! Two formats co-exist in the same engine instance but only one is
//! used per instance, selected at `init` by whether `rec_len` is zero.
use crate::alloc::Allocator;
use crate::layout::{self, FRecHeader, VRecHeader, FREC_HEADER_SIZE, VREC_HEADER_SIZE, VREC_FREED};

/// On-disk size of a fixed record with body length `rec_len`, 8-byte
/// aligned.
#[inline(always)]
pub fn frec_size(rec_len: u32) -> usize {
    layout::align8(FREC_HEADER_SIZE + rec_len as usize)
}

/// On-disk size of one variable-record chunk carrying `body_len` bytes
/// of payload, 8-byte aligned.
#[inline(always)]
pub fn vrec_size(body_len: usize) -> usize {
    layout::align8(VREC_HEADER_SIZE + body_len)
}

/// A record view over raw bytes at a known offset. Doesn't own the
/// memory; all accessors take the allocator's base pointer.
#[derive(Clone, Copy)]
pub struct RecordRef {
    pub offset: usize,
}

impl RecordRef {
    /// # Safety
    /// `alloc` must have storage for a fixed record of `rec_len` at
    /// `self.offset`.
    pub unsafe fn key(&self, alloc: &Allocator) -> u64 {
        (*(alloc.ptr(self.offset) as *const FRecHeader)).key
    }

    /// True iff any 8-byte word of the fixed record is nonzero.
    ///
    /// This is the liveness predicate the original engine uses: a
    /// deliberate limitation, not an oversight — the all-zero record is
    /// unrepresentable, exactly as documented in the spec (the
    /// original's own comment calls this out as a known limitation, not
    /// a bug to silently "fix").
    ///
    /// # Safety
    /// `alloc` must have `frec_size(rec_len)` live bytes at `self.offset`.
    pub unsafe fn is_live_fixed(&self, alloc: &Allocator, rec_len: u32) -> bool {
        let words = frec_size(rec_len) / 8;
        let base = alloc.ptr(self.offset) as *const u64;
        for i in 0..words {
            if *base.add(i) != 0 {
                return true;
            }
        }
        false
    }

    /// # Safety
    /// `alloc` must have a fixed record of `rec_len` at `self.offset`,
    /// and `data.len()` must be `<= rec_len`.
    pub unsafe fn write_fixed(&self, alloc: &Allocator, key: u64, rec_len: u32, data: &[u8]) {
        let ptr = alloc.ptr(self.offset);
        (*(ptr as *mut FRecHeader)).key = key;
        let body = ptr.add(FREC_HEADER_SIZE);
        // Zero the body first so any tail past `data` doesn't read as
        // live garbage, and so a data-less record of value 0 stays
        // correctly "not live" rather than whatever was in the block
        // before.
        std::ptr::write_bytes(body, 0, rec_len as usize);
        std::ptr::copy_nonoverlapping(data.as_ptr(), body, data.len());
    }

    /// # Safety
    /// `alloc` must have a fixed record of `rec_len` at `self.offset`.
    pub unsafe fn read_fixed<'a>(&self, alloc: &'a Allocator, rec_len: u32) -> &'a [u8] {
        let body = alloc.ptr(self.offset).add(FREC_HEADER_SIZE);
        std::slice::from_raw_parts(body, rec_len as usize)
    }

    /// # Safety
    /// `alloc` must have a `VRecHeader` at `self.offset`.
    pub unsafe fn vrec_header(&self, alloc: &Allocator) -> &VRecHeader {
        &*(alloc.ptr(self.offset) as *const VRecHeader)
    }

    /// # Safety
    /// Same as [`Self::vrec_header`].
    pub unsafe fn vrec_header_mut(&self, alloc: &Allocator) -> &mut VRecHeader {
        &mut *(alloc.ptr(self.offset) as *mut VRecHeader)
    }

    /// `len != 0 && !FREED`.
    ///
    /// # Safety
    /// Same as [`Self::vrec_header`].
    pub unsafe fn is_live_var(&self, alloc: &Allocator) -> bool {
        let h = self.vrec_header(alloc);
        h.len != 0 && h.len & VREC_FREED == 0
    }

    /// # Safety
    /// `alloc` must have `vrec_size(data.len())` live bytes at
    /// `self.offset`.
    pub unsafe fn write_var(&self, alloc: &Allocator, key: u64, data: &[u8]) {
        let ptr = alloc.ptr(self.offset);
        let h = &mut *(ptr as *mut VRecHeader);
        h.key = key;
        h.chunk_next = 0;
        h.len = data.len() as u32;
        let body = ptr.add(VREC_HEADER_SIZE);
        std::ptr::copy_nonoverlapping(data.as_ptr(), body, data.len());
    }

    /// # Safety
    /// `alloc` must have a live `VRecHeader` at `self.offset` whose
    /// body is `vrec_size(body_len)` bytes.
    pub unsafe fn read_var<'a>(&self, alloc: &'a Allocator) -> &'a [u8] {
        let h = self.vrec_header(alloc);
        let len = (h.len & !VREC_FREED) as usize;
        let body = alloc.ptr(self.offset).add(VREC_HEADER_SIZE);
        std::slice::from_raw_parts(body, len)
    }

    /// Follow the chunk chain to its tail.
    ///
    /// # Safety
    /// `self` must be a valid chunk of a variable record; the whole
    /// chain must be reachable and well-formed.
    pub unsafe fn chunk_tail(&self, alloc: &Allocator) -> RecordRef {
        let mut cur = *self;
        loop {
            let next = cur.vrec_header(alloc).chunk_next;
            if next == 0 {
                return cur;
            }
            cur = RecordRef {
                offset: layout::Slot::data_byte_offset(next),
            };
        }
    }

    /// Append `extra` bytes as a new chunk linked after the current
    /// tail of this record's chain. Returns the new chunk, or `None` on
    /// out-of-space. The existing chain is left unchanged on failure.
    ///
    /// # Safety
    /// `self` must be a live chunk reachable from an engine-managed
    /// variable record; `extra` must not exceed what one chunk can
    /// carry given the allocator's block size.
    pub unsafe fn extend(&self, alloc: &Allocator, extra: &[u8]) -> Option<RecordRef> {
        let tail = self.chunk_tail(alloc);
        let new_off = alloc.alloc_data_blk(vrec_size(extra.len()))?;
        let new_chunk = RecordRef { offset: new_off };
        // The new chunk carries no key of its own (only the first chunk's
        // key is meaningful); zero it defensively.
        new_chunk.write_var(alloc, 0, extra);
        tail.vrec_header_mut(alloc).chunk_next = (new_off / layout::MDR) as u32;
        Some(new_chunk)
    }

    /// Mark a variable record chunk as logically freed. Set-only: never
    /// re-livened in place.
    ///
    /// # Safety
    /// `alloc` must have a `VRecHeader` at `self.offset`.
    pub unsafe fn mark_freed(&self, alloc: &Allocator) {
        let h = self.vrec_header_mut(alloc);
        h.len |= VREC_FREED;
    }
}
