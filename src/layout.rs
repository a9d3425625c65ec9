//! `#[repr(C)]` structures and offset arithmetic for the on-disk layout.
//!
//! All persistent references into the region are offsets, never pointers,
//! so the region can be remapped to a different address across processes
//! or runs (see the offset/pointer discussion in the crate root).

use std::sync::atomic::AtomicU64;

/// Magic bytes at the start of the header, validated on open/recovery.
pub const MAGIC: u64 = 0x4854_5249_4542_5354; // "HTRIEBST" folded to 8 bytes

/// Fixed portion of the header, in bytes. The extent bitmap follows
/// immediately after this, so that header + bitmap forms one contiguous
/// reserved prefix of the region.
pub const HEADER_SIZE: usize = 64;

/// Index nodes are cache-line sized: 16 slots of 4 bytes each.
pub const CACHE_LINE: usize = 64;

/// Minimum data record: the unit of data-block addressing. Two cache
/// lines, large enough to hold a bucket header plus a handful of small
/// packed records.
pub const MDR: usize = 128;

/// Page-sized sub-unit of an extent; the unit of the global `nwb` advance.
pub const BLOCK_SIZE: usize = 4096;

/// Size of one extent, the largest allocator unit. Implementation-chosen
/// power of two; 2 MiB keeps the bitmap small while still amortizing the
/// cost of the atomic bump on `nwb`.
pub const EXT_SZ: usize = 2 * 1024 * 1024;

/// Number of 4-bit digits consumed from a 64-bit key.
pub const TRIE_BITS: u32 = 4;
pub const TRIE_FANOUT: usize = 1 << TRIE_BITS;
pub const TRIE_DEPTH: u32 = 64 / TRIE_BITS;

/// Maximum addressable region size: 31 bits of cache-line-granularity
/// index offsets, i.e. 2^31 * 64 bytes.
pub const MAX_REGION_SIZE: u64 = (1u64 << 31) * CACHE_LINE as u64;

/// High bit of a slot / offset word: set for data references, clear for
/// index references.
pub const DBIT: u32 = 1 << 31;
pub const OFFSET_MASK: u32 = DBIT - 1;

/// High bit of a `VRec::len` word: marks a logically freed chunk.
pub const VREC_FREED: u32 = 1 << 31;

#[inline(always)]
pub const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

#[inline(always)]
pub const fn align_up(n: usize, to: usize) -> usize {
    (n + to - 1) & !(to - 1)
}

/// A trie slot: either empty, an index-node offset, or a data (bucket)
/// offset. Tagged by `DBIT` when serialized into a raw `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Empty,
    Index(u32),
    Data(u32),
}

impl Slot {
    #[inline(always)]
    pub fn decode(raw: u32) -> Slot {
        if raw == 0 {
            Slot::Empty
        } else if raw & DBIT != 0 {
            Slot::Data(raw & OFFSET_MASK)
        } else {
            Slot::Index(raw & OFFSET_MASK)
        }
    }

    #[inline(always)]
    pub fn encode(self) -> u32 {
        match self {
            Slot::Empty => 0,
            Slot::Index(i) => i & OFFSET_MASK,
            Slot::Data(d) => (d & OFFSET_MASK) | DBIT,
        }
    }

    /// Byte offset of an index-tagged slot: cache-line granularity.
    #[inline(always)]
    pub fn index_byte_offset(idx: u32) -> usize {
        idx as usize * CACHE_LINE
    }

    /// Byte offset of a data-tagged slot: MDR granularity.
    #[inline(always)]
    pub fn data_byte_offset(idx: u32) -> usize {
        idx as usize * MDR
    }

    #[inline(always)]
    pub fn from_index_offset(byte_off: usize) -> Slot {
        debug_assert_eq!(byte_off % CACHE_LINE, 0);
        Slot::Index((byte_off / CACHE_LINE) as u32)
    }

    #[inline(always)]
    pub fn from_data_offset(byte_off: usize) -> Slot {
        debug_assert_eq!(byte_off % MDR, 0);
        Slot::Data((byte_off / MDR) as u32)
    }
}

/// Header lives at offset 0 of the region.
///
/// Fields ordered largest-first to avoid implicit alignment padding in
/// `#[repr(C)]`. The extent-occupancy bitmap is *not* part of this
/// struct — it follows immediately in the region and is addressed
/// separately (see [`ext_bmp_words`]), since its length depends on the
/// region size chosen at `init` time.
#[repr(C)]
pub struct Header {
    pub magic: u64,
    pub dbsz: u64,
    pub nwb: AtomicU64,
    /// Runtime-only; per-CPU cursors live in-process (see `percpu`), not
    /// in the mapped region, because they are forfeit on every restart
    /// anyway. Kept (and zeroed) here purely to preserve the on-disk
    /// header shape described by the spec.
    pub pcpu_ptr: u64,
    pub rec_len: u32,
    pub _reserved: [u8; 28],
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

/// Number of `u64` words needed for the extent bitmap of a region of
/// `dbsz` bytes.
#[inline(always)]
pub fn ext_bmp_words(dbsz: u64) -> usize {
    let extents = dbsz.div_ceil(EXT_SZ as u64) as usize;
    extents.div_ceil(64)
}

/// Byte offset of the extent bitmap from the start of the region.
#[inline(always)]
pub fn ext_bmp_offset() -> usize {
    HEADER_SIZE
}

/// Byte offset of the root trie node: the first cache-line boundary
/// after the header and its trailing extent bitmap.
#[inline(always)]
pub fn root_offset(dbsz: u64) -> usize {
    align_up(HEADER_SIZE + ext_bmp_words(dbsz) * 8, CACHE_LINE)
}

/// Header for a bucket: a collision-chain element. `lock` guards the
/// records packed after this header; see `lock::BucketLock`.
#[repr(C)]
pub struct BucketHeader {
    pub coll_next: u32,
    pub flags: u32,
    pub lock: crate::lock::BucketLock,
}

pub const BUCKET_HEADER_SIZE: usize = std::mem::size_of::<BucketHeader>();

/// Fixed record: `{key, data[rec_len]}`. Only the `key` field has a
/// fixed offset; `data` is accessed via raw pointer arithmetic since its
/// length is a per-engine constant, not part of the type.
#[repr(C)]
pub struct FRecHeader {
    pub key: u64,
}

pub const FREC_HEADER_SIZE: usize = std::mem::size_of::<FRecHeader>();

/// Variable record chunk: `{key, chunk_next, len}` followed by `len &
/// !VREC_FREED` bytes of data. `chunk_next` links to the next chunk of
/// the same logical record, or 0 if this is the tail.
#[repr(C)]
pub struct VRecHeader {
    pub key: u64,
    pub chunk_next: u32,
    pub len: u32,
}

pub const VREC_HEADER_SIZE: usize = std::mem::size_of::<VRecHeader>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_roundtrip() {
        assert_eq!(Slot::decode(Slot::Empty.encode()), Slot::Empty);
        assert_eq!(Slot::decode(Slot::Index(12345).encode()), Slot::Index(12345));
        assert_eq!(Slot::decode(Slot::Data(98765).encode()), Slot::Data(98765));
    }

    #[test]
    fn header_is_64_bytes() {
        assert_eq!(std::mem::size_of::<Header>(), 64);
    }

    #[test]
    fn root_offset_is_cache_line_aligned() {
        let off = root_offset(16 * 1024 * 1024);
        assert_eq!(off % CACHE_LINE, 0);
        assert!(off >= HEADER_SIZE);
    }
}
