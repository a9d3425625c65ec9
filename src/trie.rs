//! The lock-free trie spine: cache-line-sized index nodes addressed by
//! successive 4-bit digits of a key's hash, with publish-after-initialize
//! slot updates so a concurrent reader never observes a partially built
//! node.
use std::sync::atomic::{AtomicU32, Ordering};

use crate::alloc::Allocator;
use crate::layout::{CACHE_LINE, Slot, TRIE_BITS, TRIE_DEPTH, TRIE_FANOUT};

/// One index node: 16 tagged offset slots, one cache line.
#[repr(C, align(64))]
pub struct TrieNode {
    slots: [AtomicU32; TRIE_FANOUT],
}

const _: () = assert!(std::mem::size_of::<TrieNode>() == CACHE_LINE);

impl TrieNode {
    /// # Safety
    /// `alloc` must have a live `TrieNode` at `offset`.
    unsafe fn at<'a>(alloc: &'a Allocator, offset: usize) -> &'a TrieNode {
        &*(alloc.ptr(offset) as *const TrieNode)
    }

    /// Acquire-load one slot, decoded.
    ///
    /// # Safety
    /// `self` must be a live node within `alloc`'s region.
    unsafe fn load(&self, digit: usize) -> Slot {
        Slot::decode(self.slots[digit].load(Ordering::Acquire))
    }

    /// Publish a value into a slot expected to still be empty. This is
    /// the "initialize then release" half of publish-after-initialize:
    /// whatever the slot now points to (a freshly built bucket or index
    /// node) must be fully written by the caller *before* this call, so
    /// that a concurrent reader who acquire-loads the published value
    /// sees a consistent target.
    ///
    /// # Safety
    /// Same as [`Self::load`]; the value being published must already be
    /// fully initialized and reachable.
    unsafe fn try_publish_empty(&self, digit: usize, value: Slot) -> bool {
        self.slots[digit]
            .compare_exchange(0, value.encode(), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// CAS a slot from an expected current value to a new one. Used by
    /// burst to swap a bucket reference for a freshly built index node.
    ///
    /// # Safety
    /// Same as [`Self::load`], plus the same publish-before-CAS
    /// requirement as [`Self::try_publish_empty`].
    unsafe fn cas(&self, digit: usize, expected: Slot, new: Slot) -> bool {
        self.slots[digit]
            .compare_exchange(expected.encode(), new.encode(), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

/// The 4-bit digit consumed at trie `depth` (0-based) from a 64-bit hash.
#[inline(always)]
pub fn digit_at(hash: u64, depth: u32) -> usize {
    ((hash >> (depth * TRIE_BITS)) & (TRIE_FANOUT as u64 - 1)) as usize
}

/// Where a descent came to rest: the node holding the terminal slot, the
/// digit it was reached by, the depth at which that node sits, and the
/// slot's current (already-decoded) contents.
#[derive(Clone, Copy)]
pub struct DescendResult {
    pub node_offset: usize,
    pub digit: usize,
    pub depth: u32,
    pub slot: Slot,
}

impl DescendResult {
    /// True when the trie has consumed all 64 bits of hash at this
    /// point — a burst here is impossible; a collision must instead
    /// extend the existing bucket's chain.
    #[inline(always)]
    pub fn depth_exhausted(&self) -> bool {
        self.depth + 1 >= TRIE_DEPTH
    }
}

/// Walk the spine from `root_offset` following `hash`'s digits until
/// reaching a slot that is not an interior index reference (i.e. `Data`
/// or `Empty`), or until depth is exhausted.
///
/// # Safety
/// `alloc` must have a live, fully linked trie rooted at `root_offset`.
pub unsafe fn descend(alloc: &Allocator, root_offset: usize, hash: u64) -> DescendResult {
    let mut node_offset = root_offset;
    let mut depth = 0u32;
    loop {
        let node = TrieNode::at(alloc, node_offset);
        let digit = digit_at(hash, depth);
        let slot = node.load(digit);
        match slot {
            Slot::Index(idx) if depth + 1 < TRIE_DEPTH => {
                node_offset = Slot::index_byte_offset(idx);
                depth += 1;
            }
            _ => {
                return DescendResult {
                    node_offset,
                    digit,
                    depth,
                    slot,
                }
            }
        }
    }
}

/// Allocate and zero-initialize a fresh index node (all slots empty).
///
/// # Safety
/// `alloc` must be the allocator owning the region this node will live
/// in.
pub unsafe fn allocate_node(alloc: &Allocator) -> Option<usize> {
    let off = alloc.alloc_index_blk()?;
    let node = TrieNode::at(alloc, off);
    for slot in &node.slots {
        slot.store(0, Ordering::Relaxed);
    }
    Some(off)
}

/// Zero-initialize the root node in place (used once at region `init`).
///
/// # Safety
/// `alloc` must have room for a `TrieNode` at `root_offset` and no
/// concurrent readers yet (this runs before the engine is published).
pub unsafe fn init_root(alloc: &Allocator, root_offset: usize) {
    let node = TrieNode::at(alloc, root_offset);
    for slot in &node.slots {
        slot.store(0, Ordering::Relaxed);
    }
}

/// Write `value` into `digit` of the node at `node_offset` with no CAS
/// and no ordering guarantee beyond a plain store. Valid only while
/// building a node during burst redistribution, before the node is
/// reachable from any other thread: the eventual [`install_burst_node`]
/// CAS's release ordering publishes this write along with the rest of
/// the node to any reader that later acquire-loads the parent slot.
///
/// # Safety
/// `node_offset` must be a freshly allocated node not yet reachable
/// from the trie.
pub unsafe fn set_slot_unpublished(alloc: &Allocator, node_offset: usize, digit: usize, value: Slot) {
    let node = TrieNode::at(alloc, node_offset);
    node.slots[digit].store(value.encode(), Ordering::Relaxed);
}

/// Publish a freshly built bucket into an empty slot found by
/// [`descend`]. Fails (returns `false`) if another thread raced ahead
/// and published first; the caller should re-descend and retry.
///
/// # Safety
/// `bucket_offset` must point at a fully initialized, reachable bucket.
pub unsafe fn publish_bucket(alloc: &Allocator, at: &DescendResult, bucket_offset: usize) -> bool {
    debug_assert!(matches!(at.slot, Slot::Empty));
    let node = TrieNode::at(alloc, at.node_offset);
    node.try_publish_empty(at.digit, Slot::from_data_offset(bucket_offset))
}

/// Swap a bucket slot for a newly built index node, completing a burst.
/// Fails if the slot no longer holds the expected bucket (raced with
/// another burst or insert); the caller must re-descend and retry.
///
/// # Safety
/// `new_node_offset` must point at a fully redistributed, reachable
/// index node before this call.
pub unsafe fn install_burst_node(alloc: &Allocator, at: &DescendResult, new_node_offset: usize) -> bool {
    let node = TrieNode::at(alloc, at.node_offset);
    node.cas(
        at.digit,
        at.slot,
        Slot::Index((new_node_offset / CACHE_LINE) as u32),
    )
}
