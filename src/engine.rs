//! Public operations: `init`, `insert`, `lookup`, `bscan_for_rec`,
//! `next_rec`, `extend_rec`, `close` (`exit`), assembled from the
//! allocator, trie, bucket and record layers. This is the glue a
//! caller actually links against; the other modules are collaborators
//! it composes, not independent entry points.
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::alloc::Allocator;
use crate::bucket::BucketRef;
use crate::error::EngineError;
use crate::hash::{CrcHasher, KeyHasher};
use crate::layout::{self, Header, Slot, BUCKET_HEADER_SIZE, CACHE_LINE, MAX_REGION_SIZE, MDR, TRIE_FANOUT};
use crate::record::{frec_size, RecordRef};
use crate::region::{ByteRegion, MappedRegion};
use crate::trie::{self, DescendResult};

/// Constructor parameters bundled into one struct. Not a config file or
/// CLI layer (none is specified) — just named arguments for the two
/// constructors below.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Total region size in bytes. Must be a multiple of the extent
    /// size and no larger than 128 GiB.
    pub region_size: u64,
    /// Fixed record body length, or `0` for variable-length records.
    pub rec_len: u32,
}

/// A burst hash-trie key/value store over a caller-supplied byte
/// region. Lookups and the trie spine are lock-free; individual
/// collision buckets are guarded by their own embedded reader/writer
/// lock (see [`crate::lock::BucketLock`]).
pub struct Engine {
    region: Box<dyn ByteRegion>,
    alloc: Allocator,
    hasher: Box<dyn KeyHasher + Send + Sync>,
    root_offset: usize,
    rec_len: u32,
    dbsz: u64,
}

/// A bucket reached by [`Engine::lookup`]: the entry point into a
/// collision chain, not yet scanned for any particular key.
#[derive(Clone, Copy)]
pub struct BucketHandle {
    bucket: BucketRef,
}

impl Engine {
    /// `init`: validate `region`/`rec_len` and either recover an
    /// existing region (magic matches) or zero-initialize a fresh one,
    /// creating the root trie node.
    pub fn init(region: Box<dyn ByteRegion>, rec_len: u32) -> Result<Engine, EngineError> {
        let dbsz = region.len() as u64;
        if dbsz == 0 {
            return Err(EngineError::BadArgument("region size is zero"));
        }
        if dbsz < layout::HEADER_SIZE as u64 {
            return Err(EngineError::BadArgument("region smaller than the header"));
        }
        if dbsz % layout::EXT_SZ as u64 != 0 {
            return Err(EngineError::BadArgument("region size must be a multiple of the extent size"));
        }
        if dbsz > MAX_REGION_SIZE {
            return Err(EngineError::BadArgument("region exceeds the maximum addressable size (128 GiB)"));
        }
        if rec_len != 0 && frec_size(rec_len) > MDR - BUCKET_HEADER_SIZE {
            // Open question (a): the header's rec_len field is 32 bits
            // wide but a fixed record still has to fit a bucket built
            // from a single MDR block alongside its header.
            return Err(EngineError::BadArgument("rec_len exceeds a bucket's record capacity"));
        }

        let base_ptr = region.base_ptr();
        let header_ptr = base_ptr as *mut Header;
        let ext_bmp_words = layout::ext_bmp_words(dbsz);

        let fresh = unsafe { (*header_ptr).magic } != layout::MAGIC;

        if fresh {
            log::debug!("htrie: initializing fresh region ({dbsz} bytes, rec_len={rec_len})");
            unsafe {
                std::ptr::write_bytes(base_ptr, 0, layout::HEADER_SIZE + ext_bmp_words * 8);
                let hdr = &mut *header_ptr;
                hdr.magic = layout::MAGIC;
                hdr.dbsz = dbsz;
                hdr.nwb = AtomicU64::new(layout::align_up(
                    layout::root_offset(dbsz) + CACHE_LINE,
                    layout::BLOCK_SIZE,
                ) as u64);
                hdr.pcpu_ptr = 0;
                hdr.rec_len = rec_len;
            }
        } else {
            log::debug!("htrie: recovering existing region");
            let stored_dbsz = unsafe { (*header_ptr).dbsz };
            let stored_rec_len = unsafe { (*header_ptr).rec_len };
            if stored_dbsz != dbsz {
                return Err(EngineError::CorruptHeader);
            }
            if stored_rec_len != rec_len {
                return Err(EngineError::BadArgument("rec_len does not match the region's recorded value"));
            }
            // Per-CPU cursors are forfeit across restarts (see
            // `percpu`); nwb, the extent bitmap and the trie itself are
            // already valid and are left untouched.
        }

        let nwb_ptr: *const AtomicU64 = unsafe { &(*header_ptr).nwb };
        let ext_bmp_ptr = unsafe { base_ptr.add(layout::ext_bmp_offset()) } as *const AtomicU64;
        let alloc = unsafe { Allocator::new(base_ptr, dbsz, nwb_ptr, ext_bmp_ptr, ext_bmp_words) };

        let root_offset = layout::root_offset(dbsz);
        if fresh {
            unsafe { trie::init_root(&alloc, root_offset) };
            alloc.reserve_extent_for(0);
        }

        Ok(Engine {
            region,
            alloc,
            hasher: Box::new(CrcHasher),
            root_offset,
            rec_len,
            dbsz,
        })
    }

    /// Create (or reopen, if it already exists and carries a valid
    /// header) a file-backed engine at `path`.
    pub fn create_or_open_mapped<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Engine, EngineError> {
        let region = MappedRegion::create_or_open(path, config.region_size)?;
        Engine::init(Box::new(region), config.rec_len)
    }

    /// Create an anonymous, not-file-backed engine. Useful for tests
    /// and for embedders with no durability requirement.
    pub fn anonymous(config: EngineConfig) -> Result<Engine, EngineError> {
        let region = MappedRegion::anonymous(config.region_size)?;
        Engine::init(Box::new(region), config.rec_len)
    }

    pub fn region_size(&self) -> u64 {
        self.dbsz
    }

    pub fn rec_len(&self) -> u32 {
        self.rec_len
    }

    /// Install a non-default key hasher. Must be called before any
    /// `insert`/`lookup`, since buckets already placed under one
    /// hasher won't be findable under another.
    pub fn set_hasher(&mut self, hasher: impl KeyHasher + Send + Sync + 'static) {
        self.hasher = Box::new(hasher);
    }

    /// Hash `key` the way the engine hashes keys for trie traversal.
    /// A free function taking `&impl KeyHasher` can't be handed a
    /// `&dyn KeyHasher` (trait objects aren't `Sized`), so this goes
    /// straight through dynamic dispatch instead of `hash::hash_key`.
    #[inline(always)]
    fn hash_key(&self, key: u64) -> u64 {
        self.hasher.hash(&key.to_ne_bytes())
    }

    /// `insert`: traverse the trie for `key`'s hash; append to an
    /// existing bucket, chain a new one, or burst the slot, as
    /// necessary. At most `rec_len` bytes of `data` are stored for
    /// fixed-length engines (the rest is silently dropped, matching the
    /// spec's "writes at most `*len` bytes" contract); variable-length
    /// engines store all of `data` in the record's first chunk. Returns
    /// the number of bytes actually stored.
    pub fn insert(&self, key: u64, data: &[u8]) -> Result<usize, EngineError> {
        let hash = self.hash_key(key);
        let body: &[u8] = if self.rec_len != 0 {
            &data[..data.len().min(self.rec_len as usize)]
        } else {
            data
        };

        loop {
            let at = unsafe { trie::descend(&self.alloc, self.root_offset, hash) };
            match at.slot {
                Slot::Empty => {
                    let bucket = self.new_bucket_with_record(key, body)?;
                    if unsafe { trie::publish_bucket(&self.alloc, &at, bucket.offset) } {
                        return Ok(body.len());
                    }
                    // Another writer published into this slot first; re-descend and retry.
                }
                Slot::Data(d) => {
                    let head = BucketRef::from_slot_offset(d);
                    let (tail, inserted) = self.try_insert_in_chain(head, key, body);
                    if inserted {
                        return Ok(body.len());
                    }
                    if at.depth_exhausted() {
                        self.link_new_bucket(tail, key, body)?;
                        return Ok(body.len());
                    }
                    log::debug!("htrie: bursting slot at depth {} (digit {})", at.depth, at.digit);
                    self.burst(&at)?;
                    // Whether this thread's burst won the publish race
                    // or another's did, the key still needs placing:
                    // re-descend and retry from the top of the loop.
                }
                Slot::Index(_) => {
                    unreachable!("descend only returns an Index slot when depth is exhausted, and bursting never installs an Index child at the terminal depth")
                }
            }
        }
    }

    fn new_bucket_with_record(&self, key: u64, body: &[u8]) -> Result<BucketRef, EngineError> {
        if self.rec_len != 0 {
            let b = BucketRef::allocate(&self.alloc, BucketRef::fixed_span(self.rec_len)).ok_or_else(|| {
                log::warn!("htrie: out of space allocating a bucket");
                EngineError::OutOfSpace
            })?;
            unsafe { b.try_append_fixed(&self.alloc, self.rec_len, key, body) }
                .expect("a freshly allocated bucket always has room for its first record");
            Ok(b)
        } else {
            let b = BucketRef::allocate(&self.alloc, BucketRef::var_span(body.len())).ok_or_else(|| {
                log::warn!("htrie: out of space allocating a bucket");
                EngineError::OutOfSpace
            })?;
            unsafe { b.var_head().write_var(&self.alloc, key, body) };
            Ok(b)
        }
    }

    /// Try to append into any bucket along the chain starting at
    /// `bucket`. Returns the chain's tail and whether the append
    /// succeeded in place.
    fn try_insert_in_chain(&self, mut bucket: BucketRef, key: u64, body: &[u8]) -> (BucketRef, bool) {
        loop {
            if self.rec_len != 0 && unsafe { bucket.try_append_fixed(&self.alloc, self.rec_len, key, body) }.is_some()
            {
                return (bucket, true);
            }
            match unsafe { bucket.next(&self.alloc) } {
                Some(next) => bucket = next,
                // Variable-record buckets always hold exactly one
                // logical record, so they fall straight through to here.
                None => return (bucket, false),
            }
        }
    }

    /// Allocate a new bucket carrying `(key, body)` and link it after
    /// the true tail of the chain starting at `tail` (re-walking under
    /// lock if another writer extended the chain concurrently).
    fn link_new_bucket(&self, mut tail: BucketRef, key: u64, body: &[u8]) -> Result<(), EngineError> {
        let new_bucket = self.new_bucket_with_record(key, body)?;
        loop {
            unsafe { tail.write_lock(&self.alloc) };
            let existing_next = unsafe { tail.next(&self.alloc) };
            match existing_next {
                None => {
                    unsafe { tail.link_next(&self.alloc, new_bucket) };
                    unsafe { tail.write_unlock(&self.alloc) };
                    return Ok(());
                }
                Some(next) => {
                    unsafe { tail.write_unlock(&self.alloc) };
                    tail = next;
                }
            }
        }
    }

    /// Redistribute every live record reachable through the collision
    /// chain at `at` into a freshly built index node, one depth deeper,
    /// then publish it into the parent slot by CAS.
    ///
    /// Every bucket currently in the old chain is write-locked before
    /// gathering and stays locked through redistribution and the
    /// publishing CAS. Releasing each bucket's lock as soon as it was
    /// scanned (a plain read-then-unlock walk) leaves a window between
    /// the last unlock and the CAS in which a concurrent `insert` can
    /// take a bucket's write lock and append a record that never makes
    /// it into the redistribution, then becomes unreachable the moment
    /// the CAS swings the slot to the new node — silently losing the
    /// record. Holding every chain bucket's write lock for the whole
    /// operation blocks any such append until after this burst
    /// completes, per the locking order in §4.3 (forward along
    /// `coll_next`).
    fn burst(&self, at: &DescendResult) -> Result<(), EngineError> {
        let head = match at.slot {
            Slot::Data(d) => BucketRef::from_slot_offset(d),
            _ => unreachable!("burst is only invoked on a Data slot"),
        };
        let chain = self.lock_chain_exclusive(head);
        let old_records = self.gather_locked_chain(&chain);
        let new_depth = at.depth + 1;

        let new_node = match unsafe { trie::allocate_node(&self.alloc) } {
            Some(n) => n,
            None => {
                self.unlock_chain_exclusive(&chain);
                return Err(EngineError::OutOfSpace);
            }
        };

        let mut tails: Vec<Option<BucketRef>> = vec![None; TRIE_FANOUT];
        for (rec_key, rec_body) in &old_records {
            let h = self.hash_key(*rec_key);
            let digit = trie::digit_at(h, new_depth);
            match tails[digit] {
                None => {
                    let b = match self.new_bucket_with_record(*rec_key, rec_body) {
                        Ok(b) => b,
                        Err(e) => {
                            self.unlock_chain_exclusive(&chain);
                            return Err(e);
                        }
                    };
                    unsafe { trie::set_slot_unpublished(&self.alloc, new_node, digit, Slot::from_data_offset(b.offset)) };
                    tails[digit] = Some(b);
                }
                Some(digit_tail) => {
                    let appended = self.rec_len != 0
                        && unsafe { digit_tail.try_append_fixed(&self.alloc, self.rec_len, *rec_key, rec_body) }
                            .is_some();
                    if !appended {
                        let b = match self.new_bucket_with_record(*rec_key, rec_body) {
                            Ok(b) => b,
                            Err(e) => {
                                self.unlock_chain_exclusive(&chain);
                                return Err(e);
                            }
                        };
                        unsafe {
                            digit_tail.write_lock(&self.alloc);
                            digit_tail.link_next(&self.alloc, b);
                            digit_tail.write_unlock(&self.alloc);
                        }
                        tails[digit] = Some(b);
                    }
                }
            }
        }

        // The old bucket chain is left exactly as-is: unreachable from
        // the trie once this CAS succeeds, but safe for any reader
        // still mid-scan to finish using (see §4.5).
        let installed = unsafe { trie::install_burst_node(&self.alloc, at, new_node) };
        self.unlock_chain_exclusive(&chain);
        if installed {
            log::debug!("htrie: burst installed at depth {}", at.depth);
        } else {
            log::debug!("htrie: lost the burst race at depth {}; another writer split this slot first", at.depth);
        }
        Ok(())
    }

    /// Write-lock every bucket in the chain starting at `head`, forward
    /// along `coll_next`, and return them in that order. Each bucket's
    /// `coll_next` is only read once this thread holds its write lock,
    /// so a concurrent `link_new_bucket` extending the same chain blocks
    /// until this walk (and the burst it belongs to) is done.
    fn lock_chain_exclusive(&self, head: BucketRef) -> Vec<BucketRef> {
        let mut chain = Vec::new();
        let mut cur = head;
        loop {
            unsafe { cur.write_lock(&self.alloc) };
            chain.push(cur);
            match unsafe { cur.next(&self.alloc) } {
                Some(next) => cur = next,
                None => break,
            }
        }
        chain
    }

    fn unlock_chain_exclusive(&self, chain: &[BucketRef]) {
        for bucket in chain {
            unsafe { bucket.write_unlock(&self.alloc) };
        }
    }

    /// Collect every live record across an already write-locked chain
    /// (see [`Self::lock_chain_exclusive`]).
    fn gather_locked_chain(&self, chain: &[BucketRef]) -> Vec<(u64, Vec<u8>)> {
        let mut out = Vec::new();
        for bucket in chain {
            unsafe {
                if self.rec_len != 0 {
                    let count = bucket.fixed_count(&self.alloc) as usize;
                    for i in 0..count {
                        let rec = bucket.nth_fixed(self.rec_len, i);
                        if rec.is_live_fixed(&self.alloc, self.rec_len) {
                            out.push((rec.key(&self.alloc), rec.read_fixed(&self.alloc, self.rec_len).to_vec()));
                        }
                    }
                } else {
                    let rec = bucket.var_head();
                    if rec.is_live_var(&self.alloc) {
                        out.push((rec.vrec_header(&self.alloc).key, rec.read_var(&self.alloc).to_vec()));
                    }
                }
            }
        }
        out
    }

    /// `lookup`: pure read traversal. Returns the bucket the key's hash
    /// resolves to, if any — not yet scanned for a matching key, since
    /// several keys may share a collision chain. `None` if the hash's
    /// path ends in an empty slot.
    pub fn lookup(&self, key: u64) -> Option<BucketHandle> {
        let hash = self.hash_key(key);
        let at = unsafe { trie::descend(&self.alloc, self.root_offset, hash) };
        match at.slot {
            Slot::Data(d) => Some(BucketHandle {
                bucket: BucketRef::from_slot_offset(d),
            }),
            _ => None,
        }
    }

    /// `bscan_for_rec`: the first live record in `handle`'s collision
    /// chain whose key equals `key`. On a hit, returns a [`RecordCursor`]
    /// holding that bucket's read lock; advance it with
    /// [`RecordCursor::advance`] (`next_rec`) or drop it to release the
    /// lock. On a miss, the whole chain has already been scanned and no
    /// lock is held.
    pub fn bscan_for_rec(&self, handle: &BucketHandle, key: u64) -> Option<RecordCursor<'_>> {
        let mut bucket = handle.bucket;
        unsafe { bucket.read_lock(&self.alloc) };
        loop {
            if let Some(rec) = self.scan_one_bucket(bucket, key) {
                return Some(RecordCursor {
                    engine: self,
                    bucket,
                    rec,
                });
            }
            match unsafe { bucket.next(&self.alloc) } {
                Some(next) => {
                    unsafe { next.read_lock(&self.alloc) };
                    unsafe { bucket.read_unlock(&self.alloc) };
                    bucket = next;
                }
                None => {
                    unsafe { bucket.read_unlock(&self.alloc) };
                    return None;
                }
            }
        }
    }

    fn scan_one_bucket(&self, bucket: BucketRef, key: u64) -> Option<RecordRef> {
        if self.rec_len != 0 {
            unsafe { bucket.scan_fixed(&self.alloc, self.rec_len, key) }
        } else {
            let rec = bucket.var_head();
            let matches = unsafe { rec.is_live_var(&self.alloc) && rec.vrec_header(&self.alloc).key == key };
            matches.then_some(rec)
        }
    }

    /// `extend_rec`: allocate and link a new chunk carrying `extra`
    /// bytes onto the tail of `cursor`'s record's chunk chain. Only
    /// valid for variable-length engines.
    pub fn extend_rec(&self, cursor: &RecordCursor<'_>, extra: &[u8]) -> Result<RecordRef, EngineError> {
        if self.rec_len != 0 {
            return Err(EngineError::BadArgument("extend_rec only applies to variable-length records"));
        }
        unsafe { cursor.rec.extend(&self.alloc, extra) }.ok_or_else(|| {
            log::warn!("htrie: out of space extending a record");
            EngineError::OutOfSpace
        })
    }

    /// `exit`: no persistence work beyond a memory barrier — per-CPU
    /// cursor state lives in-process already (see [`crate::percpu`]) and
    /// is simply dropped with the engine.
    pub fn close(self) {
        std::sync::atomic::fence(Ordering::SeqCst);
        log::debug!("htrie: engine closed");
    }
}

/// A record reached via [`Engine::bscan_for_rec`], holding that
/// record's bucket read lock until advanced past its end or dropped.
///
/// This mirrors the spec's `bscan_for_rec`/`next_rec` pair with the
/// bucket lock's lifetime owned by the cursor rather than managed by
/// hand (see `next_rec`'s described lock hand-off in §4.3): `advance`
/// performs exactly that hand-off, and `Drop` releases whatever lock is
/// currently held if the caller stops scanning early.
pub struct RecordCursor<'e> {
    engine: &'e Engine,
    bucket: BucketRef,
    rec: RecordRef,
}

impl<'e> Drop for RecordCursor<'e> {
    fn drop(&mut self) {
        unsafe { self.bucket.read_unlock(&self.engine.alloc) };
    }
}

impl<'e> RecordCursor<'e> {
    pub fn record(&self) -> RecordRef {
        self.rec
    }

    /// The record's body bytes (fixed: `rec_len` bytes; variable: this
    /// chunk's own `len` bytes — call [`Engine::extend_rec`]'s returned
    /// chunks' `read_var` to walk the rest of the chain).
    pub fn read(&self) -> &[u8] {
        if self.engine.rec_len != 0 {
            unsafe { self.rec.read_fixed(&self.engine.alloc, self.engine.rec_len) }
        } else {
            unsafe { self.rec.read_var(&self.engine.alloc) }
        }
    }

    /// `next_rec`: advance to the next live record after this one
    /// matching `key`, following `coll_next` into further buckets as
    /// needed. Hands the read lock from the old bucket to the new one
    /// before releasing the old, per §4.3's locking order. Returns
    /// `false` when the chain is exhausted; the cursor then holds the
    /// last bucket visited (released on drop).
    pub fn advance(&mut self, key: u64) -> bool {
        if self.engine.rec_len != 0 {
            if let Some(rec) =
                unsafe { self.bucket.scan_fixed_after(&self.engine.alloc, self.engine.rec_len, key, self.rec) }
            {
                self.rec = rec;
                return true;
            }
        }
        loop {
            match unsafe { self.bucket.next(&self.engine.alloc) } {
                Some(next) => {
                    unsafe { next.read_lock(&self.engine.alloc) };
                    unsafe { self.bucket.read_unlock(&self.engine.alloc) };
                    self.bucket = next;
                    if let Some(rec) = self.engine.scan_one_bucket(self.bucket, key) {
                        self.rec = rec;
                        return true;
                    }
                    // Nothing in this bucket; keep following the chain.
                }
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_engine(region_size: u64, rec_len: u32) -> Engine {
        Engine::anonymous(EngineConfig { region_size, rec_len }).unwrap()
    }

    #[test]
    fn insert_then_lookup_single_key() {
        let engine = fixed_engine(16 * 1024 * 1024, 16);
        let key = 0x0123_4567_89AB_CDEFu64;
        engine.insert(key, &[0xAAu8; 16]).unwrap();

        let handle = engine.lookup(key).expect("bucket should exist");
        let cursor = engine.bscan_for_rec(&handle, key).expect("record should be found");
        assert_eq!(cursor.read(), &[0xAAu8; 16]);
    }

    #[test]
    fn lookup_of_unknown_key_is_none_or_empty_scan() {
        let engine = fixed_engine(16 * 1024 * 1024, 16);
        engine.insert(1, &[1u8; 16]).unwrap();
        match engine.lookup(0xDEAD_BEEF) {
            None => {}
            Some(handle) => assert!(engine.bscan_for_rec(&handle, 0xDEAD_BEEF).is_none()),
        }
    }

    #[test]
    fn collision_chain_holds_many_records_sharing_a_prefix() {
        let engine = fixed_engine(32 * 1024 * 1024, 8);
        // Share the low 60 bits so every key collides at full depth.
        let keys: Vec<u64> = (0..300u64).map(|i| (i << 4) | 0x5).collect();
        for k in &keys {
            engine.insert(*k, &k.to_le_bytes()).unwrap();
        }
        for k in &keys {
            let handle = engine.lookup(*k).expect("bucket should exist");
            let cursor = engine.bscan_for_rec(&handle, *k).expect("key should be found");
            assert_eq!(cursor.read(), &k.to_le_bytes());
        }
    }

    #[test]
    fn burst_splits_two_keys_sharing_only_a_prefix_digit() {
        let engine = fixed_engine(16 * 1024 * 1024, 8);
        // Same digit at depth 0, differ at depth 1: forces exactly one burst.
        let a = 0x00u64;
        let b = 0x10u64;
        engine.insert(a, &a.to_le_bytes()).unwrap();
        engine.insert(b, &b.to_le_bytes()).unwrap();

        for k in [a, b] {
            let handle = engine.lookup(k).expect("bucket should exist");
            let cursor = engine.bscan_for_rec(&handle, k).expect("key should be found");
            assert_eq!(cursor.read(), &k.to_le_bytes());
        }
    }

    #[test]
    fn variable_length_extend_round_trips_across_chunks() {
        let engine = fixed_engine(16 * 1024 * 1024, 0);
        let key = 0xBEEFu64;
        let part_a = vec![1u8; 32];
        engine.insert(key, &part_a).unwrap();

        let handle = engine.lookup(key).unwrap();
        let cursor = engine.bscan_for_rec(&handle, key).unwrap();
        assert_eq!(cursor.read(), &part_a[..]);

        let part_b = vec![2u8; 4096];
        let chunk2 = engine.extend_rec(&cursor, &part_b).unwrap();
        let part_c = vec![3u8; 131072];
        let chunk3 = unsafe { chunk2.extend(&engine.alloc, &part_c) }.unwrap();

        let mut out = part_a.clone();
        out.extend_from_slice(unsafe { chunk2.read_var(&engine.alloc) });
        out.extend_from_slice(unsafe { chunk3.read_var(&engine.alloc) });

        let mut expected = part_a;
        expected.extend_from_slice(&part_b);
        expected.extend_from_slice(&part_c);
        assert_eq!(out, expected);
    }

    #[test]
    fn out_of_space_leaves_earlier_inserts_findable() {
        // Small enough that only a handful of buckets fit.
        let engine = fixed_engine(2 * 1024 * 1024, 8);
        let mut ok = 0usize;
        let mut failed = 0usize;
        let mut inserted = Vec::new();
        for i in 0..200_000u64 {
            match engine.insert(i, &i.to_le_bytes()) {
                Ok(_) => {
                    ok += 1;
                    inserted.push(i);
                }
                Err(EngineError::OutOfSpace) => {
                    failed += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(failed > 0, "region should have exhausted before 200000 inserts");
        assert!(ok > 0);
        for k in &inserted {
            let handle = engine.lookup(*k).expect("bucket should exist");
            let cursor = engine.bscan_for_rec(&handle, *k).expect("key should still be found");
            assert_eq!(cursor.read(), &k.to_le_bytes());
        }
    }
}
