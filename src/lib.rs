//! An embedded, memory-mapped, concurrent key/value store built on a
//! burst hash trie: a lock-free 16-way index spine over cache-line-sized
//! nodes, backed by a segmented extent/block allocator and a layer of
//! collision buckets guarded by per-bucket reader/writer locks.
//!
//! The store owns no region of its own; callers hand it a byte region
//! (see [`region::ByteRegion`]) and get back an [`Engine`] to
//! `insert`/`lookup`/`bscan_for_rec` against it. The default region
//! provider, [`region::MappedRegion`], is a `memmap2`-backed file or
//! anonymous mapping, but any other `(ptr, len)` provider works equally
//! well — the engine never names `memmap2` types directly.
//!
//! # Layout
//! - [`layout`] — on-disk structures and offset arithmetic.
//! - [`alloc`] — the extent/block allocator (per-CPU cursors, global
//!   `nwb` bump, extent occupancy bitmap).
//! - [`trie`] — the lock-free index spine.
//! - [`bucket`] — collision-chain buckets and their embedded locks.
//! - [`record`] — fixed and variable record encoding.
//! - [`lock`] — the compact spinning reader/writer lock buckets embed.
//! - [`percpu`] — per-CPU cursor state.
//! - [`hash`] — the default key hasher and the [`hash::KeyHasher`] trait.
//! - [`region`] — the default `memmap2` region provider.
//! - [`error`] — [`error::EngineError`].
pub mod alloc;
pub mod bucket;
mod engine;
pub mod error;
pub mod hash;
pub mod layout;
pub mod lock;
pub mod percpu;
pub mod record;
pub mod region;
pub mod trie;

pub use engine::{BucketHandle, Engine, EngineConfig, RecordCursor};
pub use error::EngineError;
pub use hash::{CrcHasher, KeyHasher};
pub use region::{ByteRegion, MappedRegion};
