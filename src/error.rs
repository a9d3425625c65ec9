//! Typed errors surfaced by the engine.
//!
//! Only the fallible operations named in the spec (`init`, `extend_rec`,
//! and the region provider) return `Result`. `lookup`, `bscan_for_rec`
//! and `next_rec` stay infallible: a missing key is a null/`None`
//! result, never an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// `nwb` could not advance: the region is full. The engine remains
    /// usable for reads.
    #[error("out of space: region exhausted")]
    OutOfSpace,

    /// Magic mismatch on `init` when recovery was expected.
    #[error("corrupt header: magic mismatch")]
    CorruptHeader,

    /// Misaligned region, zero size, or a `rec_len` that cannot fit a
    /// bucket.
    #[error("bad argument: {0}")]
    BadArgument(&'static str),

    /// Propagated from the backing region provider (mmap, file I/O).
    #[error("region I/O error: {0}")]
    Io(#[from] std::io::Error),
}
