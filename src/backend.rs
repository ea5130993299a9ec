//! File backend capability interface.
//!
//! The engine drives storage through this trait as a black box: bounded
//! contiguous reads and writes at explicit offsets, size queries,
//! preallocation, and advisory byte-range locks where the filesystem
//! supports them.

pub mod memory;
pub mod posix;

pub use memory::SharedMemFile;
pub use posix::PosixFile;

use crate::error::Result;

/// Storage operations the I/O engine requires.
pub trait FileBackend {
    /// Read up to `buf.len()` bytes at `offset`; returns the bytes read,
    /// which is short only at end of file.
    fn read_contig(&mut self, offset: i64, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf` at `offset`, extending the file as needed; returns
    /// the bytes written.
    fn write_contig(&mut self, offset: i64, buf: &[u8]) -> Result<usize>;

    /// Current file size in bytes.
    fn file_size(&mut self) -> Result<i64>;

    /// Grow the file to at least `size` bytes (never shrinks).
    fn preallocate(&mut self, size: i64) -> Result<()>;

    /// Acquire an advisory lock on `[offset, offset + len)`; blocks
    /// until granted. No-op if locking is unsupported.
    fn lock_region(&mut self, offset: i64, len: i64, exclusive: bool) -> Result<()>;

    /// Release an advisory lock on `[offset, offset + len)`.
    fn unlock_region(&mut self, offset: i64, len: i64) -> Result<()>;

    /// Whether byte-range locks have any effect on this backend.
    fn supports_locking(&self) -> bool {
        false
    }
}
