//! The parallel file handle: a backend plus a file view, the individual
//! file pointer, hints and the atomic-mode flag.

use std::sync::Arc;

use crate::access::{AccessMode, FileView};
use crate::backend::FileBackend;
use crate::collective;
use crate::comm::Comm;
use crate::datatype::{Datatype, FlattenCache, Flattened};
use crate::error::Result;
use crate::hints::Hints;
use crate::independent;

/// A file opened for parallel access.
pub struct ParallelFile<F: FileBackend> {
    pub(crate) backend: F,
    pub(crate) view: FileView,
    pub(crate) flat_file: Arc<Flattened>,
    /// Individual file pointer, as a byte position in the view's data
    /// stream.
    pub(crate) fp_ind: i64,
    pub(crate) hints: Hints,
    pub(crate) atomic: bool,
    pub(crate) cache: FlattenCache,
}

impl<F: FileBackend> ParallelFile<F> {
    /// Wrap a backend with validated hints and a byte-stream view.
    pub fn new(backend: F, hints: Hints) -> Result<Self> {
        hints.validate()?;
        let mut cache = FlattenCache::new();
        let (view, flat_file) = FileView::new(0, Datatype::bytes(1), &mut cache)?;
        Ok(Self {
            backend,
            view,
            flat_file,
            fp_ind: 0,
            hints,
            atomic: false,
            cache,
        })
    }

    /// Install a file view and reset the individual file pointer.
    pub fn set_view(&mut self, displacement: i64, filetype: Datatype) -> Result<()> {
        let old = self.view.filetype.clone();
        let (view, flat) = FileView::new(displacement, filetype, &mut self.cache)?;
        self.cache.release(&old);
        self.view = view;
        self.flat_file = flat;
        self.fp_ind = 0;
        Ok(())
    }

    /// Enable or disable atomic-mode semantics.
    pub fn set_atomicity(&mut self, atomic: bool) {
        self.atomic = atomic;
    }

    /// Whether atomic-mode semantics are on.
    pub fn atomicity(&self) -> bool {
        self.atomic
    }

    /// The hints this handle was opened with.
    pub fn hints(&self) -> &Hints {
        &self.hints
    }

    /// Current file size in bytes.
    pub fn file_size(&mut self) -> Result<i64> {
        self.backend.file_size()
    }

    /// Grow the file to at least `size` bytes.
    pub fn preallocate(&mut self, size: i64) -> Result<()> {
        self.backend.preallocate(size)
    }

    /// Drop the cached flattening of a memory type the caller is done
    /// with. Flattenings are cached per handle on first use and live
    /// until released here (the file type's is released by `set_view`).
    pub fn release_type(&mut self, dt: &Datatype) {
        self.cache.release(dt);
    }

    /// Give the backend back.
    pub fn into_backend(self) -> F {
        self.backend
    }

    pub(crate) fn start_position(&self, mode: AccessMode) -> i64 {
        match mode {
            AccessMode::Explicit(pos) => pos,
            AccessMode::Individual => self.fp_ind,
        }
    }

    pub(crate) fn advance_fp(&mut self, mode: AccessMode, start: i64, total: i64) {
        if mode == AccessMode::Individual {
            self.fp_ind = start + total;
        }
    }

    /// Collective read: all ranks of `comm` must call this together.
    /// Returns the bytes placed in `buf`.
    pub fn read_collective<C: Comm>(
        &mut self,
        comm: &C,
        buf: &mut [u8],
        count: usize,
        memtype: &Datatype,
        mode: AccessMode,
    ) -> Result<i64> {
        collective::collective_read(self, comm, buf, count, memtype, mode)
    }

    /// Collective write: all ranks of `comm` must call this together.
    /// Returns the bytes written from `buf`.
    pub fn write_collective<C: Comm>(
        &mut self,
        comm: &C,
        buf: &[u8],
        count: usize,
        memtype: &Datatype,
        mode: AccessMode,
    ) -> Result<i64> {
        collective::collective_write(self, comm, buf, count, memtype, mode)
    }

    /// Independent strided read; involves no other rank.
    pub fn read_independent(
        &mut self,
        buf: &mut [u8],
        count: usize,
        memtype: &Datatype,
        mode: AccessMode,
    ) -> Result<i64> {
        independent::read_strided(self, buf, count, memtype, mode)
    }

    /// Independent strided write; involves no other rank.
    pub fn write_independent(
        &mut self,
        buf: &[u8],
        count: usize,
        memtype: &Datatype,
        mode: AccessMode,
    ) -> Result<i64> {
        independent::write_strided(self, buf, count, memtype, mode)
    }
}
