//! Independent strided I/O.
//!
//! Each rank services its own access list with no communication. Sparse
//! requests go through a rolling window buffer so that many small chunks
//! cost few syscalls; on the write side the window is flushed as one
//! contiguous store, with gaps between chunks refilled from the file
//! first (read-modify-write). Under atomic mode the whole touched range
//! is byte-range locked for the duration of the call when the backend
//! supports it.

use crate::access::{build_access_list, AccessList, AccessMode};
use crate::backend::FileBackend;
use crate::datatype::{Datatype, MemLayout};
use crate::error::{Error, Result};
use crate::file::ParallelFile;

/// Independent strided read. Returns the bytes actually delivered, which
/// falls short of the request when the file ends inside it.
pub(crate) fn read_strided<F: FileBackend>(
    file: &mut ParallelFile<F>,
    buf: &mut [u8],
    count: usize,
    memtype: &Datatype,
    mode: AccessMode,
) -> Result<i64> {
    let (layout, acc) = prepare(file, buf.len(), count, memtype, mode)?;
    read_prepared(file, &layout, &acc, buf)
}

/// Independent strided write. Returns the bytes written.
pub(crate) fn write_strided<F: FileBackend>(
    file: &mut ParallelFile<F>,
    buf: &[u8],
    count: usize,
    memtype: &Datatype,
    mode: AccessMode,
) -> Result<i64> {
    let (layout, acc) = prepare(file, buf.len(), count, memtype, mode)?;
    write_prepared(file, &layout, &acc, buf)
}

fn prepare<F: FileBackend>(
    file: &mut ParallelFile<F>,
    buf_len: usize,
    count: usize,
    memtype: &Datatype,
    mode: AccessMode,
) -> Result<(MemLayout, AccessList)> {
    let layout = MemLayout::new(&mut file.cache, memtype);
    let total = count as i64 * layout.type_size();
    if buf_len < layout.required_span(count) {
        return Err(Error::Config(format!(
            "buffer of {buf_len} bytes cannot hold {count} instances of the memory type"
        )));
    }
    let start = file.start_position(mode);
    let flat_file = file.flat_file.clone();
    let acc = build_access_list(&file.view, &flat_file, start, total);
    file.advance_fp(mode, start, total);
    Ok((layout, acc))
}

/// Read an already-built access list. Also the fallback target of a
/// collective call whose access pattern is not interleaved.
pub(crate) fn read_prepared<F: FileBackend>(
    file: &mut ParallelFile<F>,
    layout: &MemLayout,
    acc: &AccessList,
    buf: &mut [u8],
) -> Result<i64> {
    if acc.chunks.is_empty() {
        return Ok(0);
    }
    let lock = file.atomic && file.backend.supports_locking();
    let (lo, len) = (acc.range.start, acc.range.end - acc.range.start + 1);
    if lock {
        file.backend.lock_region(lo, len, false)?;
    }
    let res = read_inner(file, layout, acc, buf);
    if lock {
        match &res {
            Ok(_) => file.backend.unlock_region(lo, len)?,
            // The I/O error wins over an unlock failure.
            Err(_) => drop(file.backend.unlock_region(lo, len)),
        }
    }
    res
}

/// Write an already-built access list.
pub(crate) fn write_prepared<F: FileBackend>(
    file: &mut ParallelFile<F>,
    layout: &MemLayout,
    acc: &AccessList,
    buf: &[u8],
) -> Result<i64> {
    if acc.chunks.is_empty() {
        return Ok(0);
    }
    let lock = file.atomic && file.backend.supports_locking();
    let (lo, len) = (acc.range.start, acc.range.end - acc.range.start + 1);
    if lock {
        file.backend.lock_region(lo, len, true)?;
    }
    let res = write_inner(file, layout, acc, buf);
    if lock {
        match &res {
            Ok(_) => file.backend.unlock_region(lo, len)?,
            Err(_) => drop(file.backend.unlock_region(lo, len)),
        }
    }
    res
}

/// Rolling read window: each refill pulls a full window from the file,
/// and a short refill marks end of file.
struct ReadWindow {
    data: Vec<u8>,
    start: i64,
    valid: usize,
}

impl ReadWindow {
    fn new(cap: usize) -> Self {
        Self {
            data: vec![0; cap],
            start: 0,
            valid: 0,
        }
    }

    /// Up to `want` bytes at file offset `off`, refilling if the window
    /// does not cover it. An empty slice means end of file.
    fn pull<F: FileBackend>(&mut self, backend: &mut F, off: i64, want: usize) -> Result<&[u8]> {
        if off < self.start || off >= self.start + self.valid as i64 {
            self.start = off;
            self.valid = backend.read_contig(off, &mut self.data)?;
        }
        let at = (off - self.start) as usize;
        let avail = self.valid.saturating_sub(at).min(want);
        Ok(&self.data[at..at + avail])
    }
}

fn read_inner<F: FileBackend>(
    file: &mut ParallelFile<F>,
    layout: &MemLayout,
    acc: &AccessList,
    buf: &mut [u8],
) -> Result<i64> {
    // Dense on both sides: one syscall, no copy through the window.
    if acc.chunks.len() == 1 && layout.is_contiguous() {
        let c = acc.chunks[0];
        let n = file.backend.read_contig(c.file_off, &mut buf[..c.len as usize])?;
        return Ok(n as i64);
    }

    let mut win = ReadWindow::new(file.hints.ind_rd_buffer_size);
    let mut delivered = 0i64;
    for c in &acc.chunks {
        let mut off = c.file_off;
        let mut lin = c.linear_off;
        let mut left = c.len;
        while left > 0 {
            let got = win.pull(&mut file.backend, off, left as usize)?;
            if got.is_empty() {
                return Ok(delivered);
            }
            let n = got.len() as i64;
            layout.scatter(buf, lin, got);
            off += n;
            lin += n;
            left -= n;
            delivered += n;
        }
    }
    Ok(delivered)
}

fn write_inner<F: FileBackend>(
    file: &mut ParallelFile<F>,
    layout: &MemLayout,
    acc: &AccessList,
    buf: &[u8],
) -> Result<i64> {
    if acc.chunks.len() == 1 && layout.is_contiguous() {
        let c = acc.chunks[0];
        file.backend.write_contig(c.file_off, &buf[..c.len as usize])?;
        return Ok(c.len);
    }

    let cap = file.hints.ind_wr_buffer_size;
    let mut data = vec![0u8; cap];
    let mut wstart = acc.chunks[0].file_off;
    // Dirty bytes in the window; the window start never moves backwards
    // because chunks ascend.
    let mut hi = 0usize;
    for c in &acc.chunks {
        let mut off = c.file_off;
        let mut lin = c.linear_off;
        let mut left = c.len;
        while left > 0 {
            let mut at = (off - wstart) as usize;
            if at >= cap {
                file.backend.write_contig(wstart, &data[..hi])?;
                wstart = off;
                hi = 0;
                at = 0;
            }
            if at > hi {
                // A gap inside the window must keep its current file
                // contents; bytes past end of file stay zero.
                data[hi..at].fill(0);
                file.backend.read_contig(wstart + hi as i64, &mut data[hi..at])?;
            }
            let take = (left as usize).min(cap - at);
            layout.gather(buf, lin, &mut data[at..at + take]);
            hi = at + take;
            off += take as i64;
            lin += take as i64;
            left -= take as i64;
        }
    }
    if hi > 0 {
        file.backend.write_contig(wstart, &data[..hi])?;
    }
    Ok(acc.total)
}
