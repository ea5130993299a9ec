//! In-memory file backend shared between rank threads.
//!
//! Cloned handles refer to the same byte store, so the threads of a
//! [`crate::comm::LocalComm`] communicator see one file. The backend
//! records every read and write call, which is what the hole-detection
//! tests count, and can inject I/O failures.

use std::sync::{Arc, Mutex};

use crate::backend::FileBackend;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    data: Vec<u8>,
    reads: Vec<(i64, usize)>,
    writes: Vec<(i64, usize)>,
}

/// A shareable in-memory file with call recording.
#[derive(Clone, Debug, Default)]
pub struct SharedMemFile {
    inner: Arc<Mutex<Inner>>,
    fail_reads: bool,
    fail_writes: bool,
}

impl SharedMemFile {
    /// An empty file.
    pub fn new() -> Self {
        Self::default()
    }

    /// A file holding `data`.
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data,
                ..Default::default()
            })),
            fail_reads: false,
            fail_writes: false,
        }
    }

    /// Snapshot of the file contents.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().unwrap().data.clone()
    }

    /// Number of read calls recorded so far.
    pub fn read_count(&self) -> usize {
        self.inner.lock().unwrap().reads.len()
    }

    /// Number of write calls recorded so far.
    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes.len()
    }

    /// The recorded (offset, length) read calls.
    pub fn reads(&self) -> Vec<(i64, usize)> {
        self.inner.lock().unwrap().reads.clone()
    }

    /// Forget recorded calls.
    pub fn reset_counters(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.reads.clear();
        inner.writes.clear();
    }

    /// Make every read on this handle fail. Only this handle is
    /// affected; clones keep working.
    pub fn fail_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Make every write on this handle fail.
    pub fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

impl FileBackend for SharedMemFile {
    fn read_contig(&mut self, offset: i64, buf: &mut [u8]) -> Result<usize> {
        if self.fail_reads {
            return Err(Error::io(
                offset,
                std::io::Error::new(std::io::ErrorKind::Other, "injected read failure"),
            ));
        }
        let mut inner = self.inner.lock().unwrap();
        inner.reads.push((offset, buf.len()));
        let off = offset as usize;
        if off >= inner.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(inner.data.len() - off);
        buf[..n].copy_from_slice(&inner.data[off..off + n]);
        Ok(n)
    }

    fn write_contig(&mut self, offset: i64, buf: &[u8]) -> Result<usize> {
        if self.fail_writes {
            return Err(Error::io(
                offset,
                std::io::Error::new(std::io::ErrorKind::Other, "injected write failure"),
            ));
        }
        let mut inner = self.inner.lock().unwrap();
        inner.writes.push((offset, buf.len()));
        let end = offset as usize + buf.len();
        if inner.data.len() < end {
            inner.data.resize(end, 0);
        }
        let off = offset as usize;
        inner.data[off..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn file_size(&mut self) -> Result<i64> {
        Ok(self.inner.lock().unwrap().data.len() as i64)
    }

    fn preallocate(&mut self, size: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.data.len() < size as usize {
            inner.data.resize(size as usize, 0);
        }
        Ok(())
    }

    fn lock_region(&mut self, _offset: i64, _len: i64, _exclusive: bool) -> Result<()> {
        Ok(())
    }

    fn unlock_region(&mut self, _offset: i64, _len: i64) -> Result<()> {
        Ok(())
    }

    fn supports_locking(&self) -> bool {
        true
    }
}
