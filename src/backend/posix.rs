//! POSIX file backend: positional reads and writes plus `fcntl` advisory
//! byte-range locks.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::backend::FileBackend;
use crate::error::{Error, Result};

/// A file accessed through positional syscalls. Each rank opens its own
/// descriptor; aggregators write disjoint regions, so no descriptor
/// sharing is needed.
#[derive(Debug)]
pub struct PosixFile {
    file: File,
}

impl PosixFile {
    /// Open an existing file for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io(0, e))?;
        Ok(Self { file })
    }

    /// Open a file for reading and writing, creating it if absent.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| Error::io(0, e))?;
        Ok(Self { file })
    }

    fn fcntl_lock(&self, offset: i64, len: i64, lock_type: libc::c_short, wait: bool) -> Result<()> {
        let flock = libc::flock {
            l_type: lock_type,
            l_whence: libc::SEEK_SET as libc::c_short,
            l_start: offset,
            l_len: len,
            l_pid: 0,
        };
        let cmd = if wait { libc::F_SETLKW } else { libc::F_SETLK };
        // Safety: flock is a plain C struct and the descriptor is owned
        // by self for its whole lifetime.
        let rc = unsafe { libc::fcntl(self.file.as_raw_fd(), cmd, &flock) };
        if rc == -1 {
            Err(Error::io(offset, std::io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }
}

impl FileBackend for PosixFile {
    fn read_contig(&mut self, offset: i64, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.file.read_at(&mut buf[done..], (offset + done as i64) as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(offset + done as i64, e)),
            }
        }
        Ok(done)
    }

    fn write_contig(&mut self, offset: i64, buf: &[u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.file.write_at(&buf[done..], (offset + done as i64) as u64) {
                Ok(0) => {
                    return Err(Error::io(
                        offset + done as i64,
                        std::io::Error::new(std::io::ErrorKind::WriteZero, "zero-length write"),
                    ))
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(offset + done as i64, e)),
            }
        }
        Ok(done)
    }

    fn file_size(&mut self) -> Result<i64> {
        let meta = self.file.metadata().map_err(|e| Error::io(0, e))?;
        Ok(meta.len() as i64)
    }

    fn preallocate(&mut self, size: i64) -> Result<()> {
        if self.file_size()? < size {
            self.file.set_len(size as u64).map_err(|e| Error::io(0, e))?;
        }
        Ok(())
    }

    fn lock_region(&mut self, offset: i64, len: i64, exclusive: bool) -> Result<()> {
        let lock_type = if exclusive { libc::F_WRLCK } else { libc::F_RDLCK };
        self.fcntl_lock(offset, len, lock_type as libc::c_short, true)
    }

    fn unlock_region(&mut self, offset: i64, len: i64) -> Result<()> {
        self.fcntl_lock(offset, len, libc::F_UNLCK as libc::c_short, false)
    }

    fn supports_locking(&self) -> bool {
        true
    }
}
