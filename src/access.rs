//! Per-rank access list construction.
//!
//! A [`FileView`] tiles a flattened file type over the file starting at a
//! byte displacement. Given a request of `total` data bytes starting at a
//! position in the view's data stream, the builder walks the tiled block
//! list and emits the ordered list of contiguous file chunks the rank
//! touches, together with the overall [start, end] byte range.

use std::sync::Arc;

use crate::datatype::{Datatype, FlattenCache, Flattened};
use crate::error::{Error, Result};
use crate::types::AccessRange;

/// How the starting position of a request is determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Explicit byte position within the view's data stream.
    Explicit(i64),
    /// The file handle's individual file pointer.
    Individual,
}

/// A file view: a byte displacement plus a file type whose flattened
/// blocks tile the file from the displacement onward.
#[derive(Clone, Debug)]
pub struct FileView {
    /// Byte displacement at which the tiled pattern starts.
    pub displacement: i64,
    /// The file type.
    pub filetype: Datatype,
}

impl FileView {
    /// A byte-stream view of the whole file.
    pub fn contiguous() -> Self {
        Self {
            displacement: 0,
            filetype: Datatype::bytes(1),
        }
    }

    /// Build a view, flattening the file type and checking that its
    /// blocks are monotonically increasing (required so the tiled
    /// pattern is well ordered).
    pub fn new(
        displacement: i64,
        filetype: Datatype,
        cache: &mut FlattenCache,
    ) -> Result<(Self, Arc<Flattened>)> {
        let flat = cache.get(&filetype);
        if !flat.is_monotonic() {
            return Err(Error::Type(
                "file type blocks must be monotonically increasing".into(),
            ));
        }
        Ok((
            Self {
                displacement,
                filetype,
            },
            flat,
        ))
    }
}

/// One contiguous chunk of a rank's request: a file byte range plus the
/// request-linear position of its first byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileChunk {
    /// File byte offset.
    pub file_off: i64,
    /// Chunk length in bytes.
    pub len: i64,
    /// Byte position within the request stream.
    pub linear_off: i64,
}

impl FileChunk {
    /// One-past-the-end file offset.
    #[inline]
    pub fn end(&self) -> i64 {
        self.file_off + self.len
    }
}

/// The ordered list of file chunks one rank touches for one request.
#[derive(Clone, Debug)]
pub struct AccessList {
    /// Contiguous chunks, in increasing file offset order.
    pub chunks: Vec<FileChunk>,
    /// Overall byte range touched.
    pub range: AccessRange,
    /// Total request bytes.
    pub total: i64,
}

impl AccessList {
    /// An empty access list.
    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            range: AccessRange::empty(),
            total: 0,
        }
    }
}

/// Walk the view's tiled block pattern and build the access list for
/// `total` bytes starting at data-stream position `start_pos`.
///
/// A zero-size file type yields an empty list (nothing to divide the
/// stream position by); so does a zero-byte request.
pub fn build_access_list(
    view: &FileView,
    flat_file: &Flattened,
    start_pos: i64,
    total: i64,
) -> AccessList {
    if total == 0 || flat_file.size == 0 {
        return AccessList::empty();
    }

    let tsize = flat_file.size;
    let mut tile = start_pos / tsize;
    let rem = start_pos % tsize;
    // Direct indexing into the tile containing the starting position.
    let mut idx = flat_file.prefix.partition_point(|&p| p <= rem) - 1;
    let mut within = rem - flat_file.prefix[idx];

    let mut chunks: Vec<FileChunk> = Vec::new();
    let mut linear = 0;
    while linear < total {
        let block = flat_file.blocks[idx];
        let take = (block.len - within).min(total - linear);
        let file_off = view.displacement + tile * flat_file.extent + block.offset + within;
        match chunks.last_mut() {
            Some(last) if last.end() == file_off => last.len += take,
            _ => chunks.push(FileChunk {
                file_off,
                len: take,
                linear_off: linear,
            }),
        }
        linear += take;
        within += take;
        if within == block.len {
            within = 0;
            idx += 1;
            // The view is logically repeated over the file.
            if idx == flat_file.blocks.len() {
                idx = 0;
                tile += 1;
            }
        }
    }

    let range = AccessRange {
        start: chunks[0].file_off,
        end: chunks.last().map(|c| c.end() - 1).unwrap_or(-1),
    };
    AccessList {
        chunks,
        range,
        total,
    }
}
