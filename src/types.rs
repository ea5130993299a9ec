//! Shared value types for flattened layouts, access ranges, file domains
//! and routed request fragments.

/// One contiguous byte block of a flattened datatype: offset relative to
/// the start of the type instance, plus a length in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlatBlock {
    /// Byte offset relative to the type origin.
    pub offset: i64,
    /// Block length in bytes.
    pub len: i64,
}

impl FlatBlock {
    /// One-past-the-end byte offset of this block.
    #[inline]
    pub fn end(&self) -> i64 {
        self.offset + self.len
    }
}

/// The minimal and maximal file byte touched by one rank's request.
/// Empty when `end < start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessRange {
    /// First byte touched.
    pub start: i64,
    /// Last byte touched (inclusive).
    pub end: i64,
}

impl AccessRange {
    /// An empty range touching no bytes.
    pub fn empty() -> Self {
        Self { start: 0, end: -1 }
    }

    /// Whether the range touches no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// The contiguous region of the file owned by one aggregator. A domain
/// with `end < start` is a degenerate empty domain (the global range did
/// not divide evenly over the aggregators).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileDomain {
    /// First byte of the domain.
    pub start: i64,
    /// Last byte of the domain (inclusive).
    pub end: i64,
}

impl FileDomain {
    /// A degenerate domain owning no bytes.
    pub fn empty() -> Self {
        Self { start: 0, end: -1 }
    }

    /// Whether this domain owns no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// A piece of one rank's access list that falls entirely inside a single
/// file domain. `linear_off` is the position of the fragment's first byte
/// within the owning rank's request, in request order; it drives the
/// gather/scatter through the (possibly non-contiguous) memory buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fragment {
    /// File byte offset of the fragment.
    pub file_off: i64,
    /// Fragment length in bytes.
    pub len: i64,
    /// Byte position within the owning rank's request stream.
    pub linear_off: i64,
}

impl Fragment {
    /// One-past-the-end file offset of the fragment.
    #[inline]
    pub fn end(&self) -> i64 {
        self.file_off + self.len
    }
}
