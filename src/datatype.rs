//! Datatype descriptions and flattening.
//!
//! A [`Datatype`] describes a possibly nested byte layout built from the
//! combinator grammar {basic, contiguous, vector, indexed, struct}.
//! Flattening turns one instance of a type into an ordered list of
//! (offset, length) blocks; the merge pass coalesces adjacent blocks so
//! the list is maximal. Flattening a given type is done at most once per
//! context through [`FlattenCache`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::FlatBlock;

static NEXT_TYPE_ID: AtomicU64 = AtomicU64::new(1);

/// A nested datatype description. Types carry a process-unique identity
/// used as the flatten-cache key; clones share the identity (and hence
/// the cached flattening).
#[derive(Clone, Debug)]
pub struct Datatype {
    id: u64,
    kind: TypeKind,
}

#[derive(Clone, Debug)]
enum TypeKind {
    Basic {
        size: i64,
    },
    Contiguous {
        count: i64,
        base: Box<Datatype>,
    },
    Vector {
        count: i64,
        blocklen: i64,
        stride: i64,
        base: Box<Datatype>,
    },
    Indexed {
        blocklens: Vec<i64>,
        displs: Vec<i64>,
        base: Box<Datatype>,
    },
    Struct {
        blocklens: Vec<i64>,
        displs: Vec<i64>,
        types: Vec<Datatype>,
    },
}

fn next_id() -> u64 {
    NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed)
}

impl Datatype {
    /// A basic (named) type of `size` bytes.
    pub fn bytes(size: usize) -> Self {
        Self {
            id: next_id(),
            kind: TypeKind::Basic { size: size as i64 },
        }
    }

    /// `count` back-to-back copies of `base`, each at the base extent.
    pub fn contiguous(count: usize, base: Datatype) -> Self {
        Self {
            id: next_id(),
            kind: TypeKind::Contiguous {
                count: count as i64,
                base: Box::new(base),
            },
        }
    }

    /// `count` blocks of `blocklen` copies of `base`, block starts
    /// separated by `stride` base extents.
    pub fn vector(count: usize, blocklen: usize, stride: i64, base: Datatype) -> Self {
        Self {
            id: next_id(),
            kind: TypeKind::Vector {
                count: count as i64,
                blocklen: blocklen as i64,
                stride,
                base: Box::new(base),
            },
        }
    }

    /// Blocks of `blocklens[i]` copies of `base` at explicit byte
    /// displacements `displs[i]`.
    pub fn indexed(blocklens: &[usize], displs: &[i64], base: Datatype) -> Result<Self> {
        if blocklens.len() != displs.len() {
            return Err(Error::Type(format!(
                "indexed: {} block lengths but {} displacements",
                blocklens.len(),
                displs.len()
            )));
        }
        Ok(Self {
            id: next_id(),
            kind: TypeKind::Indexed {
                blocklens: blocklens.iter().map(|&b| b as i64).collect(),
                displs: displs.to_vec(),
                base: Box::new(base),
            },
        })
    }

    /// Blocks of `blocklens[i]` copies of `types[i]` at explicit byte
    /// displacements `displs[i]`.
    pub fn structured(blocklens: &[usize], displs: &[i64], types: Vec<Datatype>) -> Result<Self> {
        if blocklens.len() != displs.len() || blocklens.len() != types.len() {
            return Err(Error::Type(format!(
                "struct: mismatched member counts ({} lengths, {} displacements, {} types)",
                blocklens.len(),
                displs.len(),
                types.len()
            )));
        }
        Ok(Self {
            id: next_id(),
            kind: TypeKind::Struct {
                blocklens: blocklens.iter().map(|&b| b as i64).collect(),
                displs: displs.to_vec(),
                types,
            },
        })
    }

    /// Cache identity of this type.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Total data bytes of one instance (holes excluded).
    pub fn size(&self) -> i64 {
        match &self.kind {
            TypeKind::Basic { size } => *size,
            TypeKind::Contiguous { count, base } => count * base.size(),
            TypeKind::Vector {
                count,
                blocklen,
                base,
                ..
            } => count * blocklen * base.size(),
            TypeKind::Indexed {
                blocklens, base, ..
            } => blocklens.iter().sum::<i64>() * base.size(),
            TypeKind::Struct {
                blocklens, types, ..
            } => blocklens
                .iter()
                .zip(types.iter())
                .map(|(bl, t)| bl * t.size())
                .sum(),
        }
    }

    /// Lower and upper byte bounds of one instance relative to the type
    /// origin.
    pub fn bounds(&self) -> (i64, i64) {
        match &self.kind {
            TypeKind::Basic { size } => (0, *size),
            TypeKind::Contiguous { count, base } => {
                if *count == 0 {
                    return (0, 0);
                }
                let (lb, ub) = base.bounds();
                let ext = ub - lb;
                (lb, ub + (count - 1) * ext)
            }
            TypeKind::Vector {
                count,
                blocklen,
                stride,
                base,
            } => {
                if *count == 0 || *blocklen == 0 {
                    return (0, 0);
                }
                let (lb, ub) = base.bounds();
                let ext = ub - lb;
                let corners = [
                    0,
                    blocklen - 1,
                    (count - 1) * stride,
                    (count - 1) * stride + blocklen - 1,
                ];
                let lo = corners.iter().min().unwrap() * ext;
                let hi = corners.iter().max().unwrap() * ext;
                (lo + lb, hi + ub)
            }
            TypeKind::Indexed {
                blocklens,
                displs,
                base,
            } => {
                let (lb, ub) = base.bounds();
                let ext = ub - lb;
                let mut bounds = None;
                for (&bl, &d) in blocklens.iter().zip(displs.iter()) {
                    if bl == 0 {
                        continue;
                    }
                    let (lo, hi) = (d + lb, d + (bl - 1) * ext + ub);
                    bounds = Some(match bounds {
                        None => (lo, hi),
                        Some((a, b)) => (lo.min(a), hi.max(b)),
                    });
                }
                bounds.unwrap_or((0, 0))
            }
            TypeKind::Struct {
                blocklens,
                displs,
                types,
            } => {
                let mut bounds = None;
                for ((&bl, &d), t) in blocklens.iter().zip(displs.iter()).zip(types.iter()) {
                    if bl == 0 {
                        continue;
                    }
                    let (lb, ub) = t.bounds();
                    let ext = ub - lb;
                    let (lo, hi) = (d + lb, d + (bl - 1) * ext + ub);
                    bounds = Some(match bounds {
                        None => (lo, hi),
                        Some((a, b)) => (lo.min(a), hi.max(b)),
                    });
                }
                bounds.unwrap_or((0, 0))
            }
        }
    }

    /// Span of one instance in bytes; consecutive instances tile at this
    /// stride.
    pub fn extent(&self) -> i64 {
        let (lb, ub) = self.bounds();
        ub - lb
    }

    /// Whether one instance occupies a single gapless byte range.
    pub fn is_contiguous(&self) -> bool {
        self.size() == self.extent()
    }

    /// Flatten one instance into an ordered, merged block list.
    pub fn flatten(&self) -> Flattened {
        let mut blocks = Vec::new();
        self.flatten_into(0, &mut blocks);
        let blocks = optimize(blocks);
        let (lb, ub) = self.bounds();
        Flattened::new(blocks, self.size(), lb, ub - lb)
    }

    fn flatten_into(&self, origin: i64, out: &mut Vec<FlatBlock>) {
        let size = self.size();
        if size == 0 {
            return;
        }
        // A contiguous subtree is a single block; no need to recurse.
        if self.is_contiguous() {
            let (lb, _) = self.bounds();
            out.push(FlatBlock {
                offset: origin + lb,
                len: size,
            });
            return;
        }
        match &self.kind {
            TypeKind::Basic { size } => out.push(FlatBlock {
                offset: origin,
                len: *size,
            }),
            TypeKind::Contiguous { count, base } => {
                let ext = base.extent();
                for i in 0..*count {
                    base.flatten_into(origin + i * ext, out);
                }
            }
            TypeKind::Vector {
                count,
                blocklen,
                stride,
                base,
            } => {
                let ext = base.extent();
                let bsize = base.size();
                for i in 0..*count {
                    let block_origin = origin + i * stride * ext;
                    if base.is_contiguous() {
                        out.push(FlatBlock {
                            offset: block_origin + base.bounds().0,
                            len: blocklen * bsize,
                        });
                    } else {
                        for j in 0..*blocklen {
                            base.flatten_into(block_origin + j * ext, out);
                        }
                    }
                }
            }
            TypeKind::Indexed {
                blocklens,
                displs,
                base,
            } => {
                let ext = base.extent();
                let bsize = base.size();
                for (&bl, &d) in blocklens.iter().zip(displs.iter()) {
                    if bl == 0 {
                        continue;
                    }
                    if base.is_contiguous() {
                        out.push(FlatBlock {
                            offset: origin + d + base.bounds().0,
                            len: bl * bsize,
                        });
                    } else {
                        for j in 0..bl {
                            base.flatten_into(origin + d + j * ext, out);
                        }
                    }
                }
            }
            TypeKind::Struct {
                blocklens,
                displs,
                types,
            } => {
                for ((&bl, &d), t) in blocklens.iter().zip(displs.iter()).zip(types.iter()) {
                    let ext = t.extent();
                    for j in 0..bl {
                        t.flatten_into(origin + d + j * ext, out);
                    }
                }
            }
        }
    }
}

/// Merge pass: drop empty blocks and coalesce blocks that abut. The pass
/// is order-preserving and idempotent.
fn optimize(blocks: Vec<FlatBlock>) -> Vec<FlatBlock> {
    let mut merged: Vec<FlatBlock> = Vec::with_capacity(blocks.len());
    for b in blocks {
        if b.len == 0 {
            continue;
        }
        match merged.last_mut() {
            Some(last) if last.end() == b.offset => last.len += b.len,
            _ => merged.push(b),
        }
    }
    merged
}

/// The flattened representation of one datatype instance.
#[derive(Clone, Debug)]
pub struct Flattened {
    /// Ordered, merged (offset, length) blocks.
    pub blocks: Vec<FlatBlock>,
    /// Total data bytes (sum of block lengths).
    pub size: i64,
    /// Lower bound of the instance relative to the type origin.
    pub lb: i64,
    /// Tiling stride for consecutive instances.
    pub extent: i64,
    /// Data bytes preceding each block within the instance.
    pub prefix: Vec<i64>,
}

impl Flattened {
    fn new(blocks: Vec<FlatBlock>, size: i64, lb: i64, extent: i64) -> Self {
        let mut prefix = Vec::with_capacity(blocks.len());
        let mut acc = 0;
        for b in &blocks {
            prefix.push(acc);
            acc += b.len;
        }
        debug_assert_eq!(acc, size);
        Self {
            blocks,
            size,
            lb,
            extent,
            prefix,
        }
    }

    /// Whether block offsets are strictly increasing and non-overlapping.
    /// File types must satisfy this; memory types need not.
    pub fn is_monotonic(&self) -> bool {
        self.blocks.windows(2).all(|w| w[0].end() <= w[1].offset)
    }

    /// Number of blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// Per-context flatten cache: each distinct type is flattened at most
/// once and reused until explicitly released.
#[derive(Debug, Default)]
pub struct FlattenCache {
    map: HashMap<u64, Arc<Flattened>>,
}

impl FlattenCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattening of `dt`, computed on first use.
    pub fn get(&mut self, dt: &Datatype) -> Arc<Flattened> {
        self.map
            .entry(dt.id)
            .or_insert_with(|| Arc::new(dt.flatten()))
            .clone()
    }

    /// Drop the cached flattening of `dt`.
    pub fn release(&mut self, dt: &Datatype) {
        self.map.remove(&dt.id);
    }

    /// Number of cached flattenings.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Mapping from request-linear byte positions to byte offsets in the
/// user's memory buffer. Linear position `k` is the `k`-th data byte of
/// the request; instances of the memory type tile the buffer at the type
/// extent.
#[derive(Clone, Debug)]
pub struct MemLayout {
    flat: Arc<Flattened>,
    contiguous: bool,
}

impl MemLayout {
    /// Build the mapping for a memory type, reusing the context cache.
    pub fn new(cache: &mut FlattenCache, dt: &Datatype) -> Self {
        let flat = cache.get(dt);
        let contiguous = dt.is_contiguous();
        Self { flat, contiguous }
    }

    /// Data bytes of one instance.
    pub fn type_size(&self) -> i64 {
        self.flat.size
    }

    /// Whether memory offsets coincide with request-linear positions.
    pub fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    /// Bytes of user buffer spanned by `count` instances.
    pub fn required_span(&self, count: usize) -> usize {
        if self.flat.size == 0 {
            0
        } else {
            (count as i64 * self.flat.extent) as usize
        }
    }

    /// Copy `data` into `user` starting at request-linear position
    /// `linear`.
    pub fn scatter(&self, user: &mut [u8], linear: i64, data: &[u8]) {
        self.walk(linear, data.len() as i64, |mem_off, done, len| {
            user[mem_off..mem_off + len].copy_from_slice(&data[done..done + len]);
        });
    }

    /// Copy bytes at request-linear position `linear` from `user` into
    /// `out`.
    pub fn gather(&self, user: &[u8], linear: i64, out: &mut [u8]) {
        self.walk(linear, out.len() as i64, |mem_off, done, len| {
            out[done..done + len].copy_from_slice(&user[mem_off..mem_off + len]);
        });
    }

    fn walk(&self, linear: i64, n: i64, mut copy: impl FnMut(usize, usize, usize)) {
        if n == 0 || self.flat.size == 0 {
            return;
        }
        if self.contiguous {
            copy(linear as usize, 0, n as usize);
            return;
        }
        let tsize = self.flat.size;
        let mut pos = linear;
        let mut done = 0;
        while done < n {
            let tile = pos / tsize;
            let rem = pos % tsize;
            let idx = self.flat.prefix.partition_point(|&p| p <= rem) - 1;
            let within = rem - self.flat.prefix[idx];
            let block = self.flat.blocks[idx];
            let take = (block.len - within).min(n - done);
            let mem_off = tile * self.flat.extent + (block.offset - self.flat.lb) + within;
            copy(mem_off as usize, done as usize, take as usize);
            pos += take;
            done += take;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn basic_flattens_to_one_block() {
        let t = Datatype::bytes(8);
        let f = t.flatten();
        assert_eq!(f.blocks, vec![FlatBlock { offset: 0, len: 8 }]);
        assert_eq!(f.size, 8);
        assert_eq!(f.extent, 8);
        assert!(t.is_contiguous());
    }

    #[test]
    fn vector_flattens_with_holes() {
        // 3 blocks of 2 bytes every 4 bytes: [0,2) [4,6) [8,10)
        let t = Datatype::vector(3, 2, 4, Datatype::bytes(1));
        let f = t.flatten();
        assert_eq!(
            f.blocks,
            vec![
                FlatBlock { offset: 0, len: 2 },
                FlatBlock { offset: 4, len: 2 },
                FlatBlock { offset: 8, len: 2 },
            ]
        );
        assert_eq!(f.size, 6);
        assert_eq!(f.extent, 10);
        assert!(!t.is_contiguous());
        assert!(f.is_monotonic());
    }

    #[test]
    fn gapless_vector_collapses_to_one_block() {
        let t = Datatype::vector(4, 2, 2, Datatype::bytes(1));
        assert!(t.is_contiguous());
        let f = t.flatten();
        assert_eq!(f.blocks, vec![FlatBlock { offset: 0, len: 8 }]);
    }

    #[test]
    fn nested_vector_of_vector() {
        // Inner: 2 blocks of 1 byte every 2 -> [0,1) [2,3), extent 3.
        // Outer: 2 inner instances every 2 extents (6 bytes).
        let inner = Datatype::vector(2, 1, 2, Datatype::bytes(1));
        let outer = Datatype::vector(2, 1, 2, inner);
        let f = outer.flatten();
        assert_eq!(
            f.blocks,
            vec![
                FlatBlock { offset: 0, len: 1 },
                FlatBlock { offset: 2, len: 1 },
                FlatBlock { offset: 6, len: 1 },
                FlatBlock { offset: 8, len: 1 },
            ]
        );
        assert_eq!(f.size, 4);
    }

    #[test]
    fn indexed_respects_displacements() {
        let t = Datatype::indexed(&[2, 1], &[4, 0], Datatype::bytes(2)).unwrap();
        let f = t.flatten();
        // Declaration order preserved: block at 4 first, then block at 0.
        assert_eq!(
            f.blocks,
            vec![
                FlatBlock { offset: 4, len: 4 },
                FlatBlock { offset: 0, len: 2 },
            ]
        );
        assert_eq!(f.size, 6);
        assert!(!f.is_monotonic());
    }

    #[test]
    fn struct_mixes_member_types() {
        let t = Datatype::structured(
            &[1, 2],
            &[0, 8],
            vec![Datatype::bytes(3), Datatype::bytes(2)],
        )
        .unwrap();
        let f = t.flatten();
        assert_eq!(
            f.blocks,
            vec![
                FlatBlock { offset: 0, len: 3 },
                FlatBlock { offset: 8, len: 4 },
            ]
        );
        assert_eq!(f.size, 7);
    }

    #[test]
    fn malformed_indexed_rejected() {
        let r = Datatype::indexed(&[1, 2], &[0], Datatype::bytes(1));
        assert!(r.is_err());
        let r = Datatype::structured(&[1], &[0, 4], vec![Datatype::bytes(1)]);
        assert!(r.is_err());
    }

    #[test]
    fn flatten_total_equals_type_size() {
        let inner = Datatype::vector(3, 2, 3, Datatype::bytes(2));
        let t = Datatype::structured(&[2, 1], &[0, 64], vec![inner.clone(), Datatype::bytes(5)])
            .unwrap();
        let f = t.flatten();
        let total: i64 = f.blocks.iter().map(|b| b.len).sum();
        assert_eq!(total, t.size());
    }

    #[test]
    fn flatten_is_deterministic() {
        let t = Datatype::vector(5, 3, 7, Datatype::bytes(2));
        assert_eq!(t.flatten().blocks, t.flatten().blocks);
    }

    #[test]
    fn optimize_is_idempotent() {
        let blocks = vec![
            FlatBlock { offset: 0, len: 2 },
            FlatBlock { offset: 2, len: 2 },
            FlatBlock { offset: 8, len: 1 },
            FlatBlock { offset: 9, len: 0 },
            FlatBlock { offset: 9, len: 3 },
        ];
        let once = optimize(blocks);
        let twice = optimize(once.clone());
        assert_eq!(once, twice);
        assert_eq!(
            once,
            vec![
                FlatBlock { offset: 0, len: 4 },
                FlatBlock { offset: 8, len: 4 },
            ]
        );
    }

    #[test]
    fn cache_flattens_once_and_releases() {
        let mut cache = FlattenCache::new();
        let t = Datatype::vector(4, 1, 2, Datatype::bytes(1));
        let a = cache.get(&t);
        let b = cache.get(&t);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        cache.release(&t);
        assert!(cache.is_empty());
    }

    #[test]
    fn mem_layout_scatter_gather_roundtrip() {
        let mut cache = FlattenCache::new();
        // 2 bytes of data every 4 bytes, 3 blocks per instance.
        let t = Datatype::vector(3, 2, 4, Datatype::bytes(1));
        let layout = MemLayout::new(&mut cache, &t);
        assert_eq!(layout.type_size(), 6);

        // Two instances tiled at the extent.
        let data: Vec<u8> = (0..12).collect();
        let mut user = vec![0u8; layout.required_span(2)];
        layout.scatter(&mut user, 0, &data);

        let mut out = vec![0u8; 12];
        layout.gather(&user, 0, &mut out);
        assert_eq!(out, data);

        // Partial copy starting mid-instance.
        let mut out = vec![0u8; 5];
        layout.gather(&user, 4, &mut out);
        assert_eq!(out, vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn mem_layout_contiguous_fast_path() {
        let mut cache = FlattenCache::new();
        let t = Datatype::bytes(16);
        let layout = MemLayout::new(&mut cache, &t);
        let mut user = vec![0u8; 16];
        layout.scatter(&mut user, 4, &[9, 8, 7]);
        assert_eq!(&user[4..7], &[9, 8, 7]);
    }
}
