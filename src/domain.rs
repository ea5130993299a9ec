//! File domain partitioning.
//!
//! Given every rank's [start, end] access range, the global byte range is
//! split into one contiguous domain per aggregator by ceiling-division
//! block distribution. The computation is deterministic and symmetric:
//! every rank derives identical domains from the same gathered ranges,
//! with no communication beyond the initial allgather.

use crate::types::FileDomain;

/// Result of the partition: global minimum offset, uniform domain size,
/// and one domain per aggregator (possibly empty at the tail).
#[derive(Clone, Debug)]
pub struct DomainTable {
    /// Smallest byte offset touched by any rank.
    pub min_offset: i64,
    /// Ceiling-division domain size.
    pub domain_size: i64,
    /// One domain per aggregator.
    pub domains: Vec<FileDomain>,
}

impl DomainTable {
    /// Whether no rank touches any byte.
    pub fn is_empty(&self) -> bool {
        self.domain_size == 0
    }
}

/// Partition the union of the per-rank ranges over `naggs` aggregators.
/// Ranks with empty ranges (`end < start`) contribute nothing.
pub fn partition_file_domains(st_offsets: &[i64], end_offsets: &[i64], naggs: usize) -> DomainTable {
    debug_assert_eq!(st_offsets.len(), end_offsets.len());
    let mut bounds = None;
    for (&st, &end) in st_offsets.iter().zip(end_offsets.iter()) {
        if end < st {
            continue;
        }
        bounds = Some(match bounds {
            None => (st, end),
            Some((a, b)) => (st.min(a), end.max(b)),
        });
    }
    let Some((gmin, gmax)) = bounds else {
        return DomainTable {
            min_offset: 0,
            domain_size: 0,
            domains: vec![FileDomain::empty(); naggs],
        };
    };

    let range = gmax - gmin + 1;
    let fd_size = (range + naggs as i64 - 1) / naggs as i64;
    let domains = (0..naggs as i64)
        .map(|i| {
            let start = gmin + i * fd_size;
            if start > gmax {
                FileDomain::empty()
            } else {
                FileDomain {
                    start,
                    end: (start + fd_size - 1).min(gmax),
                }
            }
        })
        .collect();
    DomainTable {
        min_offset: gmin,
        domain_size: fd_size,
        domains,
    }
}
