//! Collective entry points and the shared round machinery of the
//! two-phase exchange engine.
//!
//! A collective call proceeds through: access-list construction, an
//! allgather of per-rank byte ranges, the enable/disable/automatic
//! decision (falling back to the independent path when the ranges are
//! not interleaved), file-domain partitioning, request routing, and then
//! the round-based exchange in [`read`] or [`write`].

pub mod read;
pub mod write;

use crate::access::{build_access_list, AccessList, AccessMode};
use crate::backend::FileBackend;
use crate::comm::Comm;
use crate::datatype::{Datatype, MemLayout};
use crate::domain::partition_file_domains;
use crate::error::{Error, Result};
use crate::file::ParallelFile;
use crate::hints::CollectiveMode;
use crate::independent;
use crate::router::{calc_my_requests, calc_others_requests, OthersRequests};

/// Whether consecutive non-empty ranges overlap: some rank's start falls
/// at or before a lower rank's end. Non-interleaved patterns gain
/// nothing from aggregation.
fn interleaved(st: &[i64], end: &[i64]) -> bool {
    let mut prev_end: Option<i64> = None;
    for (&s, &e) in st.iter().zip(end.iter()) {
        if e < s {
            continue;
        }
        if let Some(pe) = prev_end {
            if s < pe {
                return true;
            }
        }
        prev_end = Some(prev_end.unwrap_or(e).max(e));
    }
    false
}

fn decide(mode: CollectiveMode, st: &[i64], end: &[i64]) -> bool {
    match mode {
        CollectiveMode::Enable => true,
        CollectiveMode::Disable => false,
        CollectiveMode::Automatic => interleaved(st, end),
    }
}

struct Prologue {
    layout: MemLayout,
    acc: AccessList,
    total: i64,
    st_offsets: Vec<i64>,
    end_offsets: Vec<i64>,
}

/// Steps shared by both directions: build the local access list, update
/// the individual file pointer, and gather everyone's byte ranges.
fn prologue<F: FileBackend, C: Comm>(
    file: &mut ParallelFile<F>,
    comm: &C,
    buf_len: usize,
    count: usize,
    memtype: &Datatype,
    mode: AccessMode,
) -> Result<Prologue> {
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

    let ranges = comm.allgather_i64(&[acc.range.start, acc.range.end])?;
    let st_offsets: Vec<i64> = ranges.iter().step_by(2).copied().collect();
    let end_offsets: Vec<i64> = ranges.iter().skip(1).step_by(2).copied().collect();
    Ok(Prologue {
        layout,
        acc,
        total,
        st_offsets,
        end_offsets,
    })
}

/// Collective read entry point (see [`ParallelFile::read_collective`]).
pub fn collective_read<F: FileBackend, C: Comm>(
    file: &mut ParallelFile<F>,
    comm: &C,
    buf: &mut [u8],
    count: usize,
    memtype: &Datatype,
    mode: AccessMode,
) -> Result<i64> {
    let p = prologue(file, comm, buf.len(), count, memtype, mode)?;
    if !decide(file.hints.cb_read, &p.st_offsets, &p.end_offsets) {
        log::debug!("collective read: access not interleaved, independent fallback");
        return independent::read_prepared(file, &p.layout, &p.acc, buf);
    }

    let naggs = file.hints.aggregator_count(comm.size());
    let table = partition_file_domains(&p.st_offsets, &p.end_offsets, naggs);
    if table.is_empty() {
        return Ok(0);
    }
    let my = calc_my_requests(&p.acc, &table);
    let others = calc_others_requests(comm, &my)?;
    read::exchange_read(file, comm, &p.layout, buf, &my, &others)?;
    Ok(p.total)
}

/// Collective write entry point (see [`ParallelFile::write_collective`]).
pub fn collective_write<F: FileBackend, C: Comm>(
    file: &mut ParallelFile<F>,
    comm: &C,
    buf: &[u8],
    count: usize,
    memtype: &Datatype,
    mode: AccessMode,
) -> Result<i64> {
    let p = prologue(file, comm, buf.len(), count, memtype, mode)?;
    if !decide(file.hints.cb_write, &p.st_offsets, &p.end_offsets) {
        log::debug!("collective write: access not interleaved, independent fallback");
        return independent::write_prepared(file, &p.layout, &p.acc, buf);
    }

    let naggs = file.hints.aggregator_count(comm.size());
    let table = partition_file_domains(&p.st_offsets, &p.end_offsets, naggs);
    if table.is_empty() {
        return Ok(0);
    }
    let my = calc_my_requests(&p.acc, &table);
    let others = calc_others_requests(comm, &my)?;
    write::exchange_write(file, comm, &p.layout, buf, &my, &others)?;
    Ok(p.total)
}

/// The byte span an aggregator must touch: minimum fragment offset and
/// maximum fragment end (inclusive) over every origin's list. `None`
/// when no fragment was routed here.
pub(crate) fn aggregate_span(others: &OthersRequests) -> Option<(i64, i64)> {
    let mut span = None;
    for list in &others.frags {
        let (Some(first), Some(last)) = (list.first(), list.last()) else {
            continue;
        };
        let (lo, hi) = (first.file_off, last.end() - 1);
        span = Some(match span {
            None => (lo, hi),
            Some((a, b)) => (lo.min(a), hi.max(b)),
        });
    }
    span
}

/// Rounds this aggregator needs for its span with a staging buffer of
/// `bufsize` bytes.
pub(crate) fn rounds_needed(span: Option<(i64, i64)>, bufsize: i64) -> i64 {
    match span {
        Some((lo, hi)) => (hi - lo + 1 + bufsize - 1) / bufsize,
        None => 0,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interleave_detection() {
        // Disjoint ascending ranges: not interleaved.
        assert!(!interleaved(&[0, 100, 200], &[99, 199, 299]));
        // Rank 1 starts inside rank 0's range.
        assert!(interleaved(&[0, 50], &[99, 149]));
        // Empty ranges are ignored.
        assert!(!interleaved(&[0, 0, 200], &[99, -1, 299]));
        // A later rank reaching back past an earlier one.
        assert!(interleaved(&[100, 0], &[199, 150]));
        // Single rank can never interleave.
        assert!(!interleaved(&[42], &[420]));
    }

    #[test]
    fn round_counts() {
        assert_eq!(rounds_needed(None, 100), 0);
        assert_eq!(rounds_needed(Some((0, 99)), 100), 1);
        assert_eq!(rounds_needed(Some((0, 100)), 100), 2);
        assert_eq!(rounds_needed(Some((0, 1999)), 1500), 2);
    }
}
