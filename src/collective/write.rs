//! Write side of the two-phase exchange.
//!
//! The mirror of the read engine: origins gather their bytes from the
//! user buffer, the variable-count exchange delivers them to the
//! aggregator owning each window, and the aggregator overlays them onto
//! its staging buffer. When the incoming fragments do not cover the
//! window span contiguously, the covered span is read first so that
//! unwritten bytes survive (read-modify-write).

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::backend::FileBackend;
use crate::collective::{aggregate_span, rounds_needed};
use crate::comm::Comm;
use crate::datatype::MemLayout;
use crate::error::{Error, Result};
use crate::file::ParallelFile;
use crate::router::{MyRequests, OthersRequests};

/// Merge the per-origin piece lists (each sorted by stage offset) and
/// report the covered span and whether it has a gap.
fn coverage(pieces: &[Vec<(i64, i64)>]) -> Option<(i64, i64, bool)> {
    let mut heap: BinaryHeap<Reverse<(i64, i64, usize)>> = BinaryHeap::new();
    for (o, list) in pieces.iter().enumerate() {
        if let Some(&(off, len)) = list.first() {
            heap.push(Reverse((off, len, o)));
        }
    }
    let Reverse((lo, _, _)) = *heap.peek()?;
    let mut next = vec![1usize; pieces.len()];
    let mut end = lo;
    let mut has_hole = false;
    while let Some(Reverse((off, len, o))) = heap.pop() {
        if off > end {
            has_hole = true;
        }
        end = end.max(off + len);
        if next[o] < pieces[o].len() {
            let (noff, nlen) = pieces[o][next[o]];
            next[o] += 1;
            heap.push(Reverse((noff, nlen, o)));
        }
    }
    Some((lo, end, has_hole))
}

pub(crate) fn exchange_write<F: FileBackend, C: Comm>(
    file: &mut ParallelFile<F>,
    comm: &C,
    layout: &MemLayout,
    buf: &[u8],
    my: &MyRequests,
    others: &OthersRequests,
) -> Result<()> {
    let nprocs = comm.size();
    let bufsize = file.hints.cb_buffer_size as i64;

    let span = aggregate_span(others);
    let ntimes = rounds_needed(span, bufsize);
    let global = comm.allreduce_max_i64(ntimes)?;
    if global == 0 {
        return Ok(());
    }
    log::debug!(
        "collective write: {global} global rounds ({ntimes} local), window {bufsize} bytes"
    );

    let (dmin, _dmax) = span.unwrap_or((0, -1));
    let mut stage = vec![0u8; file.hints.cb_buffer_size];

    let mut frag_ptr = vec![0usize; nprocs];
    let mut frag_within = vec![0i64; nprocs];
    let naggs = my.frags.len();
    let mut send_ptr = vec![0usize; naggs];
    let mut send_within = vec![0i64; naggs];

    // A write failure is detected after its round's exchange has
    // already completed, so the flag travels in the next round's size
    // exchange. A failure in the final round stays local.
    let mut failed: Option<Error> = None;

    for r in 0..global {
        let wstart = dmin + r * bufsize;

        // Which fragment pieces of each origin land in this window; the
        // sizes double as this round's expected receive counts.
        let mut pieces: Vec<Vec<(i64, i64)>> = vec![Vec::new(); nprocs];
        let mut recv_size = vec![0i64; nprocs];
        if r < ntimes {
            for o in 0..nprocs {
                let frags = &others.frags[o];
                while frag_ptr[o] < frags.len() {
                    let f = frags[frag_ptr[o]];
                    let start = f.file_off + frag_within[o];
                    if start >= wstart + bufsize {
                        break;
                    }
                    let take = (f.len - frag_within[o]).min(wstart + bufsize - start);
                    pieces[o].push((start - wstart, take));
                    recv_size[o] += take;
                    frag_within[o] += take;
                    if frag_within[o] < f.len {
                        break;
                    }
                    frag_ptr[o] += 1;
                    frag_within[o] = 0;
                }
            }
        }

        let size_out = if failed.is_some() {
            vec![-1i64; nprocs]
        } else {
            recv_size.clone()
        };
        let peer_size = comm.alltoall_i64(&size_out)?;
        if let Some(e) = failed {
            return Err(e);
        }
        if peer_size.iter().any(|&s| s < 0) {
            return Err(Error::PeerFailure);
        }

        // Gather this round's outgoing bytes from the user buffer. The
        // per-aggregator byte counts were announced by the aggregators
        // themselves, keeping both sides of each stream in step.
        let send_counts: Vec<usize> = peer_size.iter().map(|&s| s as usize).collect();
        let mut send_data = Vec::with_capacity(send_counts.iter().sum());
        for a in 0..nprocs {
            let mut n = send_counts[a];
            while n > 0 {
                let f = my.frags[a][send_ptr[a]];
                let take = ((f.len - send_within[a]) as usize).min(n);
                let at = send_data.len();
                send_data.resize(at + take, 0);
                layout.gather(
                    buf,
                    f.linear_off + send_within[a],
                    &mut send_data[at..at + take],
                );
                n -= take;
                send_within[a] += take as i64;
                if send_within[a] == f.len {
                    send_ptr[a] += 1;
                    send_within[a] = 0;
                }
            }
        }

        let recv_counts: Vec<usize> = recv_size.iter().map(|&s| s as usize).collect();
        let recv_data = comm.alltoallv_bytes(&send_data, &send_counts, &recv_counts)?;

        let Some((lo, hi, has_hole)) = coverage(&pieces) else {
            continue;
        };

        if has_hole {
            // Gaps between incoming fragments keep their current file
            // contents, so the covered span is read before overlay.
            stage[lo as usize..hi as usize].fill(0);
            if let Err(e) = file
                .backend
                .read_contig(wstart + lo, &mut stage[lo as usize..hi as usize])
            {
                failed = Some(e);
                continue;
            }
        }

        let mut pos = 0usize;
        for list in &pieces {
            for &(soff, len) in list {
                stage[soff as usize..(soff + len) as usize]
                    .copy_from_slice(&recv_data[pos..pos + len as usize]);
                pos += len as usize;
            }
        }

        if let Err(e) = file
            .backend
            .write_contig(wstart + lo, &stage[lo as usize..hi as usize])
        {
            failed = Some(e);
        }
    }

    match failed {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
