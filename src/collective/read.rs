//! Read side of the two-phase exchange.
//!
//! Per round, an aggregator reads its window of the file into the
//! staging buffer, tells every origin how many of its bytes the window
//! holds, and ships the fragments out in one variable-count exchange;
//! origins scatter what they receive through the memory layout. Every
//! rank executes the globally maximal round count so that pure
//! receivers stay in lock-step, exchanging zero sizes when idle.

use crate::backend::FileBackend;
use crate::collective::{aggregate_span, rounds_needed};
use crate::comm::Comm;
use crate::datatype::MemLayout;
use crate::error::{Error, Result};
use crate::file::ParallelFile;
use crate::router::{MyRequests, OthersRequests};

pub(crate) fn exchange_read<F: FileBackend, C: Comm>(
    file: &mut ParallelFile<F>,
    comm: &C,
    layout: &MemLayout,
    buf: &mut [u8],
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
        "collective read: {global} global rounds ({ntimes} local), window {bufsize} bytes"
    );

    let (dmin, dmax) = span.unwrap_or((0, -1));
    let mut stage = vec![0u8; file.hints.cb_buffer_size];

    // Aggregator-side progress through each origin's fragment list; a
    // fragment can straddle a round boundary, so the partial position
    // carries across rounds.
    let mut frag_ptr = vec![0usize; nprocs];
    let mut frag_within = vec![0i64; nprocs];
    // Origin-side progress through this rank's own per-aggregator
    // fragment streams.
    let naggs = my.frags.len();
    let mut recv_ptr = vec![0usize; naggs];
    let mut recv_within = vec![0i64; naggs];

    let mut failed: Option<Error> = None;

    for r in 0..global {
        let wstart = dmin + r * bufsize;
        let wlen = if r < ntimes {
            bufsize.min(dmax + 1 - wstart)
        } else {
            0
        };

        // Which fragment pieces of each origin fall in this window.
        let mut pieces: Vec<Vec<(i64, i64)>> = vec![Vec::new(); nprocs];
        let mut send_size = vec![0i64; nprocs];
        if wlen > 0 && failed.is_none() {
            for o in 0..nprocs {
                let frags = &others.frags[o];
                while frag_ptr[o] < frags.len() {
                    let f = frags[frag_ptr[o]];
                    let start = f.file_off + frag_within[o];
                    if start >= wstart + wlen {
                        break;
                    }
                    let take = (f.len - frag_within[o]).min(wstart + wlen - start);
                    pieces[o].push((start - wstart, take));
                    send_size[o] += take;
                    frag_within[o] += take;
                    if frag_within[o] < f.len {
                        // Remainder belongs to the next round's window.
                        break;
                    }
                    frag_ptr[o] += 1;
                    frag_within[o] = 0;
                }
            }

            // The window is read whole: fragments from different origins
            // interleave within it, so partial reads would not help.
            stage[..wlen as usize].fill(0);
            if let Err(e) = file.backend.read_contig(wstart, &mut stage[..wlen as usize]) {
                failed = Some(e);
            }
        }
        if failed.is_some() {
            send_size.iter_mut().for_each(|s| *s = -1);
        }

        // Size exchange; a negative size is the failure flag that lets
        // every rank abandon the call at the same point.
        let recv_size = comm.alltoall_i64(&send_size)?;
        if let Some(e) = failed {
            return Err(e);
        }
        if recv_size.iter().any(|&s| s < 0) {
            return Err(Error::PeerFailure);
        }

        // Gather this round's outgoing bytes straight from the staging
        // buffer, in origin order.
        let send_counts: Vec<usize> = send_size.iter().map(|&s| s as usize).collect();
        let mut send_data = Vec::with_capacity(send_counts.iter().sum());
        for list in &pieces {
            for &(soff, len) in list {
                send_data.extend_from_slice(&stage[soff as usize..(soff + len) as usize]);
            }
        }

        let recv_counts: Vec<usize> = recv_size.iter().map(|&s| s as usize).collect();
        let recv_data = comm.alltoallv_bytes(&send_data, &send_counts, &recv_counts)?;

        // Scatter received bytes into the user buffer by walking this
        // rank's fragment stream for each aggregator.
        let mut pos = 0usize;
        for a in 0..nprocs {
            let mut n = recv_counts[a];
            while n > 0 {
                let f = my.frags[a][recv_ptr[a]];
                let take = ((f.len - recv_within[a]) as usize).min(n);
                layout.scatter(
                    buf,
                    f.linear_off + recv_within[a],
                    &recv_data[pos..pos + take],
                );
                pos += take;
                n -= take;
                recv_within[a] += take as i64;
                if recv_within[a] == f.len {
                    recv_ptr[a] += 1;
                    recv_within[a] = 0;
                }
            }
        }
    }
    Ok(())
}
