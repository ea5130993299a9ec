//! Request routing: which bytes of whose request land in which file
//! domain.
//!
//! Each rank splits its access chunks at domain boundaries into
//! fragments, grouped by owning aggregator (`my requests`). A count
//! all-to-all followed by an all-to-allv of the offset/length arrays
//! gives every aggregator the inverse table: which fragments, from which
//! ranks, fall in its domain (`others' requests`).

use itertools::Itertools;

use crate::access::AccessList;
use crate::comm::Comm;
use crate::domain::DomainTable;
use crate::error::Result;
use crate::types::Fragment;

/// Find the aggregator whose domain contains `offset` and clamp `*len`
/// to the bytes remaining in that domain. The caller re-invokes with the
/// advanced offset for the remainder; this is the domain-splitting
/// mechanism.
///
/// Panics if the computed index falls outside the domain table: that is
/// an internal invariant violation, not a user error.
pub fn locate_aggregator(offset: i64, len: &mut i64, table: &DomainTable) -> usize {
    // Ceiling-division index into the equal-size domains.
    let idx = ((offset - table.min_offset + table.domain_size) / table.domain_size - 1) as usize;
    assert!(
        idx < table.domains.len(),
        "offset {offset} maps to aggregator {idx} of {}",
        table.domains.len()
    );
    let domain = table.domains[idx];
    assert!(
        offset >= domain.start && offset <= domain.end,
        "offset {offset} outside computed domain [{}, {}]",
        domain.start,
        domain.end
    );
    let avail = domain.end - offset + 1;
    if *len > avail {
        *len = avail;
    }
    idx
}

/// This rank's fragments, grouped by owning aggregator.
#[derive(Clone, Debug, Default)]
pub struct MyRequests {
    /// `frags[a]`: fragments owned by aggregator `a`, in file offset
    /// (equivalently request) order.
    pub frags: Vec<Vec<Fragment>>,
    /// Total bytes destined for each aggregator.
    pub bytes: Vec<i64>,
}

/// Fragments other ranks routed to this aggregator, grouped by origin
/// rank. Empty on non-aggregator ranks.
#[derive(Clone, Debug, Default)]
pub struct OthersRequests {
    /// `frags[o]`: fragments from origin rank `o`, in that rank's
    /// request order.
    pub frags: Vec<Vec<Fragment>>,
    /// Total bytes expected from each origin.
    pub bytes: Vec<i64>,
}

/// Split this rank's access chunks at domain boundaries. Two passes:
/// counts first to size the per-aggregator arrays exactly, then fill.
pub fn calc_my_requests(acc: &AccessList, table: &DomainTable) -> MyRequests {
    let naggs = table.domains.len();
    let mut counts = vec![0usize; naggs];
    for chunk in &acc.chunks {
        let mut off = chunk.file_off;
        let mut rem = chunk.len;
        while rem > 0 {
            let mut take = rem;
            let a = locate_aggregator(off, &mut take, table);
            counts[a] += 1;
            off += take;
            rem -= take;
        }
    }

    let mut frags: Vec<Vec<Fragment>> = counts.iter().map(|&c| Vec::with_capacity(c)).collect();
    let mut bytes = vec![0i64; naggs];
    for chunk in &acc.chunks {
        let mut off = chunk.file_off;
        let mut linear = chunk.linear_off;
        let mut rem = chunk.len;
        while rem > 0 {
            let mut take = rem;
            let a = locate_aggregator(off, &mut take, table);
            frags[a].push(Fragment {
                file_off: off,
                len: take,
                linear_off: linear,
            });
            bytes[a] += take;
            off += take;
            linear += take;
            rem -= take;
        }
    }
    MyRequests { frags, bytes }
}

/// Collective inverse of [`calc_my_requests`]: every rank learns, per
/// origin, the fragments that fall in its own domain.
pub fn calc_others_requests<C: Comm>(comm: &C, my_req: &MyRequests) -> Result<OthersRequests> {
    let nprocs = comm.size();
    let naggs = my_req.frags.len();

    // Count exchange: how many fragments each rank routes to each
    // aggregator. Ranks beyond the aggregator set receive zeros.
    let mut send_counts = vec![0i64; nprocs];
    for (a, f) in my_req.frags.iter().enumerate() {
        send_counts[a] = f.len() as i64;
    }
    let recv_counts = comm.alltoall_i64(&send_counts)?;

    // Payload exchange: (offset, length) pairs, two words per fragment.
    let send_words: Vec<i64> = my_req
        .frags
        .iter()
        .flatten()
        .flat_map(|f| [f.file_off, f.len])
        .collect();
    let send_word_counts: Vec<usize> = (0..nprocs)
        .map(|p| if p < naggs { my_req.frags[p].len() * 2 } else { 0 })
        .collect();
    let recv_word_counts: Vec<usize> = recv_counts.iter().map(|&c| c as usize * 2).collect();
    let recv_words = comm.alltoallv_i64(&send_words, &send_word_counts, &recv_word_counts)?;

    let mut frags: Vec<Vec<Fragment>> = Vec::with_capacity(nprocs);
    let mut bytes = vec![0i64; nprocs];
    let mut words = recv_words.iter();
    for (origin, &count) in recv_counts.iter().enumerate() {
        let mut list = Vec::with_capacity(count as usize);
        for (&file_off, &len) in words.by_ref().take(count as usize * 2).tuples() {
            list.push(Fragment {
                file_off,
                len,
                linear_off: 0,
            });
            bytes[origin] += len;
        }
        frags.push(list);
    }
    Ok(OthersRequests { frags, bytes })
}
