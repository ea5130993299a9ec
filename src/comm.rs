//! Communication substrate.
//!
//! The engine drives a small collective interface: allgather and
//! all-to-all of counts, all-to-allv of counts and raw bytes, a max
//! all-reduce and a barrier. [`local::LocalComm`] runs a communicator of
//! thread-backed ranks inside one process (the testing substrate); with
//! the `mpi` feature, [`MpiComm`] maps the same interface onto rsmpi
//! collectives.
//!
//! Every collective performs exactly one logically matched operation per
//! rank pair, so rounds are totally ordered per pair: round `N`'s
//! exchange completes on every rank before round `N + 1` begins, which is
//! the invariant the staging-buffer reuse depends on.

pub mod local;
#[cfg(feature = "mpi")]
pub mod mpi;

pub use local::LocalComm;
#[cfg(feature = "mpi")]
pub use mpi::MpiComm;

use crate::error::Result;

/// Collective operations over a fixed group of ranks.
pub trait Comm {
    /// This rank's index.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Gather `send` from every rank; the result concatenates each
    /// rank's contribution in rank order. All contributions must have
    /// the same length.
    fn allgather_i64(&self, send: &[i64]) -> Result<Vec<i64>>;

    /// Exchange one value with every rank: `send[p]` goes to rank `p`,
    /// the result holds the value each rank sent to this one.
    fn alltoall_i64(&self, send: &[i64]) -> Result<Vec<i64>>;

    /// Variable-count exchange of words. `send` is partitioned by
    /// `send_counts` in rank order; the result concatenates the pieces
    /// received from each rank, whose lengths must match `recv_counts`.
    fn alltoallv_i64(
        &self,
        send: &[i64],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<i64>>;

    /// Variable-count exchange of raw bytes, as [`Comm::alltoallv_i64`].
    fn alltoallv_bytes(
        &self,
        send: &[u8],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<u8>>;

    /// Maximum of `value` over all ranks.
    fn allreduce_max_i64(&self, value: i64) -> Result<i64>;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<()>;
}
