//! MPI-backed communicator over rsmpi collectives.

use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::traits::{Communicator, CommunicatorCollectives};
use mpi::Count;

use crate::comm::Comm;
use crate::error::Result;

/// [`Comm`] implementation over an MPI communicator. rsmpi's default
/// error policy aborts on failure, so these calls do not surface
/// communication errors through `Result`.
pub struct MpiComm<'c, C: Communicator> {
    comm: &'c C,
}

impl<'c, C: Communicator> MpiComm<'c, C> {
    /// Wrap an MPI communicator.
    pub fn new(comm: &'c C) -> Self {
        Self { comm }
    }
}

fn displs_of(counts: &[Count]) -> Vec<Count> {
    let mut displs = Vec::with_capacity(counts.len());
    let mut acc = 0;
    for &c in counts {
        displs.push(acc);
        acc += c;
    }
    displs
}

impl<'c, C: Communicator> Comm for MpiComm<'c, C> {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn allgather_i64(&self, send: &[i64]) -> Result<Vec<i64>> {
        let mut out = vec![0i64; self.size() * send.len()];
        self.comm.all_gather_into(send, &mut out[..]);
        Ok(out)
    }

    fn alltoall_i64(&self, send: &[i64]) -> Result<Vec<i64>> {
        let mut out = vec![0i64; self.size()];
        self.comm.all_to_all_into(send, &mut out[..]);
        Ok(out)
    }

    fn alltoallv_i64(
        &self,
        send: &[i64],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<i64>> {
        let send_counts: Vec<Count> = send_counts.iter().map(|&c| c as Count).collect();
        let recv_counts: Vec<Count> = recv_counts.iter().map(|&c| c as Count).collect();
        let send_displs = displs_of(&send_counts);
        let recv_displs = displs_of(&recv_counts);
        let mut out = vec![0i64; recv_counts.iter().sum::<Count>() as usize];
        let send_part = Partition::new(send, send_counts, send_displs);
        let mut recv_part = PartitionMut::new(&mut out[..], recv_counts, recv_displs);
        self.comm
            .all_to_all_varcount_into(&send_part, &mut recv_part);
        Ok(out)
    }

    fn alltoallv_bytes(
        &self,
        send: &[u8],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<u8>> {
        let send_counts: Vec<Count> = send_counts.iter().map(|&c| c as Count).collect();
        let recv_counts: Vec<Count> = recv_counts.iter().map(|&c| c as Count).collect();
        let send_displs = displs_of(&send_counts);
        let recv_displs = displs_of(&recv_counts);
        let mut out = vec![0u8; recv_counts.iter().sum::<Count>() as usize];
        let send_part = Partition::new(send, send_counts, send_displs);
        let mut recv_part = PartitionMut::new(&mut out[..], recv_counts, recv_displs);
        self.comm
            .all_to_all_varcount_into(&send_part, &mut recv_part);
        Ok(out)
    }

    fn allreduce_max_i64(&self, value: i64) -> Result<i64> {
        let mut out = 0i64;
        self.comm
            .all_reduce_into(&value, &mut out, SystemOperation::max());
        Ok(out)
    }

    fn barrier(&self) -> Result<()> {
        self.comm.barrier();
        Ok(())
    }
}
