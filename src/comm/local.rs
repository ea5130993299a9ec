//! In-process communicator: one rank per thread, one FIFO channel per
//! ordered rank pair.
//!
//! Sends are buffered (never block); receives block until the matching
//! send arrives. Because every collective posts exactly one message per
//! pair and channels are FIFO, no tags are needed: message `k` on a pair
//! always belongs to the `k`-th collective both ranks executed.

use std::sync::mpsc::{channel, Receiver, Sender};

use crate::comm::Comm;
use crate::error::{Error, Result};

enum Packet {
    Words(Vec<i64>),
    Bytes(Vec<u8>),
}

/// One rank's endpoint of an in-process communicator.
pub struct LocalComm {
    rank: usize,
    size: usize,
    /// `senders[d]`: channel from this rank to rank `d`.
    senders: Vec<Sender<Packet>>,
    /// `receivers[s]`: channel from rank `s` to this rank.
    receivers: Vec<Receiver<Packet>>,
}

impl LocalComm {
    /// Create a communicator of `size` ranks; endpoint `r` of the result
    /// is moved to the thread acting as rank `r`.
    pub fn create(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "communicator must have at least one rank");
        // senders_by_src[s][d] / receivers_by_dst[d][s].
        let mut senders_by_src: Vec<Vec<Sender<Packet>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers_by_dst: Vec<Vec<Receiver<Packet>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        for s in 0..size {
            for d in 0..size {
                let (tx, rx) = channel();
                senders_by_src[s].push(tx);
                receivers_by_dst[d].push(rx);
            }
        }
        // receivers_by_dst[d] was filled in s-major order already.
        senders_by_src
            .into_iter()
            .zip(receivers_by_dst)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalComm {
                rank,
                size,
                senders,
                receivers,
            })
            .collect()
    }

    fn post(&self, dest: usize, packet: Packet) -> Result<()> {
        self.senders[dest]
            .send(packet)
            .map_err(|_| Error::Comm(format!("rank {dest} is gone")))
    }

    fn take_words(&self, src: usize) -> Result<Vec<i64>> {
        match self.receivers[src].recv() {
            Ok(Packet::Words(w)) => Ok(w),
            Ok(Packet::Bytes(_)) => Err(Error::Comm(format!(
                "rank {src} sent bytes where counts were expected"
            ))),
            Err(_) => Err(Error::Comm(format!("rank {src} disconnected"))),
        }
    }

    fn take_bytes(&self, src: usize) -> Result<Vec<u8>> {
        match self.receivers[src].recv() {
            Ok(Packet::Bytes(b)) => Ok(b),
            Ok(Packet::Words(_)) => Err(Error::Comm(format!(
                "rank {src} sent counts where bytes were expected"
            ))),
            Err(_) => Err(Error::Comm(format!("rank {src} disconnected"))),
        }
    }
}

impl Comm for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn allgather_i64(&self, send: &[i64]) -> Result<Vec<i64>> {
        for d in 0..self.size {
            self.post(d, Packet::Words(send.to_vec()))?;
        }
        let mut out = Vec::with_capacity(self.size * send.len());
        for s in 0..self.size {
            out.extend(self.take_words(s)?);
        }
        Ok(out)
    }

    fn alltoall_i64(&self, send: &[i64]) -> Result<Vec<i64>> {
        assert_eq!(send.len(), self.size);
        for (d, &v) in send.iter().enumerate() {
            self.post(d, Packet::Words(vec![v]))?;
        }
        let mut out = Vec::with_capacity(self.size);
        for s in 0..self.size {
            let w = self.take_words(s)?;
            out.push(w[0]);
        }
        Ok(out)
    }

    fn alltoallv_i64(
        &self,
        send: &[i64],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<i64>> {
        let mut pos = 0;
        for (d, &n) in send_counts.iter().enumerate() {
            self.post(d, Packet::Words(send[pos..pos + n].to_vec()))?;
            pos += n;
        }
        let mut out = Vec::with_capacity(recv_counts.iter().sum());
        for (s, &n) in recv_counts.iter().enumerate() {
            let w = self.take_words(s)?;
            if w.len() != n {
                return Err(Error::Comm(format!(
                    "rank {s} sent {} words, expected {n}",
                    w.len()
                )));
            }
            out.extend(w);
        }
        Ok(out)
    }

    fn alltoallv_bytes(
        &self,
        send: &[u8],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<u8>> {
        let mut pos = 0;
        for (d, &n) in send_counts.iter().enumerate() {
            self.post(d, Packet::Bytes(send[pos..pos + n].to_vec()))?;
            pos += n;
        }
        let mut out = Vec::with_capacity(recv_counts.iter().sum());
        for (s, &n) in recv_counts.iter().enumerate() {
            let b = self.take_bytes(s)?;
            if b.len() != n {
                return Err(Error::Comm(format!(
                    "rank {s} sent {} bytes, expected {n}",
                    b.len()
                )));
            }
            out.extend(b);
        }
        Ok(out)
    }

    fn allreduce_max_i64(&self, value: i64) -> Result<i64> {
        let all = self.allgather_i64(&[value])?;
        Ok(all.into_iter().fold(i64::MIN, i64::max))
    }

    fn barrier(&self) -> Result<()> {
        self.allgather_i64(&[])?;
        Ok(())
    }
}
