//! Multi-rank exercises of the two-phase engine: one thread per rank
//! over an in-process communicator and a shared in-memory file.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use twophase::access::AccessMode;
use twophase::backend::SharedMemFile;
use twophase::comm::{Comm, LocalComm};
use twophase::datatype::Datatype;
use twophase::error::Error;
use twophase::hints::{CollectiveMode, Hints};
use twophase::ParallelFile;

fn run_ranks<F>(n: usize, f: F)
where
    F: Fn(LocalComm) + Send + Sync + Copy,
{
    let comms = LocalComm::create(n);
    std::thread::scope(|scope| {
        for comm in comms {
            scope.spawn(move || f(comm));
        }
    });
}

/// `data` bytes at the head of every `tile` bytes.
fn head_of_tile(data: usize, tile: i64) -> Datatype {
    Datatype::structured(&[1, 1], &[0, tile], vec![Datatype::bytes(data), Datatype::bytes(0)])
        .unwrap()
}

#[test]
fn partitioned_write_lands_every_rank_block() {
    // Four ranks each write 1000 contiguous bytes; two aggregators with a
    // 1500-byte staging buffer split the 4000-byte span into two domains
    // and drain each in two rounds.
    let shared = SharedMemFile::new();
    let s = &shared;
    run_ranks(4, move |comm| {
        let hints = Hints {
            cb_nodes: Some(2),
            cb_buffer_size: 1500,
            cb_write: CollectiveMode::Enable,
            ..Default::default()
        };
        let mut f = ParallelFile::new(s.clone(), hints).unwrap();
        let r = comm.rank();
        let buf = vec![r as u8 + 1; 1000];
        let n = f
            .write_collective(
                &comm,
                &buf,
                1000,
                &Datatype::bytes(1),
                AccessMode::Explicit(r as i64 * 1000),
            )
            .unwrap();
        assert_eq!(n, 1000);
    });
    let data = shared.contents();
    assert_eq!(data.len(), 4000);
    for r in 0..4 {
        assert!(data[r * 1000..(r + 1) * 1000].iter().all(|&b| b == r as u8 + 1));
    }
    // Gapless windows: two writes per aggregator, no read-modify-write.
    assert_eq!(shared.read_count(), 0);
    assert_eq!(shared.write_count(), 4);
}

#[test]
fn interleaved_read_uses_one_file_access() {
    // Two ranks own alternating 100-byte blocks of an 800-byte file. A
    // single aggregator serves both from one contiguous read.
    let pattern: Vec<u8> = (0..800).map(|i| (i % 251) as u8).collect();
    let shared = SharedMemFile::with_data(pattern.clone());
    let s = &shared;
    let p = &pattern;
    run_ranks(2, move |comm| {
        let hints = Hints {
            cb_nodes: Some(1),
            ..Default::default()
        };
        let mut f = ParallelFile::new(s.clone(), hints).unwrap();
        let r = comm.rank();
        f.set_view(r as i64 * 100, head_of_tile(100, 200)).unwrap();
        let mut buf = vec![0u8; 400];
        let n = f
            .read_collective(&comm, &mut buf, 400, &Datatype::bytes(1), AccessMode::Individual)
            .unwrap();
        assert_eq!(n, 400);
        for blk in 0..4 {
            let file_off = r * 100 + blk * 200;
            assert_eq!(&buf[blk * 100..(blk + 1) * 100], &p[file_off..file_off + 100]);
        }
    });
    assert_eq!(shared.read_count(), 1);
}

#[test]
fn sparse_write_reads_back_the_gaps() {
    let shared = SharedMemFile::with_data(vec![0xAA; 400]);
    let s = &shared;
    run_ranks(2, move |comm| {
        let hints = Hints {
            cb_nodes: Some(1),
            cb_write: CollectiveMode::Enable,
            ..Default::default()
        };
        let mut f = ParallelFile::new(s.clone(), hints).unwrap();
        let r = comm.rank();
        let buf = vec![r as u8 + 1; 50];
        f.write_collective(
            &comm,
            &buf,
            50,
            &Datatype::bytes(1),
            AccessMode::Explicit(r as i64 * 200),
        )
        .unwrap();
    });
    let data = shared.contents();
    assert!(data[0..50].iter().all(|&b| b == 1));
    assert!(data[200..250].iter().all(|&b| b == 2));
    // The hole between the two pieces forced a pre-read and kept its
    // contents.
    assert!(shared.read_count() > 0);
    assert!(data[50..200].iter().all(|&b| b == 0xAA));
    assert!(data[250..400].iter().all(|&b| b == 0xAA));
}

#[test]
fn write_then_read_round_trip_across_buffer_sizes() {
    // Three ranks tile the file byte-by-byte. The staging buffer size
    // changes the round count but must never change the bytes.
    let mut rng = StdRng::seed_from_u64(0x2f5e);
    let n_tiles = 500usize;
    let payload: Vec<Vec<u8>> = (0..3)
        .map(|_| (0..n_tiles).map(|_| rng.gen()).collect())
        .collect();

    let mut outcomes = Vec::new();
    for (bufsize, naggs) in [(64, 2), (1000, 3), (4 * 1024 * 1024, 1)] {
        let shared = SharedMemFile::new();
        let s = &shared;
        let pl = &payload;
        run_ranks(3, move |comm| {
            let hints = Hints {
                cb_nodes: Some(naggs),
                cb_buffer_size: bufsize,
                cb_write: CollectiveMode::Enable,
                cb_read: CollectiveMode::Enable,
                ..Default::default()
            };
            let mut f = ParallelFile::new(s.clone(), hints).unwrap();
            let r = comm.rank();
            f.set_view(r as i64, head_of_tile(1, 3)).unwrap();
            let n = f
                .write_collective(
                    &comm,
                    &pl[r],
                    n_tiles,
                    &Datatype::bytes(1),
                    AccessMode::Individual,
                )
                .unwrap();
            assert_eq!(n, n_tiles as i64);

            let mut back = vec![0u8; n_tiles];
            let n = f
                .read_collective(
                    &comm,
                    &mut back,
                    n_tiles,
                    &Datatype::bytes(1),
                    AccessMode::Explicit(0),
                )
                .unwrap();
            assert_eq!(n, n_tiles as i64);
            assert_eq!(back, pl[r]);
        });
        outcomes.push(shared.contents());
    }
    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(outcomes[1], outcomes[2]);
    for (r, p) in payload.iter().enumerate() {
        for (i, &b) in p.iter().enumerate() {
            assert_eq!(outcomes[0][i * 3 + r], b, "rank {r} byte {i}");
        }
    }
}

#[test]
fn automatic_mode_aggregates_interleaved_writes() {
    let shared = SharedMemFile::new();
    let s = &shared;
    run_ranks(2, move |comm| {
        let hints = Hints {
            cb_nodes: Some(1),
            ..Default::default()
        };
        let mut f = ParallelFile::new(s.clone(), hints).unwrap();
        let r = comm.rank();
        f.set_view(r as i64 * 4, head_of_tile(4, 8)).unwrap();
        let buf = vec![r as u8 + 1; 64];
        f.write_collective(&comm, &buf, 64, &Datatype::bytes(1), AccessMode::Individual)
            .unwrap();
    });
    // One aggregator, one round, a gapless window: a single file write
    // proves the two-phase path ran, and the covered window needs no
    // read-modify-write.
    assert_eq!(shared.write_count(), 1);
    assert_eq!(shared.read_count(), 0);
    let data = shared.contents();
    for (i, &b) in data.iter().enumerate() {
        assert_eq!(b, (i / 4 % 2) as u8 + 1);
    }
}

#[test]
fn disabled_mode_falls_back_to_independent() {
    let shared = SharedMemFile::new();
    let s = &shared;
    run_ranks(2, move |comm| {
        let hints = Hints {
            cb_write: CollectiveMode::Disable,
            ..Default::default()
        };
        let mut f = ParallelFile::new(s.clone(), hints).unwrap();
        let r = comm.rank();
        let buf = vec![r as u8 + 1; 100];
        let n = f
            .write_collective(
                &comm,
                &buf,
                100,
                &Datatype::bytes(1),
                AccessMode::Explicit(r as i64 * 100),
            )
            .unwrap();
        assert_eq!(n, 100);
    });
    let data = shared.contents();
    assert!(data[..100].iter().all(|&b| b == 1));
    assert!(data[100..].iter().all(|&b| b == 2));
    // Each rank issued its own write.
    assert_eq!(shared.write_count(), 2);
}

#[test]
fn zero_size_rank_stays_in_lock_step() {
    let shared = SharedMemFile::new();
    let s = &shared;
    run_ranks(3, move |comm| {
        let hints = Hints {
            cb_nodes: Some(2),
            cb_buffer_size: 128,
            cb_write: CollectiveMode::Enable,
            ..Default::default()
        };
        let mut f = ParallelFile::new(s.clone(), hints).unwrap();
        let r = comm.rank();
        if r == 2 {
            let n = f
                .write_collective(&comm, &[], 0, &Datatype::bytes(1), AccessMode::Individual)
                .unwrap();
            assert_eq!(n, 0);
        } else {
            let buf = vec![r as u8 + 1; 300];
            let n = f
                .write_collective(
                    &comm,
                    &buf,
                    300,
                    &Datatype::bytes(1),
                    AccessMode::Explicit(r as i64 * 300),
                )
                .unwrap();
            assert_eq!(n, 300);
        }
    });
    assert_eq!(shared.contents().len(), 600);
}

#[test]
fn collective_read_past_end_yields_zeros() {
    let shared = SharedMemFile::with_data(vec![7u8; 100]);
    let s = &shared;
    run_ranks(2, move |comm| {
        let hints = Hints {
            cb_nodes: Some(1),
            cb_read: CollectiveMode::Enable,
            ..Default::default()
        };
        let mut f = ParallelFile::new(s.clone(), hints).unwrap();
        let r = comm.rank();
        let mut buf = vec![0xFFu8; 80];
        f.read_collective(
            &comm,
            &mut buf,
            80,
            &Datatype::bytes(1),
            AccessMode::Explicit(r as i64 * 80),
        )
        .unwrap();
        if r == 0 {
            assert!(buf.iter().all(|&b| b == 7));
        } else {
            assert!(buf[..20].iter().all(|&b| b == 7));
            assert!(buf[20..].iter().all(|&b| b == 0));
        }
    });
}

#[test]
fn strided_memory_type_through_the_exchange() {
    // The user buffer holds 2 data bytes per 4-byte slot on both sides
    // of the exchange.
    let shared = SharedMemFile::new();
    let s = &shared;
    let mt = |n: usize| {
        Datatype::structured(&[1, 1], &[0, 4], vec![Datatype::bytes(2), Datatype::bytes(0)])
            .map(|t| (t, n))
            .unwrap()
    };
    run_ranks(2, move |comm| {
        let hints = Hints {
            cb_nodes: Some(1),
            cb_write: CollectiveMode::Enable,
            cb_read: CollectiveMode::Enable,
            ..Default::default()
        };
        let mut f = ParallelFile::new(s.clone(), hints).unwrap();
        let r = comm.rank();
        let (t, count) = mt(8);
        // Data bytes r*10.. in the used slots, 0xCC in the holes.
        let mut buf = vec![0xCCu8; 32];
        for i in 0..16 {
            buf[i / 2 * 4 + i % 2] = (r * 100 + i) as u8;
        }
        f.write_collective(&comm, &buf, count, &t, AccessMode::Explicit(r as i64 * 16))
            .unwrap();

        let mut back = vec![0u8; 32];
        let n = f
            .read_collective(&comm, &mut back, count, &t, AccessMode::Explicit(r as i64 * 16))
            .unwrap();
        assert_eq!(n, 16);
        for i in 0..16 {
            assert_eq!(back[i / 2 * 4 + i % 2], (r * 100 + i) as u8);
        }
    });
    let data = shared.contents();
    for i in 0..16 {
        assert_eq!(data[i], i as u8);
        assert_eq!(data[16 + i], (100 + i) as u8);
    }
}

#[test]
fn aggregator_read_failure_reaches_every_rank() {
    let shared = SharedMemFile::with_data(vec![1u8; 400]);
    let s = &shared;
    run_ranks(2, move |comm| {
        let hints = Hints {
            cb_nodes: Some(1),
            cb_read: CollectiveMode::Enable,
            ..Default::default()
        };
        let r = comm.rank();
        let backend = if r == 0 {
            s.clone().fail_reads()
        } else {
            s.clone()
        };
        let mut f = ParallelFile::new(backend, hints).unwrap();
        let mut buf = vec![0u8; 200];
        let err = f
            .read_collective(
                &comm,
                &mut buf,
                200,
                &Datatype::bytes(1),
                AccessMode::Explicit(r as i64 * 200),
            )
            .unwrap_err();
        if r == 0 {
            assert!(matches!(err, Error::Io { .. }));
        } else {
            assert!(matches!(err, Error::PeerFailure));
        }
    });
}

#[test]
fn final_round_write_failure_is_local() {
    let shared = SharedMemFile::new();
    let s = &shared;
    run_ranks(2, move |comm| {
        // Default buffer: a single round, so the failure has no later
        // size exchange to travel in.
        let hints = Hints {
            cb_nodes: Some(1),
            cb_write: CollectiveMode::Enable,
            ..Default::default()
        };
        let r = comm.rank();
        let backend = if r == 0 {
            s.clone().fail_writes()
        } else {
            s.clone()
        };
        let mut f = ParallelFile::new(backend, hints).unwrap();
        let buf = vec![3u8; 100];
        let res = f.write_collective(
            &comm,
            &buf,
            100,
            &Datatype::bytes(1),
            AccessMode::Explicit(r as i64 * 100),
        );
        if r == 0 {
            assert!(matches!(res, Err(Error::Io { .. })));
        } else {
            assert_eq!(res.unwrap(), 100);
        }
    });
}

#[test]
fn earlier_round_write_failure_reaches_every_rank() {
    let shared = SharedMemFile::new();
    let s = &shared;
    run_ranks(2, move |comm| {
        // A 64-byte buffer forces several rounds; the round-one failure
        // rides the next size exchange.
        let hints = Hints {
            cb_nodes: Some(1),
            cb_buffer_size: 64,
            cb_write: CollectiveMode::Enable,
            ..Default::default()
        };
        let r = comm.rank();
        let backend = if r == 0 {
            s.clone().fail_writes()
        } else {
            s.clone()
        };
        let mut f = ParallelFile::new(backend, hints).unwrap();
        let buf = vec![3u8; 200];
        let err = f
            .write_collective(
                &comm,
                &buf,
                200,
                &Datatype::bytes(1),
                AccessMode::Explicit(r as i64 * 200),
            )
            .unwrap_err();
        if r == 0 {
            assert!(matches!(err, Error::Io { .. }));
        } else {
            assert!(matches!(err, Error::PeerFailure));
        }
    });
}
