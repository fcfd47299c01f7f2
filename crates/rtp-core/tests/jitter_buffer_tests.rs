//! End-to-end jitter buffer scenarios.

use bytes::Bytes;
use rtplane_rtp_core::{ErasureFrame, Ingest, JitterBuffer, JitterFrame};

/// A PCMU datagram with 160 payload samples.
fn pkt(seq: u16, ts: u32) -> Bytes {
    let mut buf = vec![0u8; 12 + 160];
    buf[0] = 0x80;
    buf[1] = 0;
    buf[2..4].copy_from_slice(&seq.to_be_bytes());
    buf[4..8].copy_from_slice(&ts.to_be_bytes());
    buf[8..12].copy_from_slice(&0xdead_beefu32.to_be_bytes());
    Bytes::from(buf)
}

fn ready_lseqs(out: &Ingest) -> Vec<u64> {
    out.ready
        .iter()
        .filter_map(|f| f.as_rtp().map(|p| p.lseq))
        .collect()
}

fn erasures(out: &Ingest) -> Vec<ErasureFrame> {
    out.ready.iter().filter_map(|f| f.as_erasure().copied()).collect()
}

#[test]
fn in_order_straight_through() {
    let mut jb = JitterBuffer::new(8);
    for (i, (seq, ts)) in [(100u16, 1000u32), (101, 1160), (102, 1320)].iter().enumerate() {
        let out = jb.udp_in(pkt(*seq, *ts)).unwrap();
        assert_eq!(ready_lseqs(&out), vec![100 + i as u64]);
        assert!(erasures(&out).is_empty());
        assert!(out.dropped.is_empty());
    }
    assert!(jb.is_empty());
}

#[test]
fn single_packet_gap_closes_from_the_front() {
    let mut jb = JitterBuffer::new(4);
    let out = jb.udp_in(pkt(100, 1000)).unwrap();
    assert_eq!(ready_lseqs(&out), vec![100]);

    let out = jb.udp_in(pkt(102, 1320)).unwrap();
    assert!(out.ready.is_empty());
    assert_eq!(jb.len(), 1);

    let out = jb.udp_in(pkt(101, 1160)).unwrap();
    assert_eq!(ready_lseqs(&out), vec![101, 102]);
    assert!(erasures(&out).is_empty());
    assert!(jb.is_empty());
}

#[test]
fn capacity_eviction_emits_erasure() {
    let mut jb = JitterBuffer::new(2);
    assert_eq!(ready_lseqs(&jb.udp_in(pkt(100, 1000)).unwrap()), vec![100]);
    assert!(jb.udp_in(pkt(102, 1320)).unwrap().ready.is_empty());

    let out = jb.udp_in(pkt(104, 1640)).unwrap();
    assert_eq!(
        erasures(&out),
        vec![ErasureFrame {
            lseq_start: 101,
            lseq_end: 101,
            ts_diff: 160
        }]
    );
    assert_eq!(ready_lseqs(&out), vec![102]);
    assert_eq!(jb.len(), 1, "104 stays buffered");
    assert!(out.dropped.is_empty());
}

#[test]
fn duplicate_and_late_are_dropped_and_counted() {
    let mut jb = JitterBuffer::new(4);
    assert_eq!(ready_lseqs(&jb.udp_in(pkt(100, 1000)).unwrap()), vec![100]);
    assert_eq!(ready_lseqs(&jb.udp_in(pkt(101, 1160)).unwrap()), vec![101]);

    let out = jb.udp_in(pkt(99, 840)).unwrap();
    assert!(out.ready.is_empty());
    assert_eq!(out.dropped.len(), 1);
    assert_eq!(jb.stats().late_dropped, 1);

    let out = jb.udp_in(pkt(101, 1160)).unwrap();
    assert!(out.ready.is_empty());
    assert_eq!(out.dropped.len(), 1);
    assert_eq!(jb.stats().dup_dropped, 1);
}

#[test]
fn sequence_wrap_extends_lseq() {
    let mut jb = JitterBuffer::new(4);
    assert_eq!(ready_lseqs(&jb.udp_in(pkt(65534, 1000)).unwrap()), vec![65534]);
    assert_eq!(ready_lseqs(&jb.udp_in(pkt(65535, 1160)).unwrap()), vec![65535]);

    let out = jb.udp_in(pkt(0, 1320)).unwrap();
    assert_eq!(ready_lseqs(&out), vec![0x10000]);
    assert_eq!(jb.stats().seq_wraps, 1);

    let out = jb.udp_in(pkt(1, 1480)).unwrap();
    assert_eq!(ready_lseqs(&out), vec![0x10001]);
}

#[test]
fn lseq_is_monotone_across_two_wraps() {
    let mut jb = JitterBuffer::new(4);
    let start: u64 = 65000;
    let end: u64 = start + 2 * 65536;
    let mut last: Option<u64> = None;
    for logical in start..=end {
        let seq = (logical % 65536) as u16;
        let ts = (logical as u32).wrapping_mul(160);
        let out = jb.udp_in(pkt(seq, ts)).unwrap();
        let ready = ready_lseqs(&out);
        assert_eq!(ready.len(), 1, "in-order feed emits every packet");
        assert_eq!(ready[0], logical, "64-bit extension is exact");
        if let Some(prev) = last {
            assert!(ready[0] > prev);
        }
        last = Some(ready[0]);
    }
    assert_eq!(jb.stats().seq_wraps, 2);
}

#[test]
fn post_wrap_straggler_is_folded_back() {
    let mut jb = JitterBuffer::new(8);
    // Walk up to just past a wrap.
    for logical in 65530u64..=65537 {
        jb.udp_in(pkt((logical % 65536) as u16, logical as u32 * 160))
            .unwrap();
    }
    assert_eq!(jb.stats().seq_wraps, 1);
    // A pre-wrap straggler arrives late: folded under the wrap, then
    // dropped as late rather than treated as a future sequence.
    let out = jb.udp_in(pkt(65533, 65533 * 160)).unwrap();
    assert!(out.ready.is_empty());
    assert_eq!(out.dropped.len(), 1);
    assert_eq!(jb.stats().late_dropped, 1);
}

#[test]
fn flush_splits_at_discontinuities() {
    let mut jb = JitterBuffer::new(16);
    assert_eq!(ready_lseqs(&jb.udp_in(pkt(100, 1000)).unwrap()), vec![100]);
    for (seq, ts) in [(102u16, 1320u32), (103, 1480), (106, 1960), (107, 2120)] {
        assert!(jb.udp_in(pkt(seq, ts)).unwrap().ready.is_empty());
    }
    assert_eq!(jb.len(), 4);

    let out = jb.flush();
    assert_eq!(
        erasures(&out),
        vec![ErasureFrame {
            lseq_start: 101,
            lseq_end: 101,
            ts_diff: (1320 - 1000) / 2
        }]
    );
    assert_eq!(ready_lseqs(&out), vec![102, 103]);
    let dropped: Vec<u64> = out.dropped.iter().map(|p| p.lseq).collect();
    assert_eq!(dropped, vec![106, 107]);
    assert!(jb.is_empty());

    // Delivery resumes after the flushed run.
    let out = jb.udp_in(pkt(104, 1640)).unwrap();
    assert_eq!(ready_lseqs(&out), vec![104]);
}

#[test]
fn capacity_one_evicts_on_every_insert() {
    let mut jb = JitterBuffer::new(1);
    assert_eq!(ready_lseqs(&jb.udp_in(pkt(100, 1000)).unwrap()), vec![100]);

    // A capacity-1 buffer cannot hold an out-of-order packet back: it
    // leaves on the same call, behind its erasure.
    let out = jb.udp_in(pkt(102, 1320)).unwrap();
    assert_eq!(
        erasures(&out),
        vec![ErasureFrame {
            lseq_start: 101,
            lseq_end: 101,
            ts_diff: 160
        }]
    );
    assert_eq!(ready_lseqs(&out), vec![102]);
    assert!(jb.is_empty());

    // The stream continues contiguously afterwards.
    let out = jb.udp_in(pkt(103, 1480)).unwrap();
    assert_eq!(ready_lseqs(&out), vec![103]);
    assert!(erasures(&out).is_empty());
    assert!(jb.is_empty());
}

#[test]
fn warm_up_capacity_one_synchronizes_on_the_first_packet() {
    let mut jb = JitterBuffer::with_warm_up(1);
    let out = jb.udp_in(pkt(100, 1000)).unwrap();
    assert_eq!(ready_lseqs(&out), vec![100]);
    assert!(erasures(&out).is_empty());
    assert!(jb.is_empty());
}

#[test]
fn multi_packet_gap_apportions_ts_span() {
    let mut jb = JitterBuffer::new(2);
    assert_eq!(ready_lseqs(&jb.udp_in(pkt(100, 1000)).unwrap()), vec![100]);
    assert!(jb.udp_in(pkt(103, 1480)).unwrap().ready.is_empty());
    let out = jb.udp_in(pkt(105, 1800)).unwrap();
    // Two packets are missing out of a span covering three intervals.
    assert_eq!(
        erasures(&out),
        vec![ErasureFrame {
            lseq_start: 101,
            lseq_end: 102,
            ts_diff: 320
        }]
    );
    assert_eq!(ready_lseqs(&out), vec![103]);
}

#[test]
fn warm_up_mode_delivers_on_first_eviction() {
    let mut jb = JitterBuffer::with_warm_up(2);
    assert!(jb.udp_in(pkt(100, 1000)).unwrap().ready.is_empty());
    // Capacity reached: the leading run leaves without an erasure because
    // nothing has ever been emitted.
    let out = jb.udp_in(pkt(102, 1320)).unwrap();
    assert_eq!(ready_lseqs(&out), vec![100]);
    assert!(erasures(&out).is_empty());
    // From here the buffer behaves like a synchronized stream.
    let out = jb.udp_in(pkt(101, 1160)).unwrap();
    assert_eq!(ready_lseqs(&out), vec![101, 102]);
    assert!(jb.is_empty());
}

#[test]
fn flush_of_empty_buffer_is_empty() {
    let mut jb = JitterBuffer::new(4);
    let out = jb.flush();
    assert!(out.ready.is_empty());
    assert!(out.dropped.is_empty());
}

#[test]
fn every_accepted_packet_lands_exactly_once() {
    // Feed a scrambled window with duplicates; every accepted input must
    // surface exactly once across ready and drop lists.
    let feed: [u16; 16] = [
        200, 203, 201, 203, 202, 208, 206, 199, 210, 207, 204, 209, 205, 212, 211, 208,
    ];
    let mut jb = JitterBuffer::new(4);
    let mut seen: Vec<u64> = Vec::new();

    let mut record = |out: &Ingest| {
        for frame in &out.ready {
            if let JitterFrame::Rtp(p) = frame {
                seen.push(p.lseq);
            }
        }
        for p in &out.dropped {
            seen.push(p.lseq);
        }
    };

    for &seq in &feed {
        let out = jb.udp_in(pkt(seq, seq as u32 * 160)).unwrap();
        record(&out);
        assert!(jb.len() <= 4, "buffer exceeded its capacity");
    }
    let out = jb.flush();
    record(&out);

    seen.sort_unstable();
    let mut expected: Vec<u64> = feed.iter().map(|&s| s as u64).collect();
    expected.sort_unstable();
    assert_eq!(seen, expected, "inputs lost or duplicated across lists");
}

#[test]
fn ready_lseqs_are_strictly_increasing_overall() {
    // Whatever the arrival order, the concatenated ready RTP frames are
    // strictly increasing.
    let feed: [u16; 12] = [300, 302, 301, 306, 304, 305, 303, 310, 308, 309, 307, 311];
    let mut jb = JitterBuffer::new(3);
    let mut readies: Vec<u64> = Vec::new();
    for &seq in &feed {
        let out = jb.udp_in(pkt(seq, seq as u32 * 160)).unwrap();
        readies.extend(ready_lseqs(&out));
    }
    readies.extend(ready_lseqs(&jb.flush()));
    assert!(readies.windows(2).all(|w| w[0] < w[1]), "{:?}", readies);
}
