//! Bounded reorder/erasure engine.
//!
//! The buffer converts an unreliable, possibly wrap-around UDP input
//! sequence into an in-order stream of RTP frames, reporting unrecoverable
//! gaps as explicit erasure frames. It never holds more than `capacity`
//! packets: when the bound is reached the leading contiguous run is forced
//! out and whatever preceded it becomes an erasure.
//!
//! Sequence numbers are extended to a 64-bit logical sequence (`lseq`) that
//! is monotone across 16-bit wraps. A high-bit mask accumulates one `2^16`
//! step per detected wrap; stragglers from before a wrap are folded back
//! under it.
//!
//! The engine is single-threaded: callers must not invoke `udp_in`/`flush`
//! concurrently against the same buffer.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::packet::{self, RtpInfo, RtpParseError};

/// Frame-type tag for RTP frames
pub const FRAME_TYPE_RTP: u8 = 0;
/// Frame-type tag for erasure frames
pub const FRAME_TYPE_ERS: u8 = 1;

/// Raw sequence numbers this close below the wrap point participate in
/// wrap detection.
const SEQ_WRAP_LOW_WATER: u64 = 65000;
/// Logical sequences this close above a wrap accept pre-wrap stragglers.
const SEQ_WRAP_SETTLE: u64 = 536;

/// An RTP frame owned by the caller once emitted.
///
/// `data` is the whole datagram as handed to [`JitterBuffer::udp_in`]; the
/// engine never copies payload bytes, it keeps the reference-counted handle
/// alive while the packet sits in the buffer.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub info: RtpInfo,
    /// 64-bit logical sequence, monotone across 16-bit wraps
    pub lseq: u64,
    pub data: Bytes,
}

impl RtpPacket {
    /// The payload bytes within the datagram.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.info.data_offset..self.info.data_offset + self.info.data_size]
    }
}

/// Gap marker spanning `[lseq_start, lseq_end]`, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErasureFrame {
    pub lseq_start: u64,
    pub lseq_end: u64,
    /// Estimated timestamp delta the missing packets would have carried
    pub ts_diff: u32,
}

/// A frame emitted by the buffer: either a real packet or an erasure.
#[derive(Debug, Clone)]
pub enum JitterFrame {
    Rtp(RtpPacket),
    Erasure(ErasureFrame),
}

impl JitterFrame {
    pub fn frame_type(&self) -> u8 {
        match self {
            JitterFrame::Rtp(_) => FRAME_TYPE_RTP,
            JitterFrame::Erasure(_) => FRAME_TYPE_ERS,
        }
    }

    pub fn as_rtp(&self) -> Option<&RtpPacket> {
        match self {
            JitterFrame::Rtp(pkt) => Some(pkt),
            JitterFrame::Erasure(_) => None,
        }
    }

    pub fn as_erasure(&self) -> Option<&ErasureFrame> {
        match self {
            JitterFrame::Rtp(_) => None,
            JitterFrame::Erasure(ers) => Some(ers),
        }
    }
}

/// Drop and wrap accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct JitterStats {
    pub dup_dropped: u64,
    pub late_dropped: u64,
    pub parse_errors: u64,
    pub seq_wraps: u64,
}

/// The outcome of one ingest or flush: frames now owned by the caller.
#[derive(Debug, Default)]
pub struct Ingest {
    /// In-order frames ready for consumption (RTP and erasures)
    pub ready: Vec<JitterFrame>,
    /// Packets the buffer refused or abandoned (duplicates, stragglers,
    /// discontinuous flush segments)
    pub dropped: Vec<RtpPacket>,
}

/// Per-stream reorder/gap/erasure engine over RTP descriptors.
pub struct JitterBuffer {
    last_lseq: Option<u64>,
    last_max_lseq: Option<u64>,
    last_ts: Option<u32>,
    lseq_mask: u64,
    buffered: VecDeque<RtpPacket>,
    capacity: usize,
    warm_up: bool,
    stats: JitterStats,
}

impl JitterBuffer {
    /// Create a buffer holding at most `capacity` packets.
    ///
    /// The first packet observed synchronizes the stream and is emitted
    /// immediately.
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, false)
    }

    /// Create a buffer that holds back until the stream's logical origin.
    ///
    /// In warm-up mode the first packet is emitted immediately only when its
    /// logical sequence is zero; any other opening packet is retained and
    /// delivery starts once the buffer forces an eviction.
    pub fn with_warm_up(capacity: usize) -> Self {
        Self::build(capacity, true)
    }

    fn build(capacity: usize, warm_up: bool) -> Self {
        JitterBuffer {
            last_lseq: None,
            last_max_lseq: None,
            last_ts: None,
            lseq_mask: 0,
            buffered: VecDeque::new(),
            capacity,
            warm_up,
            stats: JitterStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of packets currently held.
    pub fn len(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }

    pub fn stats(&self) -> &JitterStats {
        &self.stats
    }

    /// Last emitted logical sequence, if any frame has been delivered.
    pub fn last_lseq(&self) -> Option<u64> {
        self.last_lseq
    }

    /// Ingest one datagram.
    ///
    /// On success the returned [`Ingest`] carries zero or more ready frames
    /// and zero or more dropped packets, all owned by the caller. A header
    /// validation failure is returned as an error; the datagram does not
    /// enter the buffer and the parse-error counter advances.
    pub fn udp_in(&mut self, data: Bytes) -> Result<Ingest, RtpParseError> {
        let info = match packet::parse(&data) {
            Ok(info) => info,
            Err(err) => {
                self.stats.parse_errors += 1;
                return Err(err);
            }
        };

        let mut out = Ingest::default();
        let mut lseq = self.lseq_mask | info.seq as u64;
        let warm = self.last_lseq.is_none();

        debug_assert!(
            self.buffered.is_empty()
                || warm
                || self.buffered.front().unwrap().lseq > self.last_lseq.unwrap() + 1
        );

        // Very first packet: initialize the logical sequence tracking.
        let last_max = match self.last_max_lseq {
            Some(v) => v,
            None => {
                debug_assert!(self.buffered.is_empty());
                self.last_max_lseq = Some(lseq);
                let pkt = RtpPacket { info, lseq, data };
                if !self.warm_up {
                    self.save_last(lseq, info.ts);
                    out.ready.push(JitterFrame::Rtp(pkt));
                } else if lseq == 0 {
                    self.save_last(0, info.ts);
                    out.ready.push(JitterFrame::Rtp(pkt));
                } else {
                    self.buffered.push_back(pkt);
                    if self.buffered.len() >= self.capacity {
                        self.emit_leading_run(&mut out);
                    }
                }
                return Ok(out);
            }
        };

        // Wrap handling: fold post-wrap stragglers back below the wrap,
        // advance the mask when the raw sequence restarts from zero.
        if last_max % 0x10000 < SEQ_WRAP_SETTLE && info.seq as u64 > SEQ_WRAP_LOW_WATER {
            match lseq.checked_sub(0x10000) {
                Some(v) => lseq = v,
                None => {
                    // The stream began near zero; this packet predates it.
                    self.stats.late_dropped += 1;
                    out.dropped.push(RtpPacket { info, lseq, data });
                    return Ok(out);
                }
            }
        } else if last_max > SEQ_WRAP_LOW_WATER && lseq < last_max - SEQ_WRAP_LOW_WATER {
            self.lseq_mask += 0x10000;
            lseq += 0x10000;
            self.stats.seq_wraps += 1;
        }

        // Duplicate of or earlier than the last emitted frame.
        if let Some(last) = self.last_lseq {
            if lseq <= last {
                if lseq == last {
                    self.stats.dup_dropped += 1;
                } else {
                    self.stats.late_dropped += 1;
                }
                out.dropped.push(RtpPacket { info, lseq, data });
                return Ok(out);
            }
        }

        if self.buffered.is_empty() {
            // A flush may have abandoned sequences above this one, so the
            // stored maximum only ever ratchets upward.
            if lseq > last_max {
                self.last_max_lseq = Some(lseq);
            }
            let pkt = RtpPacket { info, lseq, data };
            if self.last_lseq == Some(lseq.wrapping_sub(1)) {
                // Contiguous successor: straight through.
                self.save_last(lseq, info.ts);
                out.ready.push(JitterFrame::Rtp(pkt));
            } else {
                self.buffered.push_back(pkt);
                // The bound applies to every insert, so a capacity-1 buffer
                // cannot hold even a lone out-of-order packet back.
                if self.buffered.len() >= self.capacity {
                    self.emit_leading_run(&mut out);
                }
            }
            return Ok(out);
        }

        // Insert sorted by ascending lseq; duplicates never enter.
        let pos = self.buffered.partition_point(|f| f.lseq < lseq);
        if pos < self.buffered.len() && self.buffered[pos].lseq == lseq {
            self.stats.dup_dropped += 1;
            out.dropped.push(RtpPacket { info, lseq, data });
            return Ok(out);
        }
        if pos == self.buffered.len() && lseq > last_max {
            self.last_max_lseq = Some(lseq);
        }
        self.buffered.insert(pos, RtpPacket { info, lseq, data });

        let gap_closed = match self.last_lseq {
            Some(last) => self.buffered.front().unwrap().lseq == last + 1,
            None => false,
        };
        if self.buffered.len() >= self.capacity || gap_closed {
            self.emit_leading_run(&mut out);
        }
        Ok(out)
    }

    /// Empty the buffer.
    ///
    /// The first maximal contiguous run is delivered as ready, prefixed by an
    /// erasure frame when a gap separates it from the last emitted sequence.
    /// Every later, discontinuous segment is returned on the drop list.
    pub fn flush(&mut self) -> Ingest {
        let mut out = Ingest::default();
        if self.buffered.is_empty() {
            return out;
        }

        let mut frames: Vec<RtpPacket> = self.buffered.drain(..).collect();
        let mut split = 1;
        while split < frames.len() && frames[split].lseq == frames[split - 1].lseq + 1 {
            split += 1;
        }
        let rest = frames.split_off(split);

        if let Some(last) = self.last_lseq {
            if last + 1 != frames[0].lseq {
                out.ready.push(JitterFrame::Erasure(self.erasure_for_gap(
                    last,
                    frames[0].lseq,
                    frames[0].info.ts,
                )));
            }
        }
        let (tail_lseq, tail_ts) = {
            let tail = frames.last().unwrap();
            (tail.lseq, tail.info.ts)
        };
        self.save_last(tail_lseq, tail_ts);
        out.ready.extend(frames.into_iter().map(JitterFrame::Rtp));
        out.dropped.extend(rest);
        out
    }

    /// Force out the leading contiguous run, preceded by an erasure frame
    /// when a gap separates it from the last emitted sequence.
    fn emit_leading_run(&mut self, out: &mut Ingest) {
        let mut run: Vec<RtpPacket> = vec![self.buffered.pop_front().unwrap()];
        while let Some(next) = self.buffered.front() {
            if next.lseq == run.last().unwrap().lseq + 1 {
                run.push(self.buffered.pop_front().unwrap());
            } else {
                break;
            }
        }

        if let Some(last) = self.last_lseq {
            if last + 1 != run[0].lseq {
                out.ready.push(JitterFrame::Erasure(self.erasure_for_gap(
                    last,
                    run[0].lseq,
                    run[0].info.ts,
                )));
            }
        }
        let (tail_lseq, tail_ts) = {
            let tail = run.last().unwrap();
            (tail.lseq, tail.info.ts)
        };
        self.save_last(tail_lseq, tail_ts);
        out.ready.extend(run.into_iter().map(JitterFrame::Rtp));
    }

    /// Describe the gap `[last_lseq+1, next_lseq-1]`.
    ///
    /// `ts_diff` apportions the observed timestamp span across the missing
    /// packets: the span covers `gap_len + 1` packet intervals, of which the
    /// gap owns `gap_len`.
    fn erasure_for_gap(&self, last_lseq: u64, next_lseq: u64, next_ts: u32) -> ErasureFrame {
        let gap_len = next_lseq - last_lseq - 1;
        let ts_diff = match self.last_ts {
            Some(prev_ts) => {
                let span = next_ts.wrapping_sub(prev_ts) as u64;
                (span * gap_len / (gap_len + 1)) as u32
            }
            None => 0,
        };
        ErasureFrame {
            lseq_start: last_lseq + 1,
            lseq_end: next_lseq - 1,
            ts_diff,
        }
    }

    fn save_last(&mut self, lseq: u64, ts: u32) {
        self.last_lseq = Some(lseq);
        self.last_ts = Some(ts);
    }
}
