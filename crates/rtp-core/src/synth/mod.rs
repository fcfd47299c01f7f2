//! Synthetic RTP stream generator.
//!
//! The synthesizer produces successive RTP datagrams with monotonically
//! advancing sequence numbers and timestamps, suitable for test traffic and
//! playout. The marker bit is set on the first packet after construction (or
//! after [`RtpSynth::set_mbt`]) and cleared on every following one.

use std::time::Instant;

use bytes::Bytes;
use rand::Rng;
use thiserror::Error;

use crate::packet::RTP_HEADER_LEN;

/// Errors from the buffer-filling packet form
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SynthError {
    /// The provided buffer cannot hold header plus payload
    #[error("packet buffer too small: need {need}, have {have} bytes")]
    BufferTooSmall { need: usize, have: usize },
}

/// Logical timestamp/sequence cursor reported by [`RtpSynth::resync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthCursor {
    pub ts: u64,
    pub seq: u64,
}

/// Stateful RTP packet generator.
pub struct RtpSynth {
    srate: u32,
    ptime: u32,
    ts: u64,
    seq: u64,
    ts_inc: u32,
    ssrc: u32,
    marker: bool,
    last_sync: Instant,
}

impl RtpSynth {
    /// Create a generator for the given sample rate and packet duration in
    /// milliseconds.
    ///
    /// The SSRC is random, the initial timestamp is random and even, and the
    /// initial sequence number is random in `[0, 2^16)`.
    pub fn new(srate: u32, ptime: u32) -> Self {
        let mut rng = rand::thread_rng();
        RtpSynth {
            srate,
            ptime,
            ts: (rng.gen::<u32>() & 0xffff_fffe) as u64,
            seq: rng.gen::<u16>() as u64,
            ts_inc: 80 * ptime / 10,
            ssrc: rng.gen::<u32>(),
            marker: true,
            last_sync: Instant::now(),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn srate(&self) -> u32 {
        self.srate
    }

    pub fn ptime(&self) -> u32 {
        self.ptime
    }

    /// Timestamp advance per generated packet.
    pub fn ts_inc(&self) -> u32 {
        self.ts_inc
    }

    /// Generate the next datagram with a `plen`-byte payload.
    ///
    /// When `payload` is given, its bytes (up to `plen`) lead the payload
    /// area; the remainder is zero-filled.
    pub fn next_pkt(&mut self, plen: usize, pt: u8, payload: Option<&[u8]>) -> Bytes {
        let mut buf = vec![0u8; RTP_HEADER_LEN + plen];
        if let Some(data) = payload {
            let n = data.len().min(plen);
            buf[RTP_HEADER_LEN..RTP_HEADER_LEN + n].copy_from_slice(&data[..n]);
        }
        self.stamp(&mut buf, pt);
        Bytes::from(buf)
    }

    /// Generate the next datagram into a caller-provided buffer.
    ///
    /// Buffer layout contract: when `filled` is set, the payload occupies
    /// `buf[..plen]` on entry; it is shifted to the header length on exit and
    /// the tail is zeroed. When `filled` is clear the whole payload area is
    /// zeroed. Returns the packet length, `header + plen`.
    pub fn next_pkt_into(
        &mut self,
        plen: usize,
        pt: u8,
        buf: &mut [u8],
        filled: bool,
    ) -> Result<usize, SynthError> {
        let need = RTP_HEADER_LEN + plen;
        if need > buf.len() {
            return Err(SynthError::BufferTooSmall {
                need,
                have: buf.len(),
            });
        }
        if filled {
            buf.copy_within(..plen, RTP_HEADER_LEN);
            buf[RTP_HEADER_LEN + plen..].fill(0);
        } else {
            buf[RTP_HEADER_LEN..].fill(0);
        }
        self.stamp(buf, pt);
        Ok(need)
    }

    /// Set the marker-bit state for the next packet, returning the previous
    /// state.
    pub fn set_mbt(&mut self, on: bool) -> bool {
        std::mem::replace(&mut self.marker, on)
    }

    /// Advance the timestamp as if `npkts` packets had been emitted.
    pub fn skip(&mut self, npkts: u64) {
        self.ts += npkts * self.ts_inc as u64;
    }

    /// Advance the timestamp by the monotonic time elapsed since
    /// construction or the previous resync, scaled to the sample rate, and
    /// report the resulting logical cursor.
    pub fn resync(&mut self) -> SynthCursor {
        let now = Instant::now();
        let elapsed_ns = now.duration_since(self.last_sync).as_nanos();
        self.last_sync = now;
        self.ts += (elapsed_ns * self.srate as u128 / 1_000_000_000) as u64;
        SynthCursor {
            ts: self.ts,
            seq: self.seq,
        }
    }

    /// Write the header for the current cursor and advance it.
    fn stamp(&mut self, buf: &mut [u8], pt: u8) {
        buf[0] = 0x80;
        buf[1] = (pt & 0x7f) | if self.marker { 0x80 } else { 0 };
        buf[2..4].copy_from_slice(&(self.seq as u16).to_be_bytes());
        buf[4..8].copy_from_slice(&(self.ts as u32).to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        self.marker = false;
        self.seq += 1;
        self.ts += self.ts_inc as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet;

    #[test]
    fn consecutive_packets_are_continuous() {
        let mut synth = RtpSynth::new(8000, 20);
        let first = synth.next_pkt(160, 0, None);
        let second = synth.next_pkt(160, 0, None);
        let a = packet::parse(&first).unwrap();
        let b = packet::parse(&second).unwrap();
        assert_eq!(b.seq, a.seq.wrapping_add(1));
        assert_eq!(b.ts.wrapping_sub(a.ts), 80 * 20 / 10);
        assert_eq!(a.ssrc, b.ssrc);
        assert!(a.marker);
        assert!(!b.marker);
    }

    #[test]
    fn sequence_wraps_naturally_on_the_wire() {
        let mut synth = RtpSynth::new(8000, 20);
        synth.seq = 0xffff;
        let first = packet::parse(&synth.next_pkt(0, 0, None)).unwrap();
        let second = packet::parse(&synth.next_pkt(0, 0, None)).unwrap();
        assert_eq!(first.seq, 0xffff);
        assert_eq!(second.seq, 0);
    }

    #[test]
    fn set_mbt_rearms_the_marker() {
        let mut synth = RtpSynth::new(8000, 20);
        synth.next_pkt(0, 0, None);
        let info = packet::parse(&synth.next_pkt(0, 0, None)).unwrap();
        assert!(!info.marker);
        assert!(!synth.set_mbt(true));
        let info = packet::parse(&synth.next_pkt(0, 0, None)).unwrap();
        assert!(info.marker);
    }

    #[test]
    fn payload_is_shifted_into_place() {
        let mut synth = RtpSynth::new(8000, 20);
        let mut buf = vec![0u8; RTP_HEADER_LEN + 8];
        buf[..4].copy_from_slice(&[1, 2, 3, 4]);
        let len = synth.next_pkt_into(4, 0, &mut buf, true).unwrap();
        assert_eq!(len, RTP_HEADER_LEN + 4);
        assert_eq!(&buf[RTP_HEADER_LEN..RTP_HEADER_LEN + 4], &[1, 2, 3, 4]);
        assert!(buf[RTP_HEADER_LEN + 4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn undersized_buffer_is_rejected() {
        let mut synth = RtpSynth::new(8000, 20);
        let mut buf = vec![0u8; 10];
        assert_eq!(
            synth.next_pkt_into(4, 0, &mut buf, false),
            Err(SynthError::BufferTooSmall { need: 16, have: 10 })
        );
    }

    #[test]
    fn skip_advances_the_timestamp_only() {
        let mut synth = RtpSynth::new(8000, 20);
        let ts = synth.ts;
        let seq = synth.seq;
        synth.skip(5);
        assert_eq!(synth.ts, ts + 5 * synth.ts_inc() as u64);
        assert_eq!(synth.seq, seq);
    }

    #[test]
    fn resync_scales_elapsed_time() {
        let mut synth = RtpSynth::new(8000, 20);
        let before = synth.resync();
        std::thread::sleep(std::time::Duration::from_millis(50));
        let after = synth.resync();
        let advanced = after.ts - before.ts;
        // 50 ms at 8 kHz is 400 samples; allow generous scheduler slop.
        assert!(advanced >= 380, "advanced only {} samples", advanced);
        assert!(advanced < 2000, "advanced {} samples", advanced);
        assert_eq!(after.seq, before.seq);
    }
}
