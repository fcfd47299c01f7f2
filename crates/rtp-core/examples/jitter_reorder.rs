//! Feed a scrambled synthetic stream through the jitter buffer and print
//! what comes out the far side.

use bytes::Bytes;
use rtplane_rtp_core::{JitterBuffer, JitterFrame, RtpSynth};

fn main() {
    let mut synth = RtpSynth::new(8000, 20);
    let mut packets: Vec<Bytes> = (0..16).map(|_| synth.next_pkt(160, 0, None)).collect();

    // Lose one packet and swap a neighboring pair to simulate the network.
    packets.remove(5);
    packets.swap(9, 10);

    let mut jb = JitterBuffer::new(4);
    for pkt in packets {
        match jb.udp_in(pkt) {
            Ok(out) => {
                for frame in out.ready {
                    match frame {
                        JitterFrame::Rtp(p) => println!(
                            "ready  lseq={} ts={} payload={}B",
                            p.lseq, p.info.ts, p.info.data_size
                        ),
                        JitterFrame::Erasure(e) => println!(
                            "erased [{}..{}] ts_diff={}",
                            e.lseq_start, e.lseq_end, e.ts_diff
                        ),
                    }
                }
                for p in out.dropped {
                    println!("drop   lseq={}", p.lseq);
                }
            }
            Err(err) => println!("parse error: {}", err),
        }
    }

    let out = jb.flush();
    println!("flush: {} ready, {} dropped", out.ready.len(), out.dropped.len());
    let stats = jb.stats();
    println!(
        "stats: dup={} late={} parse_errors={} wraps={}",
        stats.dup_dropped, stats.late_dropped, stats.parse_errors, stats.seq_wraps
    );
}
