//! Drive a callback on a 20 ms cadence and print the scheduling drift.

use std::sync::mpsc;
use std::time::Duration;

use rtplane_infra_common::{setup_logging, LoggingConfig};
use rtplane_rtp_core::RtpScheduler;
use tracing::Level;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logging(LoggingConfig::new(Level::DEBUG).with_file_info())?;

    let scheduler = RtpScheduler::instance()?;

    let (tx, rx) = mpsc::channel();
    let mut fired = 0u32;
    let channel = scheduler.create_channel(move |now, deadline| {
        if deadline == 0 {
            // Probe call: pick the first deadline.
            return Some(now + 20_000_000);
        }
        fired += 1;
        let _ = tx.send((fired, now.saturating_sub(deadline)));
        if fired < 10 {
            Some(deadline + 20_000_000)
        } else {
            None
        }
    })?;

    for _ in 0..10 {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok((n, drift_ns)) => println!("tick {:2}: drift {:>7} ns", n, drift_ns),
            Err(_) => {
                println!("scheduler stopped early");
                break;
            }
        }
    }

    channel.close()?;
    Ok(())
}
