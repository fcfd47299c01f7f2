//! Two channels on one I/O server: one transmits a short synthetic stream,
//! the other receives it over loopback.
//!
//! An optional argument sets the log level (default `debug`, so the worker's
//! channel lifecycle events are visible):
//!
//! ```text
//! cargo run --example udp_loopback -- trace
//! ```

use std::sync::mpsc;
use std::time::Duration;

use rtplane_infra_common::{parse_log_level, setup_logging, LoggingConfig};
use rtplane_rtp_core::{ChannelConfig, RtpServer, RtpSynth};
use tracing::Level;

fn loopback_config() -> ChannelConfig {
    ChannelConfig {
        bind_host: Some("127.0.0.1".to_string()),
        ..Default::default()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let level = match std::env::args().nth(1) {
        Some(arg) => parse_log_level(&arg)?,
        None => Level::DEBUG,
    };
    setup_logging(LoggingConfig::new(level))?;

    let server = RtpServer::new(500)?;

    let (tx, rx) = mpsc::channel();
    let receiver = server.create_channel(
        move |data: &[u8], peer, rtime| {
            let _ = tx.send((data.len(), peer, rtime));
        },
        loopback_config(),
    )?;
    let sender = server.create_channel(|_: &[u8], _, _| {}, loopback_config())?;
    sender.set_target("127.0.0.1", receiver.local_addr().port())?;

    let mut synth = RtpSynth::new(8000, 20);
    for _ in 0..5 {
        sender.send_pkt(synth.next_pkt(160, 0, None))?;
    }

    for _ in 0..5 {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok((len, peer, rtime)) => {
                println!("got {} bytes from {} at t={}ns", len, peer, rtime)
            }
            Err(_) => println!("timed out waiting for a datagram"),
        }
    }

    receiver.close()?;
    sender.close()?;
    server.shutdown();
    Ok(())
}
