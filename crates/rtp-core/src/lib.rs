//! # rtplane-rtp-core
//!
//! The media-plane engines of the rtplane toolkit:
//!
//! - [`jitter`] — bounded reorder/erasure engine turning out-of-order UDP
//!   arrival into an in-order stream of RTP and erasure frames
//! - [`server`] — single-threaded UDP I/O worker owning a dynamic set of
//!   channel sockets on a fixed tick
//! - [`sched`] — deadline-driven processing scheduler with per-channel
//!   callbacks
//! - [`synth`] — synthetic RTP stream generator for test and playout
//! - [`packet`] — RTP header parsing and payload-type profiles
//! - [`audio`] — µ-law conversion and linear resampling helpers
//!
//! The engines are intended for embedding in softswitches, media probes and
//! conformance testers. Each worker engine runs on one dedicated thread; all
//! other operations run on caller threads.

pub mod audio;
pub mod error;
pub mod jitter;
pub mod packet;
pub mod sched;
pub mod server;
pub mod synth;

// Public exports
pub use error::{Error, Result};
pub use jitter::{
    ErasureFrame, Ingest, JitterBuffer, JitterFrame, JitterStats, RtpPacket, FRAME_TYPE_ERS,
    FRAME_TYPE_RTP,
};
pub use packet::{
    parse, RtpInfo, RtpParseError, RtpProfile, RJB_ENOMEM, RTP_HEADER_LEN, RTP_PARSER_OK,
};
pub use sched::{ProcChannel, ProcPanic, RtpScheduler};
pub use server::{
    BindFamily, ChannelConfig, RtpChannel, RtpServer, DEFAULT_OUTQ_CAPACITY, DEFAULT_TICK_HZ,
    MAX_UDP_PACKET,
};
pub use synth::{RtpSynth, SynthCursor, SynthError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
