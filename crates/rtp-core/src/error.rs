use std::io;

use thiserror::Error;

use crate::packet::RtpParseError;
use crate::sched::ProcPanic;

/// Result type for media-plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types surfaced at the engine boundaries
#[derive(Debug, Error)]
pub enum Error {
    /// Datagram failed RTP header validation
    #[error("RTP parse error: {0}")]
    RtpParse(#[from] RtpParseError),

    /// The channel's outbound SPMC queue is full
    #[error("channel output queue is full")]
    QueueFull,

    /// A scheduler callback panicked; the original payload is the cause
    #[error("channel processing callback failed")]
    ChannelProc {
        #[source]
        source: ProcPanic,
    },

    /// Lifecycle violation: operation on a closed channel
    #[error("channel is already closed")]
    ChannelClosed,

    /// `send_pkt` before `set_target`
    #[error("channel target is not set")]
    TargetNotSet,

    /// The worker no longer knows this channel
    #[error("channel is no longer present")]
    ChannelGone,

    /// The shared synchronous waiter is in use
    #[error("another synchronous command is already in progress")]
    SyncBusy,

    /// Commands are no longer accepted
    #[error("server is shutting down")]
    ShuttingDown,

    /// Invalid tick rate
    #[error("tick_hz must be > 0")]
    InvalidTickRate,

    /// Outbound queue capacities must be powers of two
    #[error("queue capacity {0} is not a nonzero power of two")]
    InvalidQueueCapacity(usize),

    /// Unrecognized bind family spelling
    #[error("invalid bind family: {0}")]
    InvalidBindFamily(String),

    /// Name resolution produced no usable UDP address
    #[error("failed to resolve a UDP address for {0}:{1}")]
    AddrResolve(String, u16),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A worker rejected a command with an errno-style status
    #[error("worker command failed (status={0})")]
    CommandFailed(i32),
}
