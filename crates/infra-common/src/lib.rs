//! # rtplane-infra-common
//!
//! Shared infrastructure for the rtplane media-plane toolkit:
//!
//! - Monotonic clock used to drive timed condition waits
//! - One-shot completion waiter and command-queue synchronization
//! - Bounded single-producer / multi-consumer ring queue
//! - Logging setup and standardization
//!
//! This crate is the horizontal layer under the media engines; it has no
//! knowledge of RTP itself.

pub mod errors;
pub mod logging;
pub mod queue;
pub mod sync;
pub mod time;

/// Re-export commonly used types
pub use errors::{Error, Result};
pub use logging::{parse_log_level, setup_logging, LoggingConfig};
pub use queue::SpmcQueue;
pub use sync::{CommandQueue, Waiter};
pub use time::{deadline_instant, monotonic_ns};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
