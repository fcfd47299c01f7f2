//! Monotonic clock utilities.
//!
//! The workers express deadlines as nanoseconds on a process-wide monotonic
//! timeline. The timeline's origin is the first observation of the clock, so
//! values are small, never go backwards, and convert losslessly to the
//! `Instant`s that condition-variable timed waits consume.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Current monotonic time in nanoseconds since the process epoch.
pub fn monotonic_ns() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

/// Convert a monotonic-nanosecond deadline back into an `Instant`.
///
/// Deadlines in the past are valid and yield an `Instant` that is already
/// elapsed, so timed waits on them return immediately.
pub fn deadline_instant(deadline_ns: u64) -> Instant {
    *EPOCH + Duration::from_nanos(deadline_ns)
}
