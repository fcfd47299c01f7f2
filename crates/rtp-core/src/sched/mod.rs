//! Deadline-driven processing scheduler.
//!
//! A single worker invokes per-channel callbacks at monotonic deadlines the
//! callbacks choose themselves: each invocation returns the next absolute
//! deadline, or `None` to go dormant. The scheduler is a process-wide
//! singleton; channel management runs through the same command-queue /
//! shared-waiter protocol as the I/O server.
//!
//! A callback that panics is taken off the schedule and its panic payload is
//! parked on the channel; the owner sees it when closing the channel.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use rtplane_infra_common::{deadline_instant, monotonic_ns, CommandQueue, Waiter};

use crate::error::{Error, Result};

/// Processing callback: `(now_ns, deadline_ns) -> next deadline`.
///
/// At add time the callback is probed once with `deadline_ns == 0` to obtain
/// its initial deadline.
pub type ProcCallback = Box<dyn FnMut(u64, u64) -> Option<u64> + Send>;

/// A captured callback panic, surfaced as the cause of
/// [`Error::ChannelProc`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcPanic {
    message: String,
}

impl ProcPanic {
    pub fn message(&self) -> &str {
        &self.message
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "channel processing callback panicked".to_string()
    }
}

enum SchedCommand {
    AddChannel {
        id: u64,
        proc_in: ProcCallback,
        notify: bool,
    },
    RemoveChannel {
        id: u64,
        notify: bool,
    },
    Shutdown,
}

struct SchedShared {
    cmds: CommandQueue<SchedCommand>,
    waiter: Waiter,
    /// Panic taken from the channel being closed, handed back to the closer
    close_error: Mutex<Option<ProcPanic>>,
}

impl SchedShared {
    fn run_sync(&self, cmd: SchedCommand) -> Result<i32> {
        if !self.cmds.try_acquire_sync() {
            return Err(Error::SyncBusy);
        }
        self.waiter.reset();
        if self.cmds.push(cmd).is_err() {
            self.cmds.release_sync();
            return Err(Error::ShuttingDown);
        }
        let status = self.waiter.wait();
        self.cmds.release_sync();
        Ok(status)
    }
}

static SCHEDULER: Lazy<Mutex<Weak<RtpScheduler>>> = Lazy::new(|| Mutex::new(Weak::new()));

/// The processing scheduler. At most one instance exists per process;
/// obtain it through [`RtpScheduler::instance`].
pub struct RtpScheduler {
    shared: Arc<SchedShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_channel_id: AtomicU64,
}

impl RtpScheduler {
    /// The process-wide scheduler, started on first use.
    ///
    /// While any returned handle is alive, later calls yield the same
    /// instance. Once every handle has dropped (shutting the worker down), a
    /// fresh scheduler is started on the next call.
    pub fn instance() -> Result<Arc<RtpScheduler>> {
        let mut slot = SCHEDULER.lock();
        if let Some(existing) = slot.upgrade() {
            return Ok(existing);
        }
        let scheduler = Arc::new(Self::start()?);
        *slot = Arc::downgrade(&scheduler);
        Ok(scheduler)
    }

    fn start() -> Result<RtpScheduler> {
        let shared = Arc::new(SchedShared {
            cmds: CommandQueue::new(),
            waiter: Waiter::new(),
            close_error: Mutex::new(None),
        });
        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("rtp-proc-scheduler".into())
            .spawn(move || proc_worker(worker_shared))?;
        Ok(RtpScheduler {
            shared,
            worker: Mutex::new(Some(handle)),
            next_channel_id: AtomicU64::new(1),
        })
    }

    /// Register a processing callback.
    ///
    /// The worker probes the callback once with `deadline_ns == 0`; a
    /// returned deadline (clamped to now if already past) schedules the
    /// channel, `None` leaves it dormant.
    pub fn create_channel<F>(&self, proc_in: F) -> Result<ProcChannel>
    where
        F: FnMut(u64, u64) -> Option<u64> + Send + 'static,
    {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let status = self.shared.run_sync(SchedCommand::AddChannel {
            id,
            proc_in: Box::new(proc_in),
            notify: true,
        })?;
        if status != 0 {
            return Err(Error::CommandFailed(status));
        }
        Ok(ProcChannel {
            shared: self.shared.clone(),
            id,
            closed: AtomicBool::new(false),
        })
    }

    /// Stop accepting commands, drain the worker, and join it.
    pub fn shutdown(&self) {
        let _ = self.shared.cmds.push_closing(SchedCommand::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RtpScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A scheduler channel handle.
pub struct ProcChannel {
    shared: Arc<SchedShared>,
    id: u64,
    closed: AtomicBool,
}

impl ProcChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Remove the channel from the scheduler.
    ///
    /// If the callback panicked since the channel was created, the captured
    /// panic is raised here as [`Error::ChannelProc`]. Closing twice is a
    /// lifecycle error; closing after scheduler shutdown is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::ChannelClosed);
        }
        *self.shared.close_error.lock() = None;
        match self.shared.run_sync(SchedCommand::RemoveChannel {
            id: self.id,
            notify: true,
        }) {
            Ok(status) => {
                if let Some(panic) = self.shared.close_error.lock().take() {
                    return Err(Error::ChannelProc { source: panic });
                }
                if status != 0 {
                    return Err(Error::CommandFailed(status));
                }
                Ok(())
            }
            Err(Error::ShuttingDown) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ProcChannel {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.shared.cmds.push(SchedCommand::RemoveChannel {
                id: self.id,
                notify: false,
            });
        }
    }
}

struct ProcChannelState {
    proc_in: ProcCallback,
    panic: Option<ProcPanic>,
}

struct SchedWorker {
    channels: HashMap<u64, ProcChannelState>,
    /// Ascending by deadline; ties keep insertion order
    schedule: Vec<(u64, u64)>,
}

impl SchedWorker {
    fn new() -> Self {
        SchedWorker {
            channels: HashMap::new(),
            schedule: Vec::new(),
        }
    }

    /// Insert the channel at its deadline, keeping at most one entry per
    /// channel.
    fn schedule_channel(&mut self, id: u64, next_run_ns: u64) {
        self.unschedule(id);
        let pos = self.schedule.partition_point(|&(t, _)| t <= next_run_ns);
        self.schedule.insert(pos, (next_run_ns, id));
    }

    fn unschedule(&mut self, id: u64) {
        self.schedule.retain(|&(_, cid)| cid != id);
    }

    fn pop_due(&mut self, now_ns: u64) -> Option<(u64, u64)> {
        if self.schedule.first().map_or(false, |&(t, _)| t <= now_ns) {
            Some(self.schedule.remove(0))
        } else {
            None
        }
    }
}

/// Run the callback, trapping panics onto the channel.
fn invoke(ch: &mut ProcChannelState, now_ns: u64, deadline_ns: u64) -> Option<u64> {
    match catch_unwind(AssertUnwindSafe(|| (ch.proc_in)(now_ns, deadline_ns))) {
        Ok(next) => next,
        Err(payload) => {
            let message = panic_message(payload);
            warn!(message = %message, "processing callback panicked");
            ch.panic = Some(ProcPanic { message });
            None
        }
    }
}

fn process_commands(state: &mut SchedWorker, shared: &SchedShared, shutdown_seen: &mut bool) {
    for cmd in shared.cmds.detach_all() {
        match cmd {
            SchedCommand::AddChannel {
                id,
                proc_in,
                notify,
            } => {
                let mut ch = ProcChannelState {
                    proc_in,
                    panic: None,
                };
                let now_ns = monotonic_ns();
                let next = invoke(&mut ch, now_ns, 0).map(|t| t.max(now_ns));
                state.channels.insert(id, ch);
                if let Some(t) = next {
                    state.schedule_channel(id, t);
                }
                debug!(id, "channel added");
                if notify {
                    shared.waiter.complete(0);
                }
            }
            SchedCommand::RemoveChannel { id, notify } => {
                state.unschedule(id);
                if let Some(ch) = state.channels.remove(&id) {
                    debug!(id, "channel removed");
                    if notify {
                        if let Some(panic) = ch.panic {
                            *shared.close_error.lock() = Some(panic);
                        }
                    }
                }
                if notify {
                    shared.waiter.complete(0);
                }
            }
            SchedCommand::Shutdown => {
                *shutdown_seen = true;
            }
        }
    }
}

fn proc_worker(shared: Arc<SchedShared>) {
    let mut state = SchedWorker::new();

    loop {
        let mut shutdown_seen = false;
        process_commands(&mut state, &shared, &mut shutdown_seen);
        if shutdown_seen {
            break;
        }

        // Drain everything already due, re-reading the clock after each
        // callback so a slow one cannot starve the due check.
        let mut now_ns = monotonic_ns();
        while let Some((deadline_ns, id)) = state.pop_due(now_ns) {
            let next = match state.channels.get_mut(&id) {
                Some(ch) => invoke(ch, now_ns, deadline_ns),
                None => None,
            };
            if let Some(t) = next {
                state.schedule_channel(id, t.max(now_ns));
            }
            now_ns = monotonic_ns();
        }

        if state.schedule.is_empty() {
            shared.cmds.wait_for_commands();
            continue;
        }

        now_ns = monotonic_ns();
        let head = state.schedule[0].0;
        if head <= now_ns {
            continue;
        }
        shared.cmds.wait_until(deadline_instant(head));
    }

    debug!("processing scheduler worker exiting");
    state.channels.clear();
    for cmd in shared.cmds.detach_all() {
        match cmd {
            SchedCommand::AddChannel { notify: true, .. }
            | SchedCommand::RemoveChannel { notify: true, .. } => {
                shared.waiter.complete(libc::ECANCELED);
            }
            _ => {}
        }
    }
}
