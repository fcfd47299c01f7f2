use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
    queue: VecDeque<T>,
    accepting: bool,
    sync_busy: bool,
    poked: bool,
}

/// Mutexed command FIFO with the worker's parking condition variable.
///
/// Foreign threads `push` commands and the worker takes them in FIFO order
/// with `detach_all`, walking the detached batch without holding the lock.
/// Once the gate is closed by a shutdown push, further pushes fail
/// deterministically.
///
/// The queue also carries two pieces of adjacent state that the original
/// engines guard with the same lock: the busy flag serializing use of the
/// shared synchronous [`super::Waiter`], and a `poke` flag that lets a
/// producer wake a pending timed wait without enqueuing a command.
pub struct CommandQueue<T> {
    inner: Mutex<Inner<T>>,
    cv: Condvar,
}

impl<T> CommandQueue<T> {
    pub fn new() -> Self {
        CommandQueue {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                accepting: true,
                sync_busy: false,
                poked: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Append a command and wake the worker.
    ///
    /// Returns the command back if the gate has been closed by a shutdown.
    pub fn push(&self, cmd: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if !inner.accepting {
            return Err(cmd);
        }
        inner.queue.push_back(cmd);
        self.cv.notify_one();
        Ok(())
    }

    /// Append a final command and close the gate in the same critical
    /// section, so nothing can be enqueued behind it.
    pub fn push_closing(&self, cmd: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if !inner.accepting {
            return Err(cmd);
        }
        inner.queue.push_back(cmd);
        inner.accepting = false;
        self.cv.notify_one();
        Ok(())
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.lock().accepting
    }

    /// Atomically take every queued command.
    pub fn detach_all(&self) -> VecDeque<T> {
        std::mem::take(&mut self.inner.lock().queue)
    }

    /// Wake a pending wait without enqueuing a command.
    pub fn poke(&self) {
        let mut inner = self.inner.lock();
        inner.poked = true;
        self.cv.notify_one();
    }

    /// Park until a command arrives or the queue is poked.
    pub fn wait_for_commands(&self) {
        let mut inner = self.inner.lock();
        while inner.queue.is_empty() && !inner.poked {
            self.cv.wait(&mut inner);
        }
        inner.poked = false;
    }

    /// Park until a command arrives, the queue is poked, or `deadline`
    /// passes. The deadline is a monotonic `Instant`.
    pub fn wait_until(&self, deadline: Instant) {
        let mut inner = self.inner.lock();
        while inner.queue.is_empty() && !inner.poked {
            if self.cv.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.poked = false;
    }

    /// Claim the shared synchronous waiter. Fails when another synchronous
    /// command is already in progress.
    pub fn try_acquire_sync(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.sync_busy {
            return false;
        }
        inner.sync_busy = true;
        true
    }

    pub fn release_sync(&self) {
        self.inner.lock().sync_busy = false;
    }
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
