use parking_lot::{Condvar, Mutex};

struct WaiterState {
    done: bool,
    status: i32,
}

/// One-shot cross-thread completion signal carrying an integer status.
///
/// A caller enqueues a command, then blocks in [`Waiter::wait`] until the
/// worker calls [`Waiter::complete`] with the command's status. The handle is
/// reusable through [`Waiter::reset`], but only from a single thread at a
/// time; concurrent synchronous commands must be serialized by the owner.
pub struct Waiter {
    state: Mutex<WaiterState>,
    cv: Condvar,
}

impl Waiter {
    pub fn new() -> Self {
        Waiter {
            state: Mutex::new(WaiterState {
                done: false,
                status: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Clear the handle for reuse. Must not race an in-flight `wait`.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.done = false;
        state.status = 0;
    }

    /// Mark the operation complete and wake the waiting thread.
    pub fn complete(&self, status: i32) {
        let mut state = self.state.lock();
        state.status = status;
        state.done = true;
        self.cv.notify_one();
    }

    /// Block until `complete` has been called, returning its status.
    pub fn wait(&self) -> i32 {
        let mut state = self.state.lock();
        while !state.done {
            self.cv.wait(&mut state);
        }
        state.status
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn complete_before_wait() {
        let waiter = Waiter::new();
        waiter.complete(7);
        assert_eq!(waiter.wait(), 7);
    }

    #[test]
    fn complete_from_other_thread() {
        let waiter = Arc::new(Waiter::new());
        let remote = waiter.clone();
        let handle = thread::spawn(move || {
            remote.complete(-2);
        });
        assert_eq!(waiter.wait(), -2);
        handle.join().unwrap();
    }

    #[test]
    fn reset_allows_reuse() {
        let waiter = Waiter::new();
        waiter.complete(1);
        assert_eq!(waiter.wait(), 1);
        waiter.reset();
        waiter.complete(2);
        assert_eq!(waiter.wait(), 2);
    }
}
