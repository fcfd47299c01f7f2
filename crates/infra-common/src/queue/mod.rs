//! Bounded single-producer / multi-consumer ring queue.
//!
//! The ring has a fixed power-of-two capacity and stores its items behind
//! pointers, one heap cell per item, so slot exchange is a single atomic
//! word. Neither side ever blocks: the producer fails fast when the ring is
//! full and consumers race a CAS on the read index.
//!
//! Each side keeps a cached copy of the opposite index on its own cache line
//! and refreshes it only when the fast-path check says full/empty, so in the
//! common case a push or pop touches no cross-thread data beyond its own
//! index.

use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

#[repr(align(64))]
struct CacheAligned<T>(T);

/// Lock-free bounded SPMC queue.
///
/// Contract: exactly one thread calls [`SpmcQueue::try_push`] at a time; any
/// number of threads may call [`SpmcQueue::try_pop`] / [`SpmcQueue::try_pop_many`]
/// concurrently. A push that violates the single-producer contract can lose
/// an item but cannot corrupt the ring.
///
/// Ordering: pushes become visible to consumers in program order, and a pop
/// that observes an item happens-after the push that produced it.
pub struct SpmcQueue<T> {
    capacity: usize,
    mask: u64,
    write_idx: CacheAligned<AtomicU64>,
    /// Producer-private cache of `read_idx`.
    read_idx_cache: CacheAligned<AtomicU64>,
    read_idx: CacheAligned<AtomicU64>,
    /// Consumer-shared cache of `write_idx`.
    write_idx_cache: CacheAligned<AtomicU64>,
    slots: Box<[AtomicPtr<T>]>,
}

impl<T: Send> SpmcQueue<T> {
    /// Create a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity.is_power_of_two(),
            "SpmcQueue capacity must be a power of two, got {}",
            capacity
        );
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        SpmcQueue {
            capacity,
            mask: capacity as u64 - 1,
            write_idx: CacheAligned(AtomicU64::new(0)),
            read_idx_cache: CacheAligned(AtomicU64::new(0)),
            read_idx: CacheAligned(AtomicU64::new(0)),
            write_idx_cache: CacheAligned(AtomicU64::new(0)),
            slots,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approximate number of queued items.
    pub fn len(&self) -> usize {
        let write = self.write_idx.0.load(Ordering::Relaxed);
        let read = self.read_idx.0.load(Ordering::Relaxed);
        write.saturating_sub(read) as usize
    }

    /// Number of items pushed over the queue's lifetime.
    pub fn pushed(&self) -> u64 {
        self.write_idx.0.load(Ordering::Relaxed)
    }

    /// Push one item. Single producer only.
    ///
    /// Returns the item back when the ring is full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let write_idx = self.write_idx.0.load(Ordering::Relaxed);
        let next_write_idx = write_idx + 1;
        let mut read_cache = self.read_idx_cache.0.load(Ordering::Relaxed);
        if next_write_idx - read_cache > self.capacity as u64 {
            // Refresh the cached index and retry the check.
            read_cache = self.read_idx.0.load(Ordering::Acquire);
            self.read_idx_cache.0.store(read_cache, Ordering::Relaxed);
            if next_write_idx - read_cache > self.capacity as u64 {
                return Err(value);
            }
        }
        let ptr = Box::into_raw(Box::new(value));
        self.slots[(write_idx & self.mask) as usize].store(ptr, Ordering::Relaxed);
        self.write_idx.0.store(next_write_idx, Ordering::Release);
        Ok(())
    }

    /// Pop one item. Safe from any number of threads.
    pub fn try_pop(&self) -> Option<T> {
        loop {
            let read_idx = self.read_idx.0.load(Ordering::Relaxed);
            let mut write_cache = self.write_idx_cache.0.load(Ordering::Acquire);
            if read_idx >= write_cache {
                // Refresh the cached index and retry the check.
                write_cache = self.write_idx.0.load(Ordering::Acquire);
                self.write_idx_cache.0.store(write_cache, Ordering::Release);
                if read_idx == write_cache {
                    return None;
                }
                debug_assert!(read_idx < write_cache);
            }
            let ptr = self.slots[(read_idx & self.mask) as usize].load(Ordering::Relaxed);
            if self
                .read_idx
                .0
                .compare_exchange_weak(
                    read_idx,
                    read_idx + 1,
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                // Winning the CAS makes this thread the sole owner of the
                // slot's pointer; the producer cannot reuse the slot until
                // read_idx has moved past it.
                debug_assert!(!ptr.is_null());
                return Some(*unsafe { Box::from_raw(ptr) });
            }
        }
    }

    /// Pop up to `max` items into `out`, returning how many were taken.
    ///
    /// The batch is claimed with a single CAS, so concurrent consumers never
    /// observe interleaved fragments of it.
    pub fn try_pop_many(&self, out: &mut Vec<T>, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        let mut ptrs: Vec<*mut T> = Vec::with_capacity(max);
        loop {
            ptrs.clear();
            let read_idx = self.read_idx.0.load(Ordering::Relaxed);
            let mut write_cache = self.write_idx_cache.0.load(Ordering::Acquire);
            if read_idx >= write_cache {
                write_cache = self.write_idx.0.load(Ordering::Acquire);
                self.write_idx_cache.0.store(write_cache, Ordering::Release);
                if read_idx == write_cache {
                    return 0;
                }
                debug_assert!(read_idx < write_cache);
            }
            let new_read_idx = std::cmp::min(read_idx + max as u64, write_cache);
            for i in read_idx..new_read_idx {
                ptrs.push(self.slots[(i & self.mask) as usize].load(Ordering::Relaxed));
            }
            if self
                .read_idx
                .0
                .compare_exchange_weak(read_idx, new_read_idx, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                for ptr in ptrs.drain(..) {
                    debug_assert!(!ptr.is_null());
                    out.push(*unsafe { Box::from_raw(ptr) });
                }
                return (new_read_idx - read_idx) as usize;
            }
        }
    }
}

impl<T> Drop for SpmcQueue<T> {
    fn drop(&mut self) {
        // Exclusive access: drain whatever is still queued.
        let read = *self.read_idx.0.get_mut();
        let write = *self.write_idx.0.get_mut();
        for i in read..write {
            let ptr = *self.slots[(i & self.mask) as usize].get_mut();
            if !ptr.is_null() {
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}
