//! Fixed-capacity pool of reusable, fixed-size sample buffers.
//!
//! Used by the time-stretch unit for the window-sized scratch buffers its
//! WSOLA hop loop needs pre-allocated. Backed by `crossbeam::queue::ArrayQueue`,
//! the lock-free bounded queue the reference engine already depends on
//! `crossbeam` for.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A pool of `Vec<f32>` buffers, all of the same `buffer_len`.
pub struct BufferPool {
    buffer_len: usize,
    cap: usize,
    free: ArrayQueue<Vec<f32>>,
    in_use: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool pre-allocated with `initial` zeroed buffers of
    /// `buffer_len` samples, never growing past `max_capacity` buffers.
    pub fn new(buffer_len: usize, initial: usize, max_capacity: usize) -> Self {
        let cap = max_capacity.max(initial);
        let free = ArrayQueue::new(cap);
        for _ in 0..initial {
            let _ = free.push(vec![0.0; buffer_len]);
        }

        Self {
            buffer_len,
            cap,
            free,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Rents a zeroed buffer, allocating a fresh one only if the pool is
    /// currently empty (this can allocate; callers on the RT path must rent
    /// ahead of time, never inside the callback).
    pub fn rent(&self) -> Vec<f32> {
        let buf = self.free.pop().unwrap_or_else(|| vec![0.0; self.buffer_len]);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        buf
    }

    /// Returns a buffer to the pool, zeroing it first. Discarded (dropped)
    /// if the pool is already at its cap.
    pub fn give_back(&self, mut buf: Vec<f32>) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        buf.iter_mut().for_each(|s| *s = 0.0);
        let _ = self.free.push(buf);
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_returns_zeroed_buffer_of_requested_length() {
        let pool = BufferPool::new(128, 4, 8);
        let buf = pool.rent();
        assert_eq!(buf.len(), 128);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn give_back_zeros_before_returning_to_pool() {
        let pool = BufferPool::new(4, 1, 4);
        let mut buf = pool.rent();
        buf.fill(1.0);
        pool.give_back(buf);

        let recycled = pool.rent();
        assert!(recycled.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn discards_returns_beyond_capacity() {
        let pool = BufferPool::new(4, 0, 1);
        pool.give_back(vec![0.0; 4]);
        pool.give_back(vec![0.0; 4]);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn in_use_accounting_tracks_outstanding_rentals() {
        let pool = BufferPool::new(4, 2, 4);
        let a = pool.rent();
        let b = pool.rent();
        assert_eq!(pool.in_use(), 2);
        pool.give_back(a);
        assert_eq!(pool.in_use(), 1);
        pool.give_back(b);
        assert_eq!(pool.in_use(), 0);
    }
}
