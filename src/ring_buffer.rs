//! Lock-free single-producer/single-consumer ring buffer for interleaved
//! `f32` samples.
//!
//! This is the fabric that moves decoded audio from a source's producer
//! thread into the RT thread without allocation or blocking. Capacity is
//! rounded up to the next power of two so the read/write cursors can be
//! masked instead of taken modulo, and the cursors are plain monotonically
//! increasing `usize` counters (never rebased to `0`) so wraparound is just
//! `cursor & mask`.
//!
//! Grounded in the hand-rolled atomic ring buffer pattern used for mixing
//! samples between a capture and a render callback (see
//! `examples/other_examples/..._mixer.rs.rs`), extended here with the
//! peek/skip/writable surface and explicit acquire/release pairing that
//! `spec.md §4.1` requires.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Inner {
    buf: Box<[std::cell::UnsafeCell<f32>]>,
    mask: usize,
    write: CachePadded<AtomicUsize>,
    read: CachePadded<AtomicUsize>,
}

// SAFETY: `buf` is only ever written through indices owned exclusively by
// the producer (between `read` and `write`, exclusive), and only ever read
// through indices owned exclusively by the consumer (between `read` and the
// producer's published `write`). The two index ranges never overlap because
// `write` is published with Release after the copy, and loaded with Acquire
// before the copy on the read side.
unsafe impl Sync for Inner {}

impl Inner {
    fn capacity(&self) -> usize {
        self.mask + 1
    }
}

/// Creates a new ring buffer, rounding `requested_capacity` up to the next
/// power of two, and splits it into its producer and consumer halves.
pub fn spsc_ring(requested_capacity: usize) -> (Producer, Consumer) {
    let capacity = requested_capacity.max(1).next_power_of_two();
    let buf: Box<[std::cell::UnsafeCell<f32>]> = (0..capacity)
        .map(|_| std::cell::UnsafeCell::new(0.0))
        .collect();

    let inner = Arc::new(Inner {
        buf,
        mask: capacity - 1,
        write: CachePadded::new(AtomicUsize::new(0)),
        read: CachePadded::new(AtomicUsize::new(0)),
    });

    (
        Producer {
            inner: inner.clone(),
        },
        Consumer { inner },
    )
}

/// Producer half of an [`spsc_ring`]. Owned exclusively by one thread.
pub struct Producer {
    inner: Arc<Inner>,
}

// SAFETY: Producer only touches the Arc<Inner> and its own cached write
// cursor; nothing about it is `!Send`.
unsafe impl Send for Producer {}

impl Producer {
    /// Capacity of the underlying buffer (always a power of two).
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Samples free for writing right now.
    pub fn writable(&self) -> usize {
        let w = self.inner.write.load(Ordering::Relaxed);
        let r = self.inner.read.load(Ordering::Acquire);
        self.inner.capacity() - (w.wrapping_sub(r))
    }

    pub fn is_full(&self) -> bool {
        self.writable() == 0
    }

    /// Copies up to `capacity - available` samples from `data`, returning
    /// the number actually written. Never blocks; a full buffer returns 0.
    pub fn write(&mut self, data: &[f32]) -> usize {
        let mask = self.inner.mask;
        let w = self.inner.write.load(Ordering::Relaxed);
        let r = self.inner.read.load(Ordering::Acquire);
        let free = self.inner.capacity() - (w.wrapping_sub(r));
        let n = data.len().min(free);

        for (i, &sample) in data.iter().take(n).enumerate() {
            let idx = (w.wrapping_add(i)) & mask;
            // SAFETY: idx falls strictly within [w, w+free) which the
            // consumer cannot yet observe (write not published) nor touch
            // (it never writes).
            unsafe {
                *self.inner.buf[idx].get() = sample;
            }
        }

        if n > 0 {
            // Full fence: every sample copy above must retire before the
            // new write cursor becomes visible to the consumer's Acquire
            // load.
            std::sync::atomic::fence(Ordering::Release);
            self.inner.write.store(w.wrapping_add(n), Ordering::Release);
        }

        n
    }
}

/// Consumer half of an [`spsc_ring`]. Owned exclusively by one thread
/// (typically the RT thread).
pub struct Consumer {
    inner: Arc<Inner>,
}

unsafe impl Send for Consumer {}

impl Consumer {
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Samples available for reading right now.
    pub fn available(&self) -> usize {
        let w = self.inner.write.load(Ordering::Acquire);
        let r = self.inner.read.load(Ordering::Relaxed);
        w.wrapping_sub(r)
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn is_full(&self) -> bool {
        self.available() == self.inner.capacity()
    }

    /// Copies up to `available()` samples into `dst`, consuming them.
    /// Returns the number of samples actually read.
    pub fn read(&mut self, dst: &mut [f32]) -> usize {
        let n = self.peek(dst);
        if n > 0 {
            self.skip(n);
        }
        n
    }

    /// Copies up to `available()` samples into `dst` without consuming.
    pub fn peek(&self, dst: &mut [f32]) -> usize {
        let mask = self.inner.mask;
        let w = self.inner.write.load(Ordering::Acquire);
        let r = self.inner.read.load(Ordering::Relaxed);
        let avail = w.wrapping_sub(r);
        let n = dst.len().min(avail);

        for (i, slot) in dst.iter_mut().take(n).enumerate() {
            let idx = (r.wrapping_add(i)) & mask;
            // SAFETY: idx falls within [r, r+avail), which the producer has
            // already published via the Acquire load above and will never
            // write into again (it only ever advances forward).
            unsafe {
                *slot = *self.inner.buf[idx].get();
            }
        }

        n
    }

    /// Discards up to `n` buffered samples without copying them out.
    /// Returns the number actually skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        let w = self.inner.write.load(Ordering::Acquire);
        let r = self.inner.read.load(Ordering::Relaxed);
        let avail = w.wrapping_sub(r);
        let skipped = n.min(avail);

        // Full fence: any reads done by the caller against the discarded
        // region must retire before we publish the advanced read cursor.
        std::sync::atomic::fence(Ordering::Release);
        self.inner
            .read
            .store(r.wrapping_add(skipped), Ordering::Release);
        skipped
    }

    /// Discards every currently-buffered sample. Safe to call at any time —
    /// it only ever catches the read cursor up to the producer's last
    /// published write, so it never races with concurrent writes (it simply
    /// may discard fewer or more samples depending on timing, never corrupt
    /// state). This is the operation the source pipeline's seek path uses to
    /// flush stale, pre-seek audio.
    pub fn flush(&mut self) -> usize {
        let w = self.inner.write.load(Ordering::Acquire);
        let r = self.inner.read.swap(w, Ordering::AcqRel);
        w.wrapping_sub(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let (p, _c) = spsc_ring(100);
        assert_eq!(p.capacity(), 128);
    }

    #[test]
    fn write_then_read_round_trips_prefix() {
        let (mut p, mut c) = spsc_ring(8);
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(p.write(&data), 4);

        let mut out = [0.0; 4];
        assert_eq!(c.read(&mut out), 4);
        assert_eq!(out, data);
    }

    #[test]
    fn write_never_exceeds_capacity() {
        let (mut p, _c) = spsc_ring(4);
        let data = [1.0; 10];
        let written = p.write(&data);
        assert_eq!(written, 4);
        assert!(p.is_full());
    }

    #[test]
    fn read_from_empty_returns_zero() {
        let (_p, mut c) = spsc_ring(4);
        let mut out = [0.0; 4];
        assert_eq!(c.read(&mut out), 0);
    }

    #[test]
    fn available_never_exceeds_capacity_after_interleaved_io() {
        let (mut p, mut c) = spsc_ring(16);
        let chunk = [0.5; 5];
        let mut sink = [0.0; 3];

        for _ in 0..50 {
            p.write(&chunk);
            assert!(c.available() <= c.capacity());
            c.read(&mut sink);
            assert!(c.available() <= c.capacity());
        }
    }

    #[test]
    fn peek_does_not_consume() {
        let (mut p, c) = spsc_ring(8);
        p.write(&[1.0, 2.0, 3.0]);

        let mut out = [0.0; 3];
        assert_eq!(c.peek(&mut out), 3);
        assert_eq!(c.available(), 3);
    }

    #[test]
    fn skip_discards_without_copying() {
        let (mut p, mut c) = spsc_ring(8);
        p.write(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(c.skip(2), 2);
        assert_eq!(c.available(), 2);

        let mut out = [0.0; 2];
        c.read(&mut out);
        assert_eq!(out, [3.0, 4.0]);
    }

    #[test]
    fn flush_discards_everything_buffered() {
        let (mut p, mut c) = spsc_ring(16);
        p.write(&[1.0; 10]);
        let discarded = c.flush();
        assert_eq!(discarded, 10);
        assert!(c.is_empty());
    }

    #[test]
    fn sequence_survives_many_small_writes_and_reads() {
        let (mut p, mut c) = spsc_ring(32);
        let mut expected = Vec::new();
        let mut actual = Vec::new();

        for i in 0..200u32 {
            let v = i as f32;
            p.write(&[v]);
            expected.push(v);
            let mut out = [0.0; 1];
            if c.read(&mut out) == 1 {
                actual.push(out[0]);
            }
        }

        assert_eq!(expected, actual);
    }
}
