//! Single-producer single-consumer playback ring buffer
//!
//! Producer: butler thread (writes samples read from storage)
//! Consumer: audio callback (reads for playback)
//!
//! The consumer keeps a window of already-played data behind the read
//! pointer (the reservation) so short backwards seeks can be served without
//! going back to disk. The producer never overwrites that window.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free SPSC buffer with sample-accurate space queries and pointer seek
pub struct PlaybackBuffer<T> {
    data: Box<[UnsafeCell<T>]>,
    size: usize,
    size_mask: usize,
    /// Upper bound of played data kept behind the read pointer
    reservation: usize,
    /// Next slot to write (producer only)
    write_idx: AtomicUsize,
    /// Next slot to read (consumer only)
    read_idx: AtomicUsize,
    /// Valid played data currently behind the read pointer (consumer only)
    reserved: AtomicUsize,
    /// Written past write_idx but not yet published (producer only)
    staged: AtomicUsize,
}

// SAFETY: slots between read_idx and write_idx belong to the consumer, the
// rest to the producer; indices are published with release/acquire pairs.
unsafe impl<T: Send> Send for PlaybackBuffer<T> {}
unsafe impl<T: Send> Sync for PlaybackBuffer<T> {}

impl<T: Copy + Default> PlaybackBuffer<T> {
    /// Buffer holding at least `capacity - 1` items, no history
    pub fn new(capacity: usize) -> Self {
        Self::with_reservation(capacity, 0)
    }

    /// Buffer that keeps up to `reservation` played items for backwards seeks.
    /// Capacity is rounded up to a power of two.
    pub fn with_reservation(capacity: usize, reservation: usize) -> Self {
        let size = capacity.max(2).next_power_of_two();
        let data = (0..size)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            data,
            size,
            size_mask: size - 1,
            reservation: reservation.min(size / 2),
            write_idx: AtomicUsize::new(0),
            read_idx: AtomicUsize::new(0),
            reserved: AtomicUsize::new(0),
            staged: AtomicUsize::new(0),
        }
    }

    /// Total slots (power of two)
    #[inline]
    pub fn bufsize(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn reservation_size(&self) -> usize {
        self.reservation
    }

    #[inline]
    pub fn read_ptr(&self) -> usize {
        self.read_idx.load(Ordering::Acquire)
    }

    #[inline]
    pub fn write_ptr(&self) -> usize {
        self.write_idx.load(Ordering::Acquire)
    }

    /// Items available to the consumer
    #[inline]
    pub fn read_space(&self) -> usize {
        let w = self.write_idx.load(Ordering::Acquire);
        let r = self.read_idx.load(Ordering::Acquire);
        w.wrapping_sub(r) & self.size_mask
    }

    /// Items the producer may write without touching unread or reserved data.
    /// One slot stays free to distinguish full from empty.
    #[inline]
    pub fn write_space(&self) -> usize {
        // read_idx before reserved: a newer read_idx implies a newer reserved
        let r = self.read_idx.load(Ordering::Acquire);
        let reserved = self.reserved.load(Ordering::Acquire);
        let w = self.write_idx.load(Ordering::Relaxed);
        let used = w.wrapping_sub(r) & self.size_mask;
        (self.size - 1).saturating_sub(used + reserved)
    }

    /// Played items that can be stepped back over
    #[inline]
    pub fn reserved_space(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    #[inline]
    fn slot(&self, idx: usize) -> *mut T {
        self.data[idx & self.size_mask].get()
    }

    /// Consumer: copy up to `dst.len()` items out and advance.
    /// Returns the number of items read.
    pub fn read(&self, dst: &mut [T]) -> usize {
        let n = dst.len().min(self.read_space());
        let r = self.read_idx.load(Ordering::Relaxed);

        for (i, d) in dst[..n].iter_mut().enumerate() {
            // SAFETY: r..r+n is readable, the producer does not touch it
            *d = unsafe { *self.slot(r + i) };
        }

        self.commit_read(r, n);
        n
    }

    /// Consumer: copy items starting `offset` past the read pointer without
    /// advancing.
    pub fn read_at(&self, dst: &mut [T], offset: usize) -> usize {
        let avail = self.read_space();
        if offset >= avail {
            return 0;
        }
        let n = dst.len().min(avail - offset);
        let r = self.read_idx.load(Ordering::Relaxed) + offset;

        for (i, d) in dst[..n].iter_mut().enumerate() {
            // SAFETY: still inside the readable region
            *d = unsafe { *self.slot(r + i) };
        }
        n
    }

    /// Consumer: skip forward up to `n` items
    pub fn increment_read_ptr(&self, n: usize) -> usize {
        let n = n.min(self.read_space());
        let r = self.read_idx.load(Ordering::Relaxed);
        self.commit_read(r, n);
        n
    }

    /// Consumer: step back over up to `n` reserved items
    pub fn decrement_read_ptr(&self, n: usize) -> usize {
        let reserved = self.reserved.load(Ordering::Relaxed);
        let n = n.min(reserved);
        if n == 0 {
            return 0;
        }
        let r = self.read_idx.load(Ordering::Relaxed);
        // read_idx before reserved: a stale reserved only shrinks write space
        self.read_idx
            .store(r.wrapping_sub(n) & self.size_mask, Ordering::Release);
        self.reserved.store(reserved - n, Ordering::Release);
        n
    }

    /// Whether a relative read pointer move stays inside valid data
    pub fn can_seek(&self, distance: i64) -> bool {
        if distance >= 0 {
            distance as u64 <= self.read_space() as u64
        } else {
            distance.unsigned_abs() <= self.reserved_space() as u64
        }
    }

    fn commit_read(&self, r: usize, n: usize) {
        if n == 0 {
            return;
        }
        let reserved = self.reserved.load(Ordering::Relaxed);
        // reserved before read_idx so the producer never sees the new read
        // position with the old, smaller history
        self.reserved
            .store((reserved + n).min(self.reservation), Ordering::Release);
        self.read_idx.store((r + n) & self.size_mask, Ordering::Release);
    }

    /// Producer: copy items in and publish them. Returns the number written.
    pub fn write(&self, src: &[T]) -> usize {
        let n = self.stage(src);
        self.commit_staged();
        n
    }

    /// Producer: copy items in without making them readable yet.
    /// Successive stages append; `commit_staged` publishes them all.
    pub fn stage(&self, src: &[T]) -> usize {
        let staged = self.staged.load(Ordering::Relaxed);
        let n = src.len().min(self.write_space().saturating_sub(staged));
        let w = self.write_idx.load(Ordering::Relaxed) + staged;

        for (i, s) in src[..n].iter().enumerate() {
            // SAFETY: w..w+n is free, the consumer does not touch it
            unsafe { *self.slot(w + i) = *s };
        }

        self.staged.store(staged + n, Ordering::Relaxed);
        n
    }

    /// Producer: items staged but not yet published
    #[inline]
    pub fn staged(&self) -> usize {
        self.staged.load(Ordering::Relaxed)
    }

    /// Producer: make staged items readable
    pub fn commit_staged(&self) {
        let staged = self.staged.swap(0, Ordering::Relaxed);
        if staged > 0 {
            let w = self.write_idx.load(Ordering::Relaxed);
            self.write_idx
                .store((w + staged) & self.size_mask, Ordering::Release);
        }
    }

    /// Producer: forget staged items
    pub fn discard_staged(&self) {
        self.staged.store(0, Ordering::Relaxed);
    }

    /// Producer: write and publish `n` default (silent) items
    pub fn write_zero(&self, n: usize) -> usize {
        let staged = self.staged.load(Ordering::Relaxed);
        let n = n.min(self.write_space().saturating_sub(staged));
        let w = self.write_idx.load(Ordering::Relaxed) + staged;

        for i in 0..n {
            // SAFETY: as in stage()
            unsafe { *self.slot(w + i) = T::default() };
        }

        self.staged.store(staged + n, Ordering::Relaxed);
        self.commit_staged();
        n
    }

    /// Consumer: discard everything unread and the history
    pub fn read_flush(&self) {
        let w = self.write_idx.load(Ordering::Acquire);
        self.reserved.store(0, Ordering::Release);
        self.read_idx.store(w, Ordering::Release);
    }

    /// Empty the buffer. Only valid while neither side is active.
    pub fn reset(&self) {
        self.staged.store(0, Ordering::Relaxed);
        self.reserved.store(0, Ordering::Release);
        self.read_idx.store(0, Ordering::Release);
        self.write_idx.store(0, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_basic() {
        let rb = PlaybackBuffer::<f32>::new(1024);

        assert_eq!(rb.bufsize(), 1024);
        assert_eq!(rb.read_space(), 0);
        assert_eq!(rb.write_space(), 1023);

        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        assert_eq!(rb.write(&input), 100);
        assert_eq!(rb.read_space(), 100);

        let mut output = vec![0.0f32; 100];
        assert_eq!(rb.read(&mut output), 100);
        assert_eq!(output, input);
        assert_eq!(rb.read_space(), 0);
    }

    #[test]
    fn test_short_read_leaves_nothing_behind() {
        let rb = PlaybackBuffer::<f32>::new(1024);
        rb.write(&[1.0; 100]);

        let mut output = vec![0.0f32; 200];
        assert_eq!(rb.read(&mut output), 100);
        assert_eq!(rb.read_ptr(), 100);
        assert_eq!(&output[100..], &[0.0; 100][..]);
    }

    #[test]
    fn test_wraparound() {
        let rb = PlaybackBuffer::<f32>::new(8);
        let mut out = [0.0f32; 5];

        rb.write(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        rb.read(&mut out);
        assert_eq!(rb.write(&[6.0, 7.0, 8.0, 9.0, 10.0, 11.0]), 6);
        assert_eq!(rb.read_space(), 6);

        let mut out = [0.0f32; 6];
        assert_eq!(rb.read(&mut out), 6);
        assert_eq!(out, [6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_read_at_does_not_advance() {
        let rb = PlaybackBuffer::<f32>::new(16);
        rb.write(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        let mut out = [0.0f32; 3];
        assert_eq!(rb.read_at(&mut out, 2), 3);
        assert_eq!(out, [2.0, 3.0, 4.0]);
        assert_eq!(rb.read_space(), 6);

        assert_eq!(rb.read_at(&mut out, 5), 1);
        assert_eq!(rb.read_at(&mut out, 6), 0);
    }

    #[test]
    fn test_reservation_limits_write_space() {
        let rb = PlaybackBuffer::<f32>::with_reservation(16, 4);
        assert_eq!(rb.write_space(), 15);

        rb.write(&[1.0; 10]);
        let mut out = [0.0f32; 6];
        rb.read(&mut out);

        // 4 unread + 4 kept behind the read pointer
        assert_eq!(rb.reserved_space(), 4);
        assert_eq!(rb.write_space(), 15 - 4 - 4);
    }

    #[test]
    fn test_decrement_read_ptr() {
        let rb = PlaybackBuffer::<f32>::with_reservation(16, 4);
        rb.write(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        rb.increment_read_ptr(6);

        assert!(rb.can_seek(-4));
        assert!(!rb.can_seek(-5));
        assert!(rb.can_seek(2));
        assert!(!rb.can_seek(3));

        assert_eq!(rb.decrement_read_ptr(3), 3);
        let mut out = [0.0f32; 2];
        rb.read(&mut out);
        assert_eq!(out, [3.0, 4.0]);
    }

    #[test]
    fn test_write_zero_and_flush() {
        let rb = PlaybackBuffer::<f32>::new(16);
        rb.write(&[9.0; 4]);
        assert_eq!(rb.write_zero(4), 4);

        let mut out = [1.0f32; 8];
        rb.read(&mut out);
        assert_eq!(&out[4..], &[0.0; 4]);

        rb.write(&[3.0; 5]);
        rb.read_flush();
        assert_eq!(rb.read_space(), 0);
        assert_eq!(rb.reserved_space(), 0);
    }

    #[test]
    fn test_staged_writes_publish_on_commit() {
        let rb = PlaybackBuffer::<f32>::new(16);
        assert_eq!(rb.stage(&[1.0, 2.0]), 2);
        assert_eq!(rb.stage(&[3.0]), 1);
        assert_eq!(rb.read_space(), 0);
        assert_eq!(rb.staged(), 3);

        rb.commit_staged();
        let mut out = [0.0f32; 3];
        assert_eq!(rb.read(&mut out), 3);
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_discard_staged() {
        let rb = PlaybackBuffer::<f32>::new(16);
        rb.write(&[7.0]);
        rb.stage(&[1.0; 10]);
        rb.discard_staged();
        rb.commit_staged();

        assert_eq!(rb.read_space(), 1);
        assert_eq!(rb.write_space(), 14);
    }

    #[test]
    fn test_reset() {
        let rb = PlaybackBuffer::<f32>::with_reservation(32, 8);
        rb.write(&[1.0; 20]);
        rb.increment_read_ptr(10);
        rb.reset();

        assert_eq!(rb.read_ptr(), 0);
        assert_eq!(rb.write_ptr(), 0);
        assert_eq!(rb.write_space(), 31);
    }
}
