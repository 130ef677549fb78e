//! MIDI read/write sample counters
//!
//! The butler adds to `written` after each MIDI refill, the audio thread
//! adds to `read` every cycle. Both wrap at `u32::MAX`; their difference is
//! taken with wrapping subtraction and interpreted as signed, so it stays
//! correct across wraparound as long as the two never drift more than
//! `i32::MAX` samples apart.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct MidiCounters {
    read: AtomicU32,
    written: AtomicU32,
}

impl MidiCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audio thread
    #[inline]
    pub fn add_read(&self, samples: u32) {
        self.read.fetch_add(samples, Ordering::AcqRel);
    }

    /// Butler thread
    #[inline]
    pub fn add_written(&self, samples: u32) {
        self.written.fetch_add(samples, Ordering::AcqRel);
    }

    #[inline]
    pub fn read(&self) -> u32 {
        self.read.load(Ordering::Acquire)
    }

    #[inline]
    pub fn written(&self) -> u32 {
        self.written.load(Ordering::Acquire)
    }

    /// Written minus read. Negative when the reader has overtaken the writer.
    #[inline]
    pub fn lookahead(&self) -> i64 {
        let read = self.read();
        let written = self.written();
        written.wrapping_sub(read) as i32 as i64
    }

    /// Nothing has been consumed since the last reset
    #[inline]
    pub fn nothing_read(&self) -> bool {
        self.read() == 0
    }

    /// Zero both sides. Only while the audio thread is not reading.
    pub fn reset(&self) {
        self.read.store(0, Ordering::Release);
        self.written.store(0, Ordering::Release);
    }
}
