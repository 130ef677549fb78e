//! MIDI playback ring
//!
//! Events travel from the butler to the audio thread through an `rtrb`
//! ring, stamped in stream time: the same monotonic position the disk
//! reader's `playback_sample` advances through, loops unrolled. The audio
//! thread reads by time window and owns the note tracker for everything it
//! has emitted.
//!
//! Both ends sit behind a mutex so the butler can drain the ring during a
//! seek. The audio thread only ever `try_lock`s; the transport guarantees
//! the butler holds the reader lock only while playback is not reading.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use rtrb::{Consumer, Producer, RingBuffer};

use rf_core::{MidiBuffer, MidiEvent, NoteStateTracker, SamplePos};

/// Event with an absolute (stream) timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedMidiEvent {
    pub time: SamplePos,
    pub event: MidiEvent,
}

impl TimedMidiEvent {
    pub fn new(time: SamplePos, event: MidiEvent) -> Self {
        Self { time, event }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// READ SIDE (audio thread)
// ═══════════════════════════════════════════════════════════════════════════

pub struct MidiReader {
    consumer: Consumer<TimedMidiEvent>,
    tracker: NoteStateTracker,
    /// Events lost to a full output buffer, collected by the butler
    dropped: Arc<AtomicU64>,
}

impl MidiReader {
    /// Move events timed in `[start, end)` into `dst`, offset so `start`
    /// lands at `offset`. Stops at the first event outside the window.
    pub fn read(&mut self, dst: &mut MidiBuffer, start: SamplePos, end: SamplePos, offset: u32) -> usize {
        let mut moved = 0;
        loop {
            let ev = match self.consumer.peek() {
                Ok(ev) => *ev,
                Err(_) => break,
            };
            if ev.time < start || ev.time >= end {
                break;
            }
            let _ = self.consumer.pop();

            let out = ev.event.at(offset + (ev.time - start) as u32);
            if dst.push(out) {
                self.tracker.track(&out);
                moved += 1;
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        moved
    }

    /// Discard events timed before `start`. Returns how many were dropped.
    pub fn skip_to(&mut self, start: SamplePos) -> usize {
        let mut skipped = 0;
        loop {
            let ev = match self.consumer.peek() {
                Ok(ev) => *ev,
                Err(_) => break,
            };
            if ev.time >= start {
                break;
            }
            let _ = self.consumer.pop();
            // a note-off we skip still ends a note we emitted
            if ev.event.is_note_off() {
                self.tracker.track(&ev.event);
            }
            skipped += 1;
        }
        skipped
    }

    /// Note-offs for everything sounding, at `offset`
    pub fn resolve_tracker(&mut self, dst: &mut MidiBuffer, offset: u32) {
        self.tracker.resolve_into(dst, offset);
    }

    pub fn tracker(&self) -> &NoteStateTracker {
        &self.tracker
    }

    pub fn pending(&self) -> usize {
        self.consumer.slots()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PLAYBACK BUFFER
// ═══════════════════════════════════════════════════════════════════════════

pub struct MidiPlaybackBuffer {
    writer: Mutex<Producer<TimedMidiEvent>>,
    reader: Mutex<MidiReader>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

impl MidiPlaybackBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (producer, consumer) = RingBuffer::new(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        Self {
            writer: Mutex::new(producer),
            reader: Mutex::new(MidiReader {
                consumer,
                tracker: NoteStateTracker::new(),
                dropped: Arc::clone(&dropped),
            }),
            dropped,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Butler: queue one event. False when the ring is full.
    pub fn write(&self, event: TimedMidiEvent) -> bool {
        self.writer.lock().push(event).is_ok()
    }

    /// Butler: free event slots
    pub fn write_space(&self) -> usize {
        self.writer.lock().slots()
    }

    /// Events waiting to be read
    pub fn read_space(&self) -> usize {
        self.reader.lock().pending()
    }

    /// Butler: drop every queued event
    pub fn reset(&self) {
        let mut reader = self.reader.lock();
        while reader.consumer.pop().is_ok() {}
    }

    /// Butler: forget sounding notes without emitting note-offs
    pub fn reset_tracker(&self) {
        self.reader.lock().tracker.reset();
    }

    /// Events the audio thread dropped since the last call
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    /// Audio thread: the read side, unless the butler holds it
    pub fn try_reader(&self) -> Option<MutexGuard<'_, MidiReader>> {
        self.reader.try_lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on(time: SamplePos, note: u8) -> TimedMidiEvent {
        TimedMidiEvent::new(time, MidiEvent::note_on(0, 0, note, 100))
    }

    fn off(time: SamplePos, note: u8) -> TimedMidiEvent {
        TimedMidiEvent::new(time, MidiEvent::note_off(0, 0, note, 0))
    }

    #[test]
    fn test_read_window_offsets() {
        let ring = MidiPlaybackBuffer::new(16);
        ring.write(on(100, 60));
        ring.write(off(150, 60));
        ring.write(on(300, 62));

        let mut dst = MidiBuffer::new();
        let mut reader = ring.try_reader().unwrap();
        assert_eq!(reader.read(&mut dst, 64, 192, 0), 2);

        let offsets: Vec<u32> = dst.events().iter().map(|e| e.sample_offset).collect();
        assert_eq!(offsets, vec![36, 86]);
        assert_eq!(reader.pending(), 1);
        assert_eq!(reader.tracker().on(), 0);
    }

    #[test]
    fn test_skip_to_drops_stale() {
        let ring = MidiPlaybackBuffer::new(16);
        ring.write(on(10, 60));
        ring.write(on(20, 61));
        ring.write(on(500, 62));

        let mut reader = ring.try_reader().unwrap();
        assert_eq!(reader.skip_to(400), 2);
        assert_eq!(reader.pending(), 1);
        assert_eq!(reader.tracker().on(), 0);
    }

    #[test]
    fn test_resolve_after_read() {
        let ring = MidiPlaybackBuffer::new(16);
        ring.write(on(5, 64));

        let mut dst = MidiBuffer::new();
        let mut reader = ring.try_reader().unwrap();
        reader.read(&mut dst, 0, 64, 0);
        reader.resolve_tracker(&mut dst, 63);

        assert_eq!(dst.len(), 2);
        assert!(dst.events()[1].is_note_off());
        assert_eq!(dst.events()[1].sample_offset, 63);
    }

    #[test]
    fn test_reader_busy_while_butler_resets() {
        let ring = MidiPlaybackBuffer::new(4);
        ring.write(on(0, 60));
        {
            let _held = ring.try_reader().unwrap();
            assert!(ring.try_reader().is_none());
        }
        ring.reset();
        assert_eq!(ring.read_space(), 0);
        assert_eq!(ring.write_space(), 4);
    }

    #[test]
    fn test_full_output_counts_drops() {
        let ring = MidiPlaybackBuffer::new(16);
        for i in 0..5 {
            assert!(ring.write(on(i, 60 + i as u8)));
        }

        let mut dst = MidiBuffer::with_capacity(2);
        assert_eq!(ring.try_reader().unwrap().read(&mut dst, 0, 64, 0), 2);
        assert_eq!(ring.take_dropped(), 3);
        assert_eq!(ring.take_dropped(), 0);
    }

    #[test]
    fn test_full_ring_rejects() {
        let ring = MidiPlaybackBuffer::new(2);
        assert!(ring.write(on(0, 60)));
        assert!(ring.write(on(1, 61)));
        assert!(!ring.write(on(2, 62)));
    }
}
