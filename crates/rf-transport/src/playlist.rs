//! Storage collaborators
//!
//! A disk reader pulls material through these traits on the butler thread
//! only; implementations may block on I/O.

use parking_lot::Mutex;

use rf_core::{Gain, MidiEvent, NoteStateTracker, RfResult, Sample, SampleCnt, SamplePos, SampleRange};

use crate::midi_buffer::TimedMidiEvent;

// ═══════════════════════════════════════════════════════════════════════════
// TRAITS
// ═══════════════════════════════════════════════════════════════════════════

/// Audio material source for one track
pub trait AudioPlaylist: Send + Sync {
    fn n_channels(&self) -> usize;

    /// Length of the material in samples
    fn length(&self) -> SampleCnt;

    /// Read `cnt` samples of `channel` starting at `start` into `sum[..cnt]`.
    ///
    /// `mixdown` and `gain` are scratch space of at least `cnt` samples for
    /// implementations that mix or apply envelopes. Positions outside the
    /// material read as silence and still count as read. Returns the number
    /// of samples produced.
    fn read(
        &self,
        sum: &mut [Sample],
        mixdown: &mut [Sample],
        gain: &mut [Gain],
        start: SamplePos,
        cnt: SampleCnt,
        channel: usize,
    ) -> RfResult<SampleCnt>;
}

/// MIDI material source for one track
pub trait MidiPlaylist: Send + Sync {
    /// Deliver events timed in `[start, start + cnt)` in time order.
    /// Returns the number of samples covered.
    fn read(
        &self,
        sink: &mut dyn FnMut(TimedMidiEvent),
        start: SamplePos,
        cnt: SampleCnt,
        loop_range: Option<SampleRange>,
    ) -> RfResult<SampleCnt>;

    /// Emit note-offs at `time` for notes this playlist started but has not
    /// yet ended, then forget them
    fn resolve_note_trackers(&self, _sink: &mut dyn FnMut(TimedMidiEvent), _time: SamplePos) {}

    /// Forget sounding notes without emitting anything
    fn reset_note_trackers(&self) {}
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY AUDIO
// ═══════════════════════════════════════════════════════════════════════════

/// Audio held in memory, one `Vec` per channel
///
/// Channels past the last one repeat the last channel, so mono material
/// feeds every channel of a wider track.
#[derive(Debug, Clone)]
pub struct MemoryPlaylist {
    channels: Vec<Vec<Sample>>,
    length: SampleCnt,
}

impl MemoryPlaylist {
    pub fn new(channels: Vec<Vec<Sample>>) -> Self {
        let length = channels.iter().map(|c| c.len()).max().unwrap_or(0) as SampleCnt;
        Self { channels, length }
    }

    /// `n_channels` of `length` samples generated by `f(channel, position)`
    pub fn from_fn<F: Fn(usize, usize) -> Sample>(n_channels: usize, length: usize, f: F) -> Self {
        Self::new(
            (0..n_channels)
                .map(|c| (0..length).map(|i| f(c, i)).collect())
                .collect(),
        )
    }
}

impl AudioPlaylist for MemoryPlaylist {
    fn n_channels(&self) -> usize {
        self.channels.len()
    }

    fn length(&self) -> SampleCnt {
        self.length
    }

    fn read(
        &self,
        sum: &mut [Sample],
        _mixdown: &mut [Sample],
        _gain: &mut [Gain],
        start: SamplePos,
        cnt: SampleCnt,
        channel: usize,
    ) -> RfResult<SampleCnt> {
        let cnt = (cnt.max(0) as usize).min(sum.len());
        let out = &mut sum[..cnt];

        let Some(data) = self.channels.get(channel).or(self.channels.last()) else {
            out.fill(0.0);
            return Ok(cnt as SampleCnt);
        };

        for (i, s) in out.iter_mut().enumerate() {
            let pos = start + i as SamplePos;
            *s = if pos >= 0 {
                data.get(pos as usize).copied().unwrap_or(0.0)
            } else {
                0.0
            };
        }
        Ok(cnt as SampleCnt)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY MIDI
// ═══════════════════════════════════════════════════════════════════════════

/// Time-sorted MIDI events held in memory
#[derive(Debug, Default)]
pub struct MemoryMidiPlaylist {
    events: Vec<TimedMidiEvent>,
    /// Notes delivered by `read` and still sounding
    tracker: Mutex<NoteStateTracker>,
}

impl MemoryMidiPlaylist {
    pub fn new(mut events: Vec<TimedMidiEvent>) -> Self {
        events.sort_by_key(|e| e.time);
        Self {
            events,
            tracker: Mutex::new(NoteStateTracker::new()),
        }
    }

    pub fn events(&self) -> &[TimedMidiEvent] {
        &self.events
    }
}

impl MidiPlaylist for MemoryMidiPlaylist {
    fn read(
        &self,
        sink: &mut dyn FnMut(TimedMidiEvent),
        start: SamplePos,
        cnt: SampleCnt,
        _loop_range: Option<SampleRange>,
    ) -> RfResult<SampleCnt> {
        if cnt <= 0 {
            return Ok(0);
        }
        let end = start + cnt;
        let first = self.events.partition_point(|e| e.time < start);
        let mut tracker = self.tracker.lock();

        for ev in self.events[first..].iter().take_while(|e| e.time < end) {
            tracker.track(&ev.event);
            sink(*ev);
        }
        Ok(cnt)
    }

    fn resolve_note_trackers(&self, sink: &mut dyn FnMut(TimedMidiEvent), time: SamplePos) {
        self.tracker.lock().resolve_with(0, |event: MidiEvent| {
            sink(TimedMidiEvent { time, event });
        });
    }

    fn reset_note_trackers(&self) {
        self.tracker.lock().reset();
    }
}
