//! MIDI Types and Events
//!
//! - Channel voice events with sample-accurate offsets
//! - Fixed-capacity per-cycle event buffer
//! - Note state tracking for stuck-note resolution

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// MIDI CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// MIDI 1.0 status bytes
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_PRESSURE: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;
}

/// Channel-mode controller numbers
pub mod cc {
    /// Ends every note on the channel; the tracker clears on it
    pub const ALL_NOTES_OFF: u8 = 123;
}

/// Velocity used for synthesized note-offs
pub const RESOLVE_VELOCITY: Velocity = 64;

// ═══════════════════════════════════════════════════════════════════════════════
// MIDI TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// MIDI channel (0-15)
pub type MidiChannel = u8;

/// Note number (0-127)
pub type NoteNumber = u8;

/// Velocity (0-127)
pub type Velocity = u8;

/// MIDI event data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiEventData {
    NoteOff { note: NoteNumber, velocity: Velocity },
    /// velocity 0 = note off
    NoteOn { note: NoteNumber, velocity: Velocity },
    PolyPressure { note: NoteNumber, pressure: u8 },
    ControlChange { controller: u8, value: u8 },
    ProgramChange { program: u8 },
    ChannelPressure { pressure: u8 },
    /// -8192 to +8191, center = 0
    PitchBend { value: i16 },
}

/// Sample-accurate MIDI event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    /// Sample offset within the cycle (0 = first frame)
    pub sample_offset: u32,
    pub channel: MidiChannel,
    pub data: MidiEventData,
}

impl MidiEvent {
    pub fn note_on(sample_offset: u32, channel: MidiChannel, note: NoteNumber, velocity: Velocity) -> Self {
        Self {
            sample_offset,
            channel,
            data: MidiEventData::NoteOn { note, velocity },
        }
    }

    pub fn note_off(sample_offset: u32, channel: MidiChannel, note: NoteNumber, velocity: Velocity) -> Self {
        Self {
            sample_offset,
            channel,
            data: MidiEventData::NoteOff { note, velocity },
        }
    }

    pub fn control_change(sample_offset: u32, channel: MidiChannel, controller: u8, value: u8) -> Self {
        Self {
            sample_offset,
            channel,
            data: MidiEventData::ControlChange { controller, value },
        }
    }

    /// Same event at a different offset
    #[inline]
    pub fn at(self, sample_offset: u32) -> Self {
        Self { sample_offset, ..self }
    }

    /// Raw status byte
    pub fn status(&self) -> u8 {
        let kind = match self.data {
            MidiEventData::NoteOff { .. } => status::NOTE_OFF,
            MidiEventData::NoteOn { .. } => status::NOTE_ON,
            MidiEventData::PolyPressure { .. } => status::POLY_PRESSURE,
            MidiEventData::ControlChange { .. } => status::CONTROL_CHANGE,
            MidiEventData::ProgramChange { .. } => status::PROGRAM_CHANGE,
            MidiEventData::ChannelPressure { .. } => status::CHANNEL_PRESSURE,
            MidiEventData::PitchBend { .. } => status::PITCH_BEND,
        };
        kind | (self.channel & 0x0F)
    }

    /// Note number for note events
    pub fn note(&self) -> Option<NoteNumber> {
        match self.data {
            MidiEventData::NoteOn { note, .. } | MidiEventData::NoteOff { note, .. } => Some(note),
            _ => None,
        }
    }

    /// Note on with velocity > 0
    pub fn is_note_on(&self) -> bool {
        matches!(self.data, MidiEventData::NoteOn { velocity, .. } if velocity > 0)
    }

    /// Note off (or note on with velocity 0)
    pub fn is_note_off(&self) -> bool {
        matches!(
            self.data,
            MidiEventData::NoteOff { .. } | MidiEventData::NoteOn { velocity: 0, .. }
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MIDI BUFFER
// ═══════════════════════════════════════════════════════════════════════════════

/// Default events per buffer
pub const MAX_MIDI_EVENTS_PER_BUFFER: usize = 1024;

/// MIDI event buffer for a single processing cycle
///
/// Capacity is fixed at construction; `push` past capacity drops the event
/// so the audio thread never reallocates.
#[derive(Debug, Clone)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
    capacity: usize,
}

impl MidiBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MAX_MIDI_EVENTS_PER_BUFFER)
    }

    pub fn with_capacity(event_capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(event_capacity),
            capacity: event_capacity,
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Add an event. Returns false when the buffer is full.
    #[inline]
    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() < self.capacity {
            self.events.push(event);
            true
        } else {
            false
        }
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stable sort by sample offset
    pub fn sort_by_time(&mut self) {
        self.events.sort_by_key(|e| e.sample_offset);
    }

    /// Merge another buffer into this one, keeping time order
    pub fn merge(&mut self, other: &MidiBuffer) {
        for event in &other.events {
            self.push(*event);
        }
        self.sort_by_time();
    }
}

impl Default for MidiBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MIDI NOTE STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Counts sounding notes per (channel, note)
///
/// Repeated note-ons stack, so resolving emits one note-off per outstanding
/// note-on.
#[derive(Debug, Clone)]
pub struct NoteStateTracker {
    /// 16 channels × 128 notes
    active: [[u8; 128]; 16],
    on: usize,
}

impl NoteStateTracker {
    pub fn new() -> Self {
        Self {
            active: [[0; 128]; 16],
            on: 0,
        }
    }

    /// Update state from an outgoing event
    pub fn track(&mut self, event: &MidiEvent) {
        if event.channel >= 16 {
            return;
        }
        let ch = event.channel as usize;

        match event.data {
            MidiEventData::NoteOn { note, velocity } if velocity > 0 => self.add(ch, note),
            MidiEventData::NoteOn { note, .. } | MidiEventData::NoteOff { note, .. } => {
                self.remove(ch, note)
            }
            MidiEventData::ControlChange { controller, .. } if controller == cc::ALL_NOTES_OFF => {
                let cleared: usize = self.active[ch].iter().map(|&n| n as usize).sum();
                self.active[ch] = [0; 128];
                self.on -= cleared;
            }
            _ => {}
        }
    }

    fn add(&mut self, ch: usize, note: NoteNumber) {
        if let Some(slot) = self.active[ch].get_mut(note as usize) {
            if *slot < u8::MAX {
                *slot += 1;
                self.on += 1;
            }
        }
    }

    fn remove(&mut self, ch: usize, note: NoteNumber) {
        if let Some(slot) = self.active[ch].get_mut(note as usize) {
            if *slot > 0 {
                *slot -= 1;
                self.on -= 1;
            }
        }
    }

    pub fn is_note_on(&self, channel: MidiChannel, note: NoteNumber) -> bool {
        channel < 16 && note < 128 && self.active[channel as usize][note as usize] > 0
    }

    /// Number of outstanding note-ons
    pub fn on(&self) -> usize {
        self.on
    }

    /// Emit a note-off for every outstanding note-on, then clear
    pub fn resolve_with<F: FnMut(MidiEvent)>(&mut self, sample_offset: u32, mut emit: F) {
        if self.on == 0 {
            return;
        }
        for (channel, notes) in self.active.iter_mut().enumerate() {
            for (note, count) in notes.iter_mut().enumerate() {
                for _ in 0..*count {
                    emit(MidiEvent::note_off(
                        sample_offset,
                        channel as MidiChannel,
                        note as NoteNumber,
                        RESOLVE_VELOCITY,
                    ));
                }
                *count = 0;
            }
        }
        self.on = 0;
    }

    /// Resolve into a cycle buffer
    pub fn resolve_into(&mut self, dst: &mut MidiBuffer, sample_offset: u32) {
        self.resolve_with(sample_offset, |ev| {
            dst.push(ev);
        });
    }

    /// Forget all notes without emitting anything
    pub fn reset(&mut self) {
        self.active = [[0; 128]; 16];
        self.on = 0;
    }
}

impl Default for NoteStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
