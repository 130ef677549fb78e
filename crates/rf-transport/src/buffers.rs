//! Buffers handed to the disk reader
//!
//! `BufferSet` is the per-cycle I/O of the audio callback, sized once up
//! front. `RefillBuffers` is the butler's working memory for storage reads;
//! each owner holds its own so no two refills ever share scratch space.

use rf_core::{Gain, MidiBuffer, Sample};

/// Largest single storage read, in samples
pub const MAX_REFILL_SAMPLES: usize = 2 * 1_048_576;

// ═══════════════════════════════════════════════════════════════════════════
// CYCLE BUFFERS (audio thread)
// ═══════════════════════════════════════════════════════════════════════════

/// Audio and MIDI buffers for one process cycle
#[derive(Debug, Clone)]
pub struct BufferSet {
    audio: Vec<Vec<Sample>>,
    /// One per output; disk channels folded onto an output share its slot
    scratch: Vec<Vec<Sample>>,
    midi: MidiBuffer,
    scratch_midi: MidiBuffer,
    max_frames: usize,
}

impl BufferSet {
    /// `n_audio` output channels of `max_frames` each, one MIDI port
    pub fn new(n_audio: usize, max_frames: usize) -> Self {
        Self {
            audio: vec![vec![0.0; max_frames]; n_audio],
            scratch: vec![vec![0.0; max_frames]; n_audio],
            midi: MidiBuffer::new(),
            scratch_midi: MidiBuffer::new(),
            max_frames,
        }
    }

    #[inline]
    pub fn n_audio(&self) -> usize {
        self.audio.len()
    }

    #[inline]
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn audio(&self, channel: usize) -> &[Sample] {
        &self.audio[channel]
    }

    pub fn audio_mut(&mut self, channel: usize) -> &mut [Sample] {
        &mut self.audio[channel]
    }

    pub fn midi(&self) -> &MidiBuffer {
        &self.midi
    }

    pub fn midi_mut(&mut self) -> &mut MidiBuffer {
        &mut self.midi
    }

    /// Zero the first `nframes` of every audio output
    pub fn silence(&mut self, nframes: usize) {
        for buf in &mut self.audio {
            let n = nframes.min(buf.len());
            buf[..n].fill(0.0);
        }
    }

    /// Disjoint borrows for the disk reader's channel loop
    pub(crate) fn split_audio(&mut self) -> (&mut [Vec<Sample>], &mut [Vec<Sample>]) {
        (&mut self.audio, &mut self.scratch)
    }

    pub(crate) fn split_midi(&mut self) -> (&mut MidiBuffer, &mut MidiBuffer) {
        (&mut self.midi, &mut self.scratch_midi)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// REFILL BUFFERS (butler)
// ═══════════════════════════════════════════════════════════════════════════

/// Working memory for playlist reads
#[derive(Debug)]
pub struct RefillBuffers {
    pub(crate) sum: Vec<Sample>,
    pub(crate) mixdown: Vec<Sample>,
    pub(crate) gain: Vec<Gain>,
}

impl RefillBuffers {
    /// Buffers for the largest refill read
    pub fn new() -> Self {
        Self::with_capacity(MAX_REFILL_SAMPLES)
    }

    pub fn with_capacity(samples: usize) -> Self {
        Self {
            sum: vec![0.0; samples],
            mixdown: vec![0.0; samples],
            gain: vec![0.0; samples],
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.sum.len()
    }

    /// Grow to at least `samples`
    pub fn reserve(&mut self, samples: usize) {
        if self.sum.len() < samples {
            self.sum.resize(samples, 0.0);
            self.mixdown.resize(samples, 0.0);
            self.gain.resize(samples, 0.0);
        }
    }
}

impl Default for RefillBuffers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_respects_length() {
        let mut bufs = BufferSet::new(2, 8);
        bufs.audio_mut(0).fill(1.0);
        bufs.audio_mut(1).fill(1.0);
        bufs.silence(4);

        assert_eq!(&bufs.audio(0)[..4], &[0.0; 4]);
        assert_eq!(&bufs.audio(0)[4..], &[1.0; 4]);
        bufs.silence(100);
        assert!(bufs.audio(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_refill_reserve_grows_only() {
        let mut refill = RefillBuffers::with_capacity(16);
        refill.reserve(8);
        assert_eq!(refill.capacity(), 16);
        refill.reserve(64);
        assert_eq!(refill.capacity(), 64);
    }
}
