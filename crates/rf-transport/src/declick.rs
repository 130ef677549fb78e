//! Declick amplifier
//!
//! Exponential gain ramp applied to disk output when transport starts,
//! stops or changes speed:
//!
//!   g = g + a * (target - g),   a = k / sample_rate
//!
//! The gain is updated once per 16-sample sub-block and snaps to the target
//! once within `SNAP_THRESHOLD`. It is mutated only on the audio thread but
//! published as f32 bits so the butler can poll `in_progress()`.

use std::sync::atomic::{AtomicU32, Ordering};

use rf_core::{Gain, Sample, apply_simple_gain};

/// Default ramp coefficient numerator
pub const DECLICK_COEFFICIENT: f32 = 4550.0;

/// Samples per gain update
pub const DECLICK_SUB_BLOCK: usize = 16;

/// Distance at which the ramp is considered done
const SNAP_THRESHOLD: f32 = 1e-5;

#[derive(Debug)]
pub struct DeclickAmp {
    a: f32,
    gain_bits: AtomicU32,
}

impl DeclickAmp {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_coefficient(sample_rate, DECLICK_COEFFICIENT)
    }

    pub fn with_coefficient(sample_rate: u32, k: f32) -> Self {
        Self {
            a: k / sample_rate.max(1) as f32,
            gain_bits: AtomicU32::new(0.0f32.to_bits()),
        }
    }

    /// Per-step smoothing factor
    #[inline]
    pub fn coefficient(&self) -> f32 {
        self.a
    }

    #[inline]
    pub fn gain(&self) -> Gain {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_gain(&self, gain: Gain) {
        self.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// A fade-out has not finished yet
    #[inline]
    pub fn in_progress(&self) -> bool {
        self.gain() != 0.0
    }

    /// Ramp `buf` from the current gain toward `target` and keep the result
    pub fn apply_gain(&self, buf: &mut [Sample], target: Gain) {
        let g = self.ramp(self.gain(), buf, target);
        self.set_gain(g);
    }

    /// Ramp `buf` starting at `g` without touching the stored gain.
    /// Returns the gain reached at the end of the block.
    ///
    /// Multi-channel callers ramp every channel from the same start and
    /// store the result once.
    pub fn ramp(&self, mut g: Gain, buf: &mut [Sample], target: Gain) -> Gain {
        if buf.is_empty() {
            return g;
        }
        if g == target {
            apply_simple_gain(buf, target);
            return g;
        }

        for block in buf.chunks_mut(DECLICK_SUB_BLOCK) {
            for s in block.iter_mut() {
                *s *= g;
            }
            g += self.a * (target - g);
        }

        if (g - target).abs() < SNAP_THRESHOLD {
            target
        } else {
            g
        }
    }
}
