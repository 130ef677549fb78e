//! Timeline positions and ranges

use serde::{Deserialize, Serialize};

/// Absolute sample position on the timeline (may be negative before zero)
pub type SamplePos = i64;

/// Signed sample count / distance
pub type SampleCnt = i64;

/// Largest representable timeline position
pub const MAX_SAMPLEPOS: SamplePos = i64::MAX;

/// Half-open sample range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRange {
    pub start: SamplePos,
    pub end: SamplePos,
}

impl SampleRange {
    #[inline]
    pub const fn new(start: SamplePos, end: SamplePos) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn length(&self) -> SampleCnt {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    #[inline]
    pub fn contains(&self, pos: SamplePos) -> bool {
        pos >= self.start && pos < self.end
    }

    /// Fold a position at or past `end` back into the range, as a loop
    /// would. Positions before `end` are returned unchanged.
    #[inline]
    pub fn squish(&self, pos: SamplePos) -> SamplePos {
        if pos >= self.end && !self.is_empty() {
            self.start + (pos - self.start) % self.length()
        } else {
            pos
        }
    }
}
