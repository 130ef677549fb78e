//! Loop range shared between the session, butler and audio thread

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use rf_core::{SamplePos, SampleRange};

/// Retries before a reader gives up on a torn snapshot
const SNAPSHOT_RETRIES: usize = 8;

/// Atomically published loop range
///
/// Start and end are written under a sequence counter so readers always see
/// a matching pair.
#[derive(Debug, Default)]
pub struct LoopLocation {
    seq: AtomicU32,
    enabled: AtomicBool,
    start: AtomicI64,
    end: AtomicI64,
}

impl LoopLocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set and enable the loop. Ignored for an empty range.
    pub fn set(&self, start: SamplePos, end: SamplePos) {
        if end <= start {
            log::warn!("Ignoring empty loop range {}..{}", start, end);
            return;
        }
        self.seq.fetch_add(1, Ordering::AcqRel);
        self.start.store(start, Ordering::Release);
        self.end.store(end, Ordering::Release);
        self.enabled.store(true, Ordering::Release);
        self.seq.fetch_add(1, Ordering::AcqRel);
    }

    pub fn clear(&self) {
        self.seq.fetch_add(1, Ordering::AcqRel);
        self.enabled.store(false, Ordering::Release);
        self.seq.fetch_add(1, Ordering::AcqRel);
    }

    /// Current loop range, if looping is enabled
    pub fn region(&self) -> Option<SampleRange> {
        let mut snapshot = None;
        for _ in 0..SNAPSHOT_RETRIES {
            let before = self.seq.load(Ordering::Acquire);
            let enabled = self.enabled.load(Ordering::Acquire);
            let start = self.start.load(Ordering::Acquire);
            let end = self.end.load(Ordering::Acquire);
            let after = self.seq.load(Ordering::Acquire);

            snapshot = enabled.then_some(SampleRange::new(start, end));
            if before == after && before % 2 == 0 {
                break;
            }
            std::hint::spin_loop();
        }
        snapshot.filter(|r| !r.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        assert_eq!(LoopLocation::new().region(), None);
    }

    #[test]
    fn test_set_and_clear() {
        let location = LoopLocation::new();
        location.set(1000, 2000);
        assert_eq!(location.region(), Some(SampleRange::new(1000, 2000)));

        location.clear();
        assert_eq!(location.region(), None);
    }

    #[test]
    fn test_empty_range_ignored() {
        let location = LoopLocation::new();
        location.set(500, 500);
        assert_eq!(location.region(), None);
    }
}
