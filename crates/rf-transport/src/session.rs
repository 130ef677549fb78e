//! Session-wide flags read by every disk reader
//!
//! All fields are atomics: the session owner writes them, the audio thread
//! and butler read them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// ═══════════════════════════════════════════════════════════════════════════
// MONITOR STATE
// ═══════════════════════════════════════════════════════════════════════════

/// What a track is monitoring this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MonitorState {
    Silence = 0,
    Input = 1,
    #[default]
    Disk = 2,
    /// Input and disk together
    Cue = 3,
}

impl MonitorState {
    #[inline]
    pub fn disk(self) -> bool {
        (self as u8) & (MonitorState::Disk as u8) != 0
    }

    #[inline]
    pub fn input(self) -> bool {
        (self as u8) & (MonitorState::Input as u8) != 0
    }

    /// Same state with disk monitoring forced on
    #[inline]
    pub fn with_disk(self) -> Self {
        Self::from((self as u8) | (MonitorState::Disk as u8))
    }
}

impl From<u8> for MonitorState {
    fn from(value: u8) -> Self {
        match value & 0x03 {
            1 => MonitorState::Input,
            2 => MonitorState::Disk,
            3 => MonitorState::Cue,
            _ => MonitorState::Silence,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SESSION STATE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct SessionState {
    sample_rate: u32,
    /// Bulk load in progress; refills are pointless until it ends
    loading: AtomicBool,
    /// f64 bits
    transport_speed: AtomicU64,
    /// A locate has been requested but not yet completed
    locate_pending: AtomicBool,
    /// Disk-monitored output is muted session-wide
    no_disk_output: AtomicBool,
}

impl SessionState {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            loading: AtomicBool::new(false),
            transport_speed: AtomicU64::new(0.0f64.to_bits()),
            locate_pending: AtomicBool::new(false),
            no_disk_output: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::Release);
    }

    #[inline]
    pub fn transport_speed(&self) -> f64 {
        f64::from_bits(self.transport_speed.load(Ordering::Acquire))
    }

    pub fn set_transport_speed(&self, speed: f64) {
        self.transport_speed.store(speed.to_bits(), Ordering::Release);
    }

    /// Playing backwards
    #[inline]
    pub fn reversed(&self) -> bool {
        self.transport_speed() < 0.0
    }

    #[inline]
    pub fn locate_pending(&self) -> bool {
        self.locate_pending.load(Ordering::Acquire)
    }

    pub fn set_locate_pending(&self, pending: bool) {
        self.locate_pending.store(pending, Ordering::Release);
    }

    #[inline]
    pub fn no_disk_output(&self) -> bool {
        self.no_disk_output.load(Ordering::Acquire)
    }

    pub fn set_no_disk_output(&self, muted: bool) {
        self.no_disk_output.store(muted, Ordering::Release);
    }
}
