//! Disk streaming and butler configuration

use serde::{Deserialize, Serialize};

use rf_core::{RfError, RfResult};

use crate::declick::DECLICK_COEFFICIENT;

/// Samples per refill chunk
pub const DEFAULT_CHUNK_SAMPLES: usize = 65536;

/// Playback ring buffer size per channel (~5.5s @ 48kHz)
pub const DEFAULT_PLAYBACK_BUFFER_SAMPLES: usize = 262144;

/// Played samples kept behind the read pointer for backwards internal seeks
pub const DEFAULT_RESERVATION_SAMPLES: usize = 8192;

/// MIDI lookahead the butler keeps ahead of playback
pub const DEFAULT_MIDI_READAHEAD: usize = 4096;

/// MIDI playback ring capacity (events)
pub const DEFAULT_MIDI_BUFFER_EVENTS: usize = 8192;

// ═══════════════════════════════════════════════════════════════════════════
// FILE DATA FORMAT
// ═══════════════════════════════════════════════════════════════════════════

/// Native sample format of session audio files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileDataFormat {
    #[default]
    Float,
    Int24,
    Int16,
}

impl FileDataFormat {
    #[inline]
    pub fn bits_per_sample(self) -> usize {
        match self {
            FileDataFormat::Float => 32,
            FileDataFormat::Int24 => 24,
            FileDataFormat::Int16 => 16,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DISK CONFIG
// ═══════════════════════════════════════════════════════════════════════════

/// Per-track disk streaming settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Minimum write space worth a refill
    pub chunk_samples: usize,
    /// Ring buffer size per audio channel
    pub playback_buffer_samples: usize,
    /// History kept behind the read pointer
    pub reservation_samples: usize,
    /// MIDI lookahead in samples
    pub midi_readahead: usize,
    /// MIDI ring capacity in events
    pub midi_buffer_events: usize,
    /// Determines the byte size of refill reads
    pub native_file_format: FileDataFormat,
    /// Ramp disk output on transport changes
    pub use_transport_fades: bool,
    /// Declick ramp numerator (coefficient = k / sample_rate)
    pub declick_coefficient: f32,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            playback_buffer_samples: DEFAULT_PLAYBACK_BUFFER_SAMPLES,
            reservation_samples: DEFAULT_RESERVATION_SAMPLES,
            midi_readahead: DEFAULT_MIDI_READAHEAD,
            midi_buffer_events: DEFAULT_MIDI_BUFFER_EVENTS,
            native_file_format: FileDataFormat::Float,
            use_transport_fades: true,
            declick_coefficient: DECLICK_COEFFICIENT,
        }
    }
}

impl DiskConfig {
    pub fn validate(&self) -> RfResult<()> {
        if self.chunk_samples == 0 {
            return Err(RfError::InvalidParam("chunk_samples must be > 0".into()));
        }
        if self.playback_buffer_samples <= self.chunk_samples * 2 {
            return Err(RfError::InvalidParam(format!(
                "playback buffer ({}) must exceed two chunks ({})",
                self.playback_buffer_samples,
                self.chunk_samples * 2
            )));
        }
        if self.midi_readahead == 0 {
            return Err(RfError::InvalidParam("midi_readahead must be > 0".into()));
        }
        if self.declick_coefficient <= 0.0 {
            return Err(RfError::InvalidParam("declick_coefficient must be > 0".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUTLER CONFIG
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ButlerConfig {
    /// Pending requests before `summon()` starts dropping
    pub request_queue_depth: usize,
    /// Wake-up interval when idle
    pub idle_timeout_ms: u64,
    /// Refill passes per summon before yielding to other requests
    pub max_refill_passes: usize,
}

impl Default for ButlerConfig {
    fn default() -> Self {
        Self {
            request_queue_depth: 64,
            idle_timeout_ms: 100,
            max_refill_passes: 8,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE CONFIG
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub disk: DiskConfig,
    pub butler: ButlerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            disk: DiskConfig::default(),
            butler: ButlerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config. Missing fields take defaults.
    pub fn from_json(json: &str) -> RfResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| RfError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> RfResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| RfError::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> RfResult<()> {
        if self.sample_rate == 0 {
            return Err(RfError::InvalidSampleRate(self.sample_rate));
        }
        if self.butler.request_queue_depth == 0 {
            return Err(RfError::InvalidParam("request_queue_depth must be > 0".into()));
        }
        self.disk.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.disk.chunk_samples, 65536);
        assert_eq!(config.disk.midi_readahead, 4096);
        assert!(config.disk.use_transport_fades);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "sample_rate": 96000, "disk": { "native_file_format": "Int24" } }"#,
        )
        .unwrap();

        assert_eq!(config.sample_rate, 96000);
        assert_eq!(config.disk.native_file_format.bits_per_sample(), 24);
        assert_eq!(config.disk.chunk_samples, DEFAULT_CHUNK_SAMPLES);
        assert_eq!(config.butler, ButlerConfig::default());
    }

    #[test]
    fn test_rejects_small_buffer() {
        let json = r#"{ "disk": { "chunk_samples": 1024, "playback_buffer_samples": 2048 } }"#;
        assert!(matches!(
            EngineConfig::from_json(json),
            Err(RfError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_rejects_zero_rate() {
        assert!(matches!(
            EngineConfig::from_json(r#"{ "sample_rate": 0 }"#),
            Err(RfError::InvalidSampleRate(0))
        ));
    }

    #[test]
    fn test_round_trip_json() {
        let config = EngineConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json("{ not json"),
            Err(RfError::Serialization(_))
        ));
    }
}
