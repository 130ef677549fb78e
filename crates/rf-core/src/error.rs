//! Error types for ReelForge

use thiserror::Error;

use crate::{SampleCnt, SamplePos};

/// Core error type
#[derive(Error, Debug)]
pub enum RfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage read failed at {position} ({count} samples): {reason}")]
    StorageRead {
        position: SamplePos,
        count: SampleCnt,
        reason: String,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Buffer underrun")]
    BufferUnderrun,

    #[error("Buffer overrun")]
    BufferOverrun,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Thread error: {0}")]
    Thread(String),
}

impl RfError {
    /// Short read from a storage collaborator
    pub fn short_read(position: SamplePos, count: SampleCnt, got: SampleCnt) -> Self {
        Self::StorageRead {
            position,
            count,
            reason: format!("got {} samples", got),
        }
    }
}

/// Result type alias
pub type RfResult<T> = Result<T, RfError>;
