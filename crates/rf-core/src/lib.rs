//! rf-core: Shared types for the ReelForge transport and streaming crates
//!
//! Sample and timeline aliases, the MIDI event model with its per-cycle
//! buffer and note tracking, and the common error type.

mod error;
mod midi;
mod sample;
mod time;

pub use error::*;
pub use midi::*;
pub use sample::*;
pub use time::*;
