//! rf-transport: Transport control and disk streaming
//!
//! Provides:
//! - Transport state machine driving an injected transport API
//! - Per-track disk readers with lock-free playback buffers
//! - Declicked start/stop, reverse play and loop wrap
//! - MIDI playback ring with note tracking across loop seams
//! - Butler thread for all storage I/O
//! - Non-blocking underrun notification

// Sample loops index several buffers in lockstep
#![allow(clippy::needless_range_loop)]
// Refill and process entry points carry the whole cycle context
#![allow(clippy::too_many_arguments)]

// Lock-free primitives
mod counters;
mod declick;
mod ring_buffer;
mod signal;

// Shared session state
mod config;
mod location;
mod session;

// Storage
mod buffers;
mod midi_buffer;
mod playlist;
mod wav_playlist;

// Engine
mod butler;
mod disk_reader;
mod transport_fsm;

pub use buffers::*;
pub use butler::*;
pub use config::*;
pub use counters::*;
pub use declick::*;
pub use disk_reader::{DataType, DiskContext, DiskReader};
pub use location::*;
pub use midi_buffer::*;
pub use playlist::*;
pub use ring_buffer::*;
pub use session::*;
pub use signal::*;
pub use transport_fsm::*;
pub use wav_playlist::*;
