//! Sampled audio playback.
//!
//! This module provides the piano engine and its parts:
//! - Lazy sample loading and decoding on the rayon pool
//! - One voice per note with a linear release fade
//! - A shared mixing bus played through rodio, with a recording tap

pub mod bus;
pub mod engine;
pub mod output;
pub mod samples;
pub mod voices;

pub use bus::{Bus, StreamFormat};
pub use engine::{ActiveKeys, KeyIndicator, NoIndicator, Piano};
pub use samples::{DirectorySource, MemorySource, SampleBuffer, SampleSource};
pub use voices::NoteState;
