//! keytone - A sampled virtual piano with audio and note-event recording.
//!
//! This library provides the playback engine and the terminal front-end.

pub mod app;
pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod note;
pub mod recording;
pub mod ui;

// Re-export commonly used types
pub use app::App;
pub use audio::{ActiveKeys, KeyIndicator, NoteState, Piano};
pub use config::EngineConfig;
pub use error::{EngineError, LoadFailure, RecordingError};
pub use note::NoteId;
