//! Error types for the playback and recording engine.

use crate::note::NoteId;
use thiserror::Error;

/// A sample could not be fetched or decoded.
///
/// Load failures are local to one note: the note stays silent and
/// nothing else is affected.
#[derive(Debug, Error)]
pub enum LoadFailure {
    #[error("no sample for {0}")]
    NotFound(NoteId),
    #[error("failed to fetch sample for {note}: {source}")]
    Fetch {
        note: NoteId,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode sample for {note}: {reason}")]
    Decode { note: NoteId, reason: String },
    #[error("sample for {0} contains no audio")]
    Empty(NoteId),
}

impl LoadFailure {
    /// Returns the note the failure belongs to.
    pub fn note(&self) -> NoteId {
        match self {
            LoadFailure::NotFound(note) | LoadFailure::Empty(note) => *note,
            LoadFailure::Fetch { note, .. } | LoadFailure::Decode { note, .. } => *note,
        }
    }
}

/// Recording start/stop called out of order, or the capture failed.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("a recording session is already active")]
    AlreadyRecording,
    #[error("no recording session is active")]
    NotRecording,
    #[error("failed to encode recording: {0}")]
    Encode(String),
    #[error("failed to serialize event log: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<hound::Error> for RecordingError {
    fn from(e: hound::Error) -> Self {
        RecordingError::Encode(e.to_string())
    }
}

/// Engine construction failed.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No usable audio output; nothing can work without it.
    #[error("audio output unavailable: {0}")]
    Unsupported(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}
