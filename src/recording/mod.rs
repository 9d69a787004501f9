//! Recording of what the piano plays.
//!
//! Audio is captured from the bus output into WAV; note on/off events are
//! logged with their time into the session and exported as JSON.

pub mod artifact;
pub mod audio;
pub mod events;

pub use artifact::{Artifact, ArtifactSink, DownloadDir, MemorySink};
pub use audio::{AudioRecorder, CaptureEncoder, WavEncoder};
pub use events::{EventKind, EventRecorder, NoteEvent};
