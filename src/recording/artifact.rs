//! Exported files and where they go.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};

/// Every exported file name starts with this.
pub const FILE_PREFIX: &str = "piano-recording";

/// A finished recording ready for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// Builds `piano-recording-<stamp>.<extension>`.
    pub fn new(stamp: &str, extension: &str, media_type: &'static str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: format!("{FILE_PREFIX}-{stamp}.{extension}"),
            media_type,
            bytes,
        }
    }
}

/// Receives finished artifacts (the "download" step).
pub trait ArtifactSink {
    /// Delivers the artifact and returns where it ended up.
    fn deliver(&mut self, artifact: Artifact) -> io::Result<PathBuf>;
}

/// Writes artifacts into a directory, creating it if needed.
#[derive(Debug, Clone)]
pub struct DownloadDir {
    dir: PathBuf,
}

impl DownloadDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactSink for DownloadDir {
    fn deliver(&mut self, artifact: Artifact) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(&artifact.file_name);
        fs::write(&path, &artifact.bytes)?;
        Ok(path)
    }
}

/// Keeps artifacts in memory. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    delivered: Arc<Mutex<Vec<Artifact>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything delivered so far.
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ArtifactSink for MemorySink {
    fn deliver(&mut self, artifact: Artifact) -> io::Result<PathBuf> {
        let path = PathBuf::from(&artifact.file_name);
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(artifact);
        Ok(path)
    }
}

/// Formats a wall-clock time as ISO 8601 UTC with milliseconds,
/// e.g. `2026-10-19T09:55:00.123Z`.
pub fn iso8601(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Timestamp for a file exported now.
pub fn stamp_now() -> String {
    iso8601(SystemTime::now())
}
