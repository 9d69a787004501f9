//! Sample fetching, decoding and caching.
//!
//! Samples are addressed by note name. Raw bytes come from a
//! [`SampleSource`], are decoded with rodio, and are converted once to the
//! bus format so voices can play them without further processing.

use crate::audio::bus::StreamFormat;
use crate::error::LoadFailure;
use crate::note::NoteId;
use rayon::prelude::*;
use rodio::{Decoder, Source};
use std::collections::HashMap;
use std::io::{Cursor, ErrorKind};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decoded, immutable audio data (interleaved `f32`).
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Wraps interleaved samples. `channels` must be non-zero.
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of complete frames.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Converts channel layout and sample rate to match `format`.
    ///
    /// Extra channels are dropped, missing ones repeat the last source
    /// channel. Rate conversion is linear interpolation.
    pub fn conform(self, format: StreamFormat) -> Self {
        let samples = remap_channels(self.samples, self.channels, format.channels);
        let samples = resample(
            samples,
            format.channels as usize,
            self.sample_rate,
            format.sample_rate,
        );
        Self {
            samples,
            channels: format.channels,
            sample_rate: format.sample_rate,
        }
    }
}

fn remap_channels(samples: Vec<f32>, from: u16, to: u16) -> Vec<f32> {
    if from == to {
        return samples;
    }
    let (from, to) = (from as usize, to as usize);
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        for c in 0..to {
            out.push(frame[c.min(from - 1)]);
        }
    }
    out
}

fn resample(samples: Vec<f32>, channels: usize, from: u32, to: u32) -> Vec<f32> {
    let in_frames = samples.len() / channels;
    if from == to || in_frames == 0 {
        return samples;
    }
    let out_frames = ((in_frames as u64 * to as u64) / from as u64).max(1) as usize;
    let ratio = from as f64 / to as f64;
    let mut out = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let pos = i as f64 * ratio;
        let i0 = (pos.floor() as usize).min(in_frames - 1);
        let i1 = (i0 + 1).min(in_frames - 1);
        let t = (pos - i0 as f64) as f32;
        for c in 0..channels {
            let a = samples[i0 * channels + c];
            let b = samples[i1 * channels + c];
            out.push(a + (b - a) * t);
        }
    }
    out
}

/// Where raw sample bytes come from.
pub trait SampleSource: Send + Sync {
    /// Returns the encoded sample for `note`.
    fn fetch(&self, note: &NoteId) -> Result<Vec<u8>, LoadFailure>;
}

/// Reads `<root>/<note>.<extension>` from disk, e.g. `sounds/Db4.mp3`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    extension: String,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    /// Path of the sample file for `note`.
    pub fn path_for(&self, note: &NoteId) -> PathBuf {
        self.root.join(format!("{}.{}", note, self.extension))
    }
}

impl SampleSource for DirectorySource {
    fn fetch(&self, note: &NoteId) -> Result<Vec<u8>, LoadFailure> {
        std::fs::read(self.path_for(note)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => LoadFailure::NotFound(*note),
            _ => LoadFailure::Fetch {
                note: *note,
                source: e,
            },
        })
    }
}

/// Serves samples from memory. Useful for embedded assets and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    samples: HashMap<NoteId, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the encoded sample for `note`.
    pub fn insert(&mut self, note: NoteId, bytes: Vec<u8>) {
        self.samples.insert(note, bytes);
    }
}

impl SampleSource for MemorySource {
    fn fetch(&self, note: &NoteId) -> Result<Vec<u8>, LoadFailure> {
        self.samples
            .get(note)
            .cloned()
            .ok_or(LoadFailure::NotFound(*note))
    }
}

/// Decodes an encoded sample (any container rodio supports) into the bus
/// format.
pub fn decode(note: NoteId, bytes: Vec<u8>, format: StreamFormat) -> Result<SampleBuffer, LoadFailure> {
    let decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| LoadFailure::Decode {
        note,
        reason: e.to_string(),
    })?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();

    if samples.is_empty() || channels == 0 || sample_rate == 0 {
        return Err(LoadFailure::Empty(note));
    }
    Ok(SampleBuffer::new(samples, channels, sample_rate).conform(format))
}

fn fetch_decoded(
    source: &dyn SampleSource,
    note: NoteId,
    format: StreamFormat,
) -> Result<Arc<SampleBuffer>, LoadFailure> {
    let result = source
        .fetch(&note)
        .and_then(|bytes| decode(note, bytes, format))
        .map(Arc::new);
    if let Err(e) = &result {
        warn!(note = %note, error = %e, "Failed to load sample");
    }
    result
}

/// Outcome of a background load, tagged by the requester.
#[derive(Debug)]
pub struct Loaded<T> {
    pub tag: T,
    pub note: NoteId,
    pub result: Result<Arc<SampleBuffer>, LoadFailure>,
}

/// Lazily loads samples and keeps them for the life of the process.
///
/// Failures are never cached, so a later request tries again.
pub struct SampleCache {
    source: Arc<dyn SampleSource>,
    format: StreamFormat,
    cache: HashMap<NoteId, Arc<SampleBuffer>>,
}

impl SampleCache {
    pub fn new(source: Arc<dyn SampleSource>, format: StreamFormat) -> Self {
        Self {
            source,
            format,
            cache: HashMap::new(),
        }
    }

    /// Returns the buffer for `note` if it was loaded before.
    pub fn cached(&self, note: &NoteId) -> Option<Arc<SampleBuffer>> {
        self.cache.get(note).cloned()
    }

    /// Stores a buffer produced by a background load.
    pub fn insert(&mut self, note: NoteId, buffer: Arc<SampleBuffer>) {
        self.cache.insert(note, buffer);
    }

    /// Number of cached notes.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Loads a sample on the calling thread, using the cache when possible.
    ///
    /// Synchronous API for callers that can block, such as tools and tests.
    /// The engine never calls it; its loads go through
    /// [`spawn_load`](Self::spawn_load) so the control thread stays free.
    pub fn load(&mut self, note: NoteId) -> Result<Arc<SampleBuffer>, LoadFailure> {
        if let Some(buffer) = self.cached(&note) {
            debug!(note = %note, "Using cached sample");
            return Ok(buffer);
        }
        let buffer = fetch_decoded(self.source.as_ref(), note, self.format)?;
        self.cache.insert(note, Arc::clone(&buffer));
        Ok(buffer)
    }

    /// Fetches and decodes `note` on the rayon pool and sends the result
    /// to `tx`. The cache itself is not touched; the receiver decides
    /// whether to [`insert`](Self::insert) the buffer.
    pub fn spawn_load<T: Send + 'static>(&self, note: NoteId, tag: T, tx: Sender<Loaded<T>>) {
        let source = Arc::clone(&self.source);
        let format = self.format;
        debug!(note = %note, "Loading sample in background");
        rayon::spawn(move || {
            let result = fetch_decoded(source.as_ref(), note, format);
            // The receiver is gone only when the engine was dropped.
            let _ = tx.send(Loaded { tag, note, result });
        });
    }

    /// Loads every uncached note in parallel. Returns the failures.
    pub fn preload(&mut self, notes: &[NoteId]) -> Vec<LoadFailure> {
        let source = self.source.as_ref();
        let format = self.format;
        let results: Vec<_> = notes
            .par_iter()
            .filter(|note| !self.cache.contains_key(*note))
            .map(|&note| (note, fetch_decoded(source, note, format)))
            .collect();

        let mut failures = Vec::new();
        for (note, result) in results {
            match result {
                Ok(buffer) => {
                    self.cache.insert(note, buffer);
                }
                Err(e) => failures.push(e),
            }
        }
        info!(
            loaded = self.cache.len(),
            failed = failures.len(),
            "Preloaded samples"
        );
        failures
    }
}
