//! Audio capture of the bus output.
//!
//! While a session is active the bus copies its master output into a tap.
//! The recorder drains the tap into encoded chunks as it goes and joins the
//! chunks into one file when the session stops.

use crate::audio::bus::{Bus, StreamFormat};
use crate::error::RecordingError;
use crate::recording::artifact::Artifact;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use tracing::{error, info};

/// Turns captured frames into a downloadable file, one chunk at a time.
pub trait CaptureEncoder {
    /// Media type of the finished file.
    fn media_type(&self) -> &'static str;
    /// File extension of the finished file, without the dot.
    fn extension(&self) -> &'static str;
    /// Prepares for a new session in the given format.
    fn begin(&mut self, format: StreamFormat) -> Result<(), RecordingError>;
    /// Encodes interleaved frames into one chunk.
    fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>, RecordingError>;
    /// Joins the session's chunks into the finished file.
    fn finalize(&mut self, chunks: Vec<Vec<u8>>) -> Result<Vec<u8>, RecordingError>;
}

/// 16-bit PCM WAV. Chunks hold little-endian samples; the header is
/// written once at finalize.
#[derive(Debug, Default)]
pub struct WavEncoder {
    format: Option<StreamFormat>,
}

impl WavEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureEncoder for WavEncoder {
    fn media_type(&self) -> &'static str {
        "audio/wav"
    }

    fn extension(&self) -> &'static str {
        "wav"
    }

    fn begin(&mut self, format: StreamFormat) -> Result<(), RecordingError> {
        self.format = Some(format);
        Ok(())
    }

    fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>, RecordingError> {
        let mut chunk = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            // Convert f32 (-1.0 to 1.0) to i16
            let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            chunk.extend_from_slice(&value.to_le_bytes());
        }
        Ok(chunk)
    }

    fn finalize(&mut self, chunks: Vec<Vec<u8>>) -> Result<Vec<u8>, RecordingError> {
        let format = self
            .format
            .take()
            .ok_or_else(|| RecordingError::Encode("encoder was never started".into()))?;
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec)?;
            for chunk in &chunks {
                for pair in chunk.chunks_exact(2) {
                    writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
                }
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }
}

/// Whether the recorder is capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

/// Captures the bus output across a start/stop session.
pub struct AudioRecorder {
    encoder: Box<dyn CaptureEncoder>,
    state: RecorderState,
    chunks: Vec<Vec<u8>>,
    /// First encode error of the session; the artifact is abandoned.
    failure: Option<String>,
}

impl AudioRecorder {
    pub fn new(encoder: Box<dyn CaptureEncoder>) -> Self {
        Self {
            encoder,
            state: RecorderState::Idle,
            chunks: Vec::new(),
            failure: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    /// Number of chunks captured so far in this session.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Starts a session: clears old chunks and opens the bus tap.
    pub fn start(&mut self, bus: &Bus) -> Result<(), RecordingError> {
        if self.is_recording() {
            return Err(RecordingError::AlreadyRecording);
        }
        self.chunks.clear();
        self.failure = None;
        self.encoder.begin(bus.format())?;
        bus.open_tap();
        self.state = RecorderState::Recording;
        info!(format = self.encoder.media_type(), "Audio recording started");
        Ok(())
    }

    /// Moves whatever the tap captured since the last call into a chunk.
    pub fn poll(&mut self, bus: &Bus) {
        if !self.is_recording() || self.failure.is_some() {
            return;
        }
        let frames = bus.drain_tap();
        self.push_chunk(&frames);
    }

    fn push_chunk(&mut self, frames: &[f32]) {
        if frames.is_empty() || self.failure.is_some() {
            return;
        }
        match self.encoder.encode(frames) {
            Ok(chunk) if !chunk.is_empty() => self.chunks.push(chunk),
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Audio capture failed, recording will be discarded");
                self.failure = Some(e.to_string());
            }
        }
    }

    /// Ends the session and assembles the captured chunks into one file.
    pub fn stop(&mut self, bus: &Bus, stamp: &str) -> Result<Artifact, RecordingError> {
        if !self.is_recording() {
            return Err(RecordingError::NotRecording);
        }
        let rest = bus.close_tap();
        self.push_chunk(&rest);
        self.state = RecorderState::Idle;

        let chunks = std::mem::take(&mut self.chunks);
        if let Some(reason) = self.failure.take() {
            return Err(RecordingError::Encode(reason));
        }
        let count = chunks.len();
        let bytes = self.encoder.finalize(chunks)?;
        info!(chunks = count, bytes = bytes.len(), "Audio recording stopped");
        Ok(Artifact::new(
            stamp,
            self.encoder.extension(),
            self.encoder.media_type(),
            bytes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::samples::SampleBuffer;
    use hound::WavReader;
    use std::sync::Arc;

    fn bus() -> Bus {
        Bus::new(StreamFormat::stereo(8000))
    }

    fn read_wav(bytes: &[u8]) -> (WavSpec, Vec<i16>) {
        let reader = WavReader::new(Cursor::new(bytes.to_vec())).unwrap();
        let spec = reader.spec();
        let samples = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        (spec, samples)
    }

    struct FailingEncoder;

    impl CaptureEncoder for FailingEncoder {
        fn media_type(&self) -> &'static str {
            "audio/wav"
        }
        fn extension(&self) -> &'static str {
            "wav"
        }
        fn begin(&mut self, _format: StreamFormat) -> Result<(), RecordingError> {
            Ok(())
        }
        fn encode(&mut self, _samples: &[f32]) -> Result<Vec<u8>, RecordingError> {
            Err(RecordingError::Encode("disk full".into()))
        }
        fn finalize(&mut self, _chunks: Vec<Vec<u8>>) -> Result<Vec<u8>, RecordingError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_start_stop_out_of_order() {
        let bus = bus();
        let mut rec = AudioRecorder::new(Box::new(WavEncoder::new()));
        assert!(matches!(
            rec.stop(&bus, "x"),
            Err(RecordingError::NotRecording)
        ));
        rec.start(&bus).unwrap();
        assert!(matches!(
            rec.start(&bus),
            Err(RecordingError::AlreadyRecording)
        ));
        assert!(rec.is_recording());
    }

    #[test]
    fn test_silent_session_is_valid_wav() {
        let bus = bus();
        let mut rec = AudioRecorder::new(Box::new(WavEncoder::new()));
        rec.start(&bus).unwrap();
        let artifact = rec.stop(&bus, "stamp").unwrap();
        assert_eq!(artifact.file_name, "piano-recording-stamp.wav");
        assert_eq!(artifact.media_type, "audio/wav");

        let (spec, samples) = read_wav(&artifact.bytes);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        assert!(samples.is_empty());
        assert_eq!(rec.state(), RecorderState::Idle);
    }

    #[test]
    fn test_chunks_concatenate_in_order() {
        let bus = bus();
        bus.connect(Arc::new(SampleBuffer::new(vec![0.5; 200], 2, 8000)));
        let mut rec = AudioRecorder::new(Box::new(WavEncoder::new()));
        rec.start(&bus).unwrap();

        let mut out = vec![0.0; 40];
        bus.render(&mut out);
        rec.poll(&bus);
        bus.render(&mut out);
        rec.poll(&bus);
        rec.poll(&bus); // nothing new
        assert_eq!(rec.chunk_count(), 2);
        bus.render(&mut out); // picked up at stop

        let artifact = rec.stop(&bus, "s").unwrap();
        let (_, samples) = read_wav(&artifact.bytes);
        assert_eq!(samples.len(), 120);
        assert!(samples.iter().all(|&s| s == 16383));
        assert!(!bus.is_tapping());
    }

    #[test]
    fn test_restart_discards_previous_chunks() {
        let bus = bus();
        bus.connect(Arc::new(SampleBuffer::new(vec![0.5; 2000], 2, 8000)));
        let mut rec = AudioRecorder::new(Box::new(WavEncoder::new()));
        let mut out = vec![0.0; 40];

        rec.start(&bus).unwrap();
        bus.render(&mut out);
        rec.stop(&bus, "first").unwrap();

        rec.start(&bus).unwrap();
        assert_eq!(rec.chunk_count(), 0);
        let artifact = rec.stop(&bus, "second").unwrap();
        assert!(read_wav(&artifact.bytes).1.is_empty());
    }

    #[test]
    fn test_encode_failure_aborts_artifact_only() {
        let bus = bus();
        bus.connect(Arc::new(SampleBuffer::new(vec![0.5; 200], 2, 8000)));
        let mut rec = AudioRecorder::new(Box::new(FailingEncoder));
        rec.start(&bus).unwrap();
        let mut out = vec![0.0; 40];
        bus.render(&mut out);
        rec.poll(&bus);

        assert!(matches!(
            rec.stop(&bus, "x"),
            Err(RecordingError::Encode(_))
        ));
        assert!(!rec.is_recording());
        // A new session starts clean.
        rec.start(&bus).unwrap();
        assert_eq!(rec.chunk_count(), 0);
    }
}
