//! The fixed audio graph.
//!
//! Every voice feeds its own gain, all voice gains feed one master gain, and
//! the master output goes both to the live output and to an optional
//! recording tap. The graph is shared between the control thread and the
//! audio thread; the lock is held for one render block at a time.

use crate::audio::samples::SampleBuffer;
use rodio::Source;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Frames rendered per block by [`BusSource`].
/// Smaller = lower latency but more lock traffic.
const BLOCK_FRAMES: usize = 256;

/// Global counter for bus voice IDs.
static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// Sample format the bus renders in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    /// Interleaved stereo at the given rate.
    pub fn stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
        }
    }

    /// Converts a duration to a whole number of frames.
    pub fn frames_in(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }
}

/// Handle to one voice connected to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(u64);

impl VoiceId {
    fn next() -> Self {
        Self(NEXT_VOICE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Per-voice gain with an optional linear ramp to silence.
#[derive(Debug, Clone, Copy)]
struct Gain {
    value: f32,
    step: f32,
    remaining: u64,
    fading: bool,
}

impl Gain {
    fn unity() -> Self {
        Self {
            value: 1.0,
            step: 0.0,
            remaining: 0,
            fading: false,
        }
    }

    /// Starts a ramp from the current value to zero over `frames`.
    fn ramp_to_zero(&mut self, frames: u64) {
        self.fading = true;
        if frames == 0 {
            self.value = 0.0;
            self.remaining = 0;
            return;
        }
        self.step = -self.value / frames as f32;
        self.remaining = frames;
    }

    fn advance(&mut self) {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.value = if self.remaining == 0 {
                0.0
            } else {
                (self.value + self.step).max(0.0)
            };
        }
    }

    fn faded_out(&self) -> bool {
        self.fading && self.remaining == 0
    }
}

struct VoiceNode {
    id: VoiceId,
    buffer: Arc<SampleBuffer>,
    frame: usize,
    gain: Gain,
}

impl VoiceNode {
    fn finished(&self) -> bool {
        self.frame >= self.buffer.frames() || self.gain.faded_out()
    }
}

struct Graph {
    voices: Vec<VoiceNode>,
    master: f32,
    tap: Option<Vec<f32>>,
}

/// Shared handle to the audio graph. Clones refer to the same graph.
#[derive(Clone)]
pub struct Bus {
    format: StreamFormat,
    graph: Arc<Mutex<Graph>>,
}

impl Bus {
    /// Builds an empty graph at full master volume.
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            graph: Arc::new(Mutex::new(Graph {
                voices: Vec::new(),
                master: 1.0,
                tap: None,
            })),
        }
    }

    /// Returns the format the bus renders in.
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    fn lock(&self) -> MutexGuard<'_, Graph> {
        // A panic on the audio thread leaves the graph usable.
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wires a new voice for `buffer` at unity gain, starting immediately.
    pub fn connect(&self, buffer: Arc<SampleBuffer>) -> VoiceId {
        let id = VoiceId::next();
        self.lock().voices.push(VoiceNode {
            id,
            buffer,
            frame: 0,
            gain: Gain::unity(),
        });
        id
    }

    /// Ramps a voice's gain linearly from its current value to zero.
    ///
    /// The voice is dropped from the graph once the ramp completes.
    /// Returns false if the voice is no longer connected.
    pub fn fade_out(&self, voice: VoiceId, duration: Duration) -> bool {
        let frames = self.format.frames_in(duration);
        let mut graph = self.lock();
        match graph.voices.iter_mut().find(|v| v.id == voice) {
            Some(node) => {
                node.gain.ramp_to_zero(frames);
                true
            }
            None => false,
        }
    }

    /// Sets the master gain. Takes effect on the next rendered frame.
    ///
    /// Values are clamped to `0.0..=1.0`; non-finite input mutes.
    pub fn set_volume(&self, level: f32) {
        let level = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.lock().master = level;
    }

    /// Returns the master gain.
    pub fn volume(&self) -> f32 {
        self.lock().master
    }

    /// Returns the current gain of a connected voice.
    pub fn voice_gain(&self, voice: VoiceId) -> Option<f32> {
        self.lock()
            .voices
            .iter()
            .find(|v| v.id == voice)
            .map(|v| v.gain.value)
    }

    /// Returns true while the voice is still part of the graph.
    pub fn is_connected(&self, voice: VoiceId) -> bool {
        self.lock().voices.iter().any(|v| v.id == voice)
    }

    /// Number of voices currently in the graph, fading ones included.
    pub fn voice_count(&self) -> usize {
        self.lock().voices.len()
    }

    /// Starts copying the master output into the recording tap.
    /// Anything left in a previous tap is discarded.
    pub fn open_tap(&self) {
        self.lock().tap = Some(Vec::new());
    }

    /// Takes the frames captured since the last drain.
    pub fn drain_tap(&self) -> Vec<f32> {
        self.lock().tap.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Stops capturing and returns whatever was not drained yet.
    pub fn close_tap(&self) -> Vec<f32> {
        self.lock().tap.take().unwrap_or_default()
    }

    /// Returns true while the recording tap is open.
    pub fn is_tapping(&self) -> bool {
        self.lock().tap.is_some()
    }

    /// Renders interleaved frames into `out`.
    ///
    /// Mixes every voice through its gain and the master gain, feeds the
    /// tap, and retires voices that ended or finished fading.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let channels = self.format.channels as usize;
        let frames = out.len() / channels;

        let mut graph = self.lock();
        for voice in graph.voices.iter_mut() {
            let data = voice.buffer.samples();
            let src_channels = voice.buffer.channels() as usize;
            let available = voice.buffer.frames().saturating_sub(voice.frame);
            let count = frames.min(available);

            for i in 0..count {
                let gain = voice.gain.value;
                let src = (voice.frame + i) * src_channels;
                for c in 0..channels {
                    out[i * channels + c] += data[src + c.min(src_channels - 1)] * gain;
                }
                voice.gain.advance();
            }
            voice.frame += count;
        }
        graph.voices.retain(|v| !v.finished());

        let master = graph.master;
        let rendered = &mut out[..frames * channels];
        for sample in rendered.iter_mut() {
            *sample *= master;
        }
        if let Some(tap) = graph.tap.as_mut() {
            tap.extend_from_slice(rendered);
        }
    }
}

/// Audio source that pulls blocks from the bus.
/// Implements rodio's Source trait for playback.
pub struct BusSource {
    bus: Bus,
    buf: Vec<f32>,
    pos: usize,
}

impl BusSource {
    pub fn new(bus: Bus) -> Self {
        let len = BLOCK_FRAMES * bus.format().channels as usize;
        Self {
            bus,
            buf: vec![0.0; len],
            pos: len, // Start at end to trigger first render
        }
    }
}

impl Iterator for BusSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.pos >= self.buf.len() {
            self.bus.render(&mut self.buf);
            self.pos = 0;
        }
        let sample = self.buf[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

impl Source for BusSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // Continuous stream
    }

    fn channels(&self) -> u16 {
        self.bus.format().channels
    }

    fn sample_rate(&self) -> u32 {
        self.bus.format().sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> StreamFormat {
        StreamFormat::stereo(1000)
    }

    fn constant_buffer(frames: usize, value: f32) -> Arc<SampleBuffer> {
        Arc::new(SampleBuffer::new(vec![value; frames * 2], 2, 1000))
    }

    #[test]
    fn test_mixes_voices_through_master() {
        let bus = Bus::new(format());
        bus.connect(constant_buffer(100, 0.25));
        bus.connect(constant_buffer(100, 0.25));
        bus.set_volume(0.5);

        let mut out = vec![0.0; 20];
        bus.render(&mut out);
        assert!(out.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_voice_retired_when_buffer_ends() {
        let bus = Bus::new(format());
        let voice = bus.connect(constant_buffer(5, 0.5));

        let mut out = vec![0.0; 20];
        bus.render(&mut out);
        assert_eq!(&out[8..10], &[0.5, 0.5]);
        assert_eq!(&out[10..12], &[0.0, 0.0]);
        assert!(!bus.is_connected(voice));
    }

    #[test]
    fn test_fade_out_is_linear_and_retires_voice() {
        let bus = Bus::new(format());
        let voice = bus.connect(constant_buffer(1000, 1.0));
        // 100 ms at 1 kHz = 100 frames.
        assert!(bus.fade_out(voice, Duration::from_millis(100)));

        let mut out = vec![0.0; 100];
        bus.render(&mut out);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[50] - 0.75).abs() < 1e-3);
        let gain = bus.voice_gain(voice).unwrap();
        assert!((gain - 0.5).abs() < 1e-3);

        bus.render(&mut out);
        assert!(out.windows(2).all(|w| w[1] <= w[0] + 1e-6));
        assert!(!bus.is_connected(voice));
        assert_eq!(bus.voice_count(), 0);
    }

    #[test]
    fn test_fade_unknown_voice() {
        let bus = Bus::new(format());
        let voice = bus.connect(constant_buffer(1, 1.0));
        let mut out = vec![0.0; 4];
        bus.render(&mut out);
        assert!(!bus.fade_out(voice, Duration::from_millis(10)));
    }

    #[test]
    fn test_volume_clamped() {
        let bus = Bus::new(format());
        bus.set_volume(2.0);
        assert_eq!(bus.volume(), 1.0);
        bus.set_volume(-1.0);
        assert_eq!(bus.volume(), 0.0);
        bus.set_volume(f32::NAN);
        assert_eq!(bus.volume(), 0.0);
    }

    #[test]
    fn test_tap_captures_master_output() {
        let bus = Bus::new(format());
        bus.connect(constant_buffer(100, 0.5));

        let mut out = vec![0.0; 8];
        bus.render(&mut out);
        assert!(bus.drain_tap().is_empty());

        bus.open_tap();
        bus.render(&mut out);
        bus.render(&mut out);
        assert_eq!(bus.drain_tap().len(), 16);
        bus.render(&mut out);
        assert_eq!(bus.close_tap(), vec![0.5; 8]);
        assert!(!bus.is_tapping());
    }

    #[test]
    fn test_mono_buffer_feeds_both_channels() {
        let bus = Bus::new(format());
        bus.connect(Arc::new(SampleBuffer::new(vec![0.3; 10], 1, 1000)));
        let mut out = vec![0.0; 4];
        bus.render(&mut out);
        assert!(out.iter().all(|s| (s - 0.3).abs() < 1e-6));
    }

    #[test]
    fn test_bus_source_streams_blocks() {
        let bus = Bus::new(format());
        bus.connect(constant_buffer(10, 0.5));
        let source = BusSource::new(bus.clone());
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 1000);
        let samples: Vec<f32> = source.take(24).collect();
        assert_eq!(&samples[..20], &[0.5; 20]);
        assert_eq!(&samples[20..], &[0.0; 4]);
    }
}
