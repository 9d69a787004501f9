//! The piano engine.
//!
//! Ties the sample cache, voice manager, bus and both recorders together
//! behind the operations a keyboard front-end needs. All state lives on the
//! caller's thread; sample loads run on the rayon pool and are applied when
//! the caller next invokes [`Piano::poll`].

use crate::audio::bus::{Bus, StreamFormat};
use crate::audio::output::AudioOutput;
use crate::audio::samples::{DirectorySource, Loaded, SampleBuffer, SampleCache, SampleSource};
use crate::audio::voices::{NoteState, Release, Ticket, VoiceManager};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, LoadFailure, RecordingError};
use crate::note::NoteId;
use crate::recording::artifact::{stamp_now, Artifact, ArtifactSink, DownloadDir};
use crate::recording::audio::{AudioRecorder, CaptureEncoder, WavEncoder};
use crate::recording::events::{EventKind, EventRecorder, NoteEvent};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Receives key highlight changes from the engine.
pub trait KeyIndicator {
    fn set_active(&mut self, note: NoteId, active: bool);
}

/// Indicator that ignores every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndicator;

impl KeyIndicator for NoIndicator {
    fn set_active(&mut self, _note: NoteId, _active: bool) {}
}

/// Set of highlighted keys shared with a front-end. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ActiveKeys {
    keys: Arc<Mutex<BTreeSet<NoteId>>>,
}

impl ActiveKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, note: &NoteId) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(note)
    }

    /// Returns the highlighted keys.
    pub fn snapshot(&self) -> BTreeSet<NoteId> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl KeyIndicator for ActiveKeys {
    fn set_active(&mut self, note: NoteId, active: bool) {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if active {
            keys.insert(note);
        } else {
            keys.remove(&note);
        }
    }
}

/// The playback and recording engine.
pub struct Piano {
    bus: Bus,
    samples: SampleCache,
    voices: VoiceManager,
    audio_recorder: AudioRecorder,
    events: EventRecorder,
    indicator: Box<dyn KeyIndicator>,
    artifacts: Box<dyn ArtifactSink>,
    clock: Arc<dyn Clock>,
    loads_tx: Sender<Loaded<Ticket>>,
    loads_rx: Receiver<Loaded<Ticket>>,
    /// Background loads not yet received.
    in_flight: usize,
    _output: Option<AudioOutput>,
}

impl Piano {
    /// Creates an engine playing through the default audio device.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or no audio output
    /// is available. Nothing can work without output, so callers should
    /// treat this as fatal.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let mut piano = Self::headless(config)?;
        piano._output = Some(AudioOutput::open(&piano.bus)?);
        Ok(piano)
    }

    /// Creates an engine without an audio device. The bus only advances
    /// when something calls [`Bus::render`].
    pub fn headless(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let format = StreamFormat::stereo(config.sample_rate);
        let bus = Bus::new(format);
        bus.set_volume(config.initial_volume);

        let source: Arc<dyn SampleSource> = Arc::new(DirectorySource::new(
            &config.sample_dir,
            &config.sample_extension,
        ));
        let (loads_tx, loads_rx) = mpsc::channel();

        Ok(Self {
            samples: SampleCache::new(source, format),
            voices: VoiceManager::new(config.release()),
            audio_recorder: AudioRecorder::new(Box::new(WavEncoder::new())),
            events: EventRecorder::new(),
            indicator: Box::new(NoIndicator),
            artifacts: Box::new(DownloadDir::new(&config.download_dir)),
            clock: Arc::new(SystemClock),
            loads_tx,
            loads_rx,
            in_flight: 0,
            _output: None,
            bus,
        })
    }

    /// Replaces the sample source. Already cached samples are dropped.
    pub fn with_source(mut self, source: Arc<dyn SampleSource>) -> Self {
        self.samples = SampleCache::new(source, self.bus.format());
        self
    }

    pub fn with_indicator(mut self, indicator: Box<dyn KeyIndicator>) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn with_artifact_sink(mut self, sink: Box<dyn ArtifactSink>) -> Self {
        self.artifacts = sink;
        self
    }

    pub fn with_encoder(mut self, encoder: Box<dyn CaptureEncoder>) -> Self {
        self.audio_recorder = AudioRecorder::new(encoder);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Starts a note.
    ///
    /// Ignored while the note is already pending or sounding. If the sample
    /// is cached the voice starts now; otherwise it starts from
    /// [`poll`](Self::poll) once the load finishes, unless the note was
    /// stopped in the meantime.
    pub fn play_note(&mut self, note: NoteId) {
        let Some(ticket) = self.voices.begin(note) else {
            return;
        };
        match self.samples.cached(&note) {
            Some(buffer) => self.start_voice(ticket, buffer),
            None => {
                self.in_flight += 1;
                self.samples
                    .spawn_load(note, ticket, self.loads_tx.clone());
            }
        }
    }

    /// Stops a note with the release fade. Ignored if the note is not active.
    pub fn stop_note(&mut self, note: NoteId) {
        let now = self.clock.now();
        match self.voices.release(note, now) {
            Release::Fading(voice) => {
                self.bus.fade_out(voice.id, self.voices.release_window());
                self.indicator.set_active(note, false);
                self.events.record(note, EventKind::NoteOff, now);
            }
            Release::Cancelled(ticket) => {
                debug!(note = %note, generation = ticket.generation(), "Cancelled pending note");
            }
            Release::NotActive => {}
        }
    }

    /// Sets the master volume (0.0 to 1.0), effective immediately.
    pub fn set_volume(&mut self, level: f32) {
        self.bus.set_volume(level);
    }

    pub fn volume(&self) -> f32 {
        self.bus.volume()
    }

    /// Starts audio and event recording together.
    /// Ignored if a session is already running.
    ///
    /// Notes already sounding are logged as starting at 0 ms, so their
    /// release inside the session has a matching `noteOn`.
    pub fn start_recording(&mut self) {
        if let Err(e) = self.audio_recorder.start(&self.bus) {
            debug!(error = %e, "Ignoring start recording");
            return;
        }
        let now = self.clock.now();
        self.events.start(now);
        let mut held = self.voices.sounding();
        held.sort();
        for note in held {
            self.events.record(note, EventKind::NoteOn, now);
        }
        info!("Recording started");
    }

    /// Stops both recorders and delivers the audio file.
    ///
    /// Returns where the audio file went, or `None` if no session was
    /// running or the artifact could not be produced.
    pub fn stop_recording(&mut self) -> Option<PathBuf> {
        let result = self.audio_recorder.stop(&self.bus, &stamp_now());
        if matches!(result, Err(RecordingError::NotRecording)) {
            debug!("Ignoring stop recording, no session active");
            return None;
        }
        self.events.stop();
        info!(events = self.events.events().len(), "Recording stopped");
        match result {
            Ok(artifact) => self.deliver(artifact),
            Err(e) => {
                error!(error = %e, "Recording discarded");
                None
            }
        }
    }

    /// Delivers the event log of the current or last session.
    pub fn export_event_log(&mut self) -> Option<PathBuf> {
        match self.events.export(&stamp_now()) {
            Ok(artifact) => self.deliver(artifact),
            Err(e) => {
                error!(error = %e, "Event log export failed");
                None
            }
        }
    }

    /// Applies finished loads, retires elapsed releases and flushes the
    /// recording tap. Call this regularly from the front-end loop.
    pub fn poll(&mut self) {
        while let Ok(loaded) = self.loads_rx.try_recv() {
            self.finish_load(loaded);
        }
        for note in self.voices.reap(self.clock.now()) {
            debug!(note = %note, "Release complete");
        }
        self.audio_recorder.poll(&self.bus);
    }

    /// Blocks until every outstanding load has been applied or `timeout`
    /// passes. Returns false on timeout.
    pub fn wait_for_loads(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.loads_rx.recv_timeout(remaining) {
                Ok(loaded) => self.finish_load(loaded),
                Err(_) => return false,
            }
        }
        self.poll();
        true
    }

    /// Loads samples ahead of time so first presses start instantly.
    pub fn preload(&mut self, notes: &[NoteId]) -> Vec<LoadFailure> {
        self.samples.preload(notes)
    }

    pub fn note_state(&self, note: &NoteId) -> NoteState {
        self.voices.state(note)
    }

    /// Notes sounding at full level.
    pub fn sounding_notes(&self) -> Vec<NoteId> {
        self.voices.sounding()
    }

    pub fn is_recording(&self) -> bool {
        self.audio_recorder.is_recording()
    }

    /// Events of the current or last recording session.
    pub fn recorded_events(&self) -> &[NoteEvent] {
        self.events.events()
    }

    /// The audio graph, for rendering without a device.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    fn finish_load(&mut self, loaded: Loaded<Ticket>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let Loaded { tag, note, result } = loaded;
        match result {
            Ok(buffer) => {
                self.samples.insert(note, Arc::clone(&buffer));
                if self.voices.is_current(&tag) {
                    self.start_voice(tag, buffer);
                } else {
                    debug!(note = %note, "Sample arrived for a stopped note");
                }
            }
            Err(_) => {
                // Already logged by the loader.
                self.voices.abandon(tag);
            }
        }
    }

    fn start_voice(&mut self, ticket: Ticket, buffer: Arc<SampleBuffer>) {
        let now = self.clock.now();
        let id = self.bus.connect(buffer);
        match self.voices.start(ticket, id) {
            Some(voice) => {
                self.indicator.set_active(voice.note, true);
                self.events.record(voice.note, EventKind::NoteOn, now);
            }
            None => {
                self.bus.fade_out(id, Duration::ZERO);
            }
        }
    }

    fn deliver(&mut self, artifact: Artifact) -> Option<PathBuf> {
        let name = artifact.file_name.clone();
        match self.artifacts.deliver(artifact) {
            Ok(path) => {
                info!(path = %path.display(), "Exported {}", name);
                Some(path)
            }
            Err(e) => {
                error!(error = %e, "Failed to export {}", name);
                None
            }
        }
    }
}
