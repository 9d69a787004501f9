//! Application state and event handling.
//!
//! Maps computer keys and mouse clicks onto piano notes and forwards
//! recording and volume controls to the engine.

use crate::audio::engine::{ActiveKeys, Piano};
use crate::config::EngineConfig;
use crate::note::NoteId;
use anyhow::Result;
use ratatui::layout::Rect;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a key counts as held without a repeat when the terminal does
/// not report key releases. Must exceed the usual auto-repeat delay.
pub const HOLD_TIMEOUT: Duration = Duration::from_millis(650);

/// Volume change per `[` / `]` press.
pub const VOLUME_STEP: f32 = 0.1;

/// How long status messages stay visible.
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Keyboard key to note mapping for the computer keyboard.
/// Uses a piano-like layout on QWERTY keyboards.
pub const KEYBOARD_MAP: [(char, &str); 24] = [
    // Lower row (Z-M) = C4 to B4
    ('z', "C4"),
    ('s', "Db4"),
    ('x', "D4"),
    ('d', "Eb4"),
    ('c', "E4"),
    ('v', "F4"),
    ('g', "Gb4"),
    ('b', "G4"),
    ('h', "Ab4"),
    ('n', "A4"),
    ('j', "Bb4"),
    ('m', "B4"),
    // Upper row (Q-U) = C5 to B5
    ('q', "C5"),
    ('2', "Db5"),
    ('w', "D5"),
    ('3', "Eb5"),
    ('e', "E5"),
    ('r', "F5"),
    ('5', "Gb5"),
    ('t', "G5"),
    ('6', "Ab5"),
    ('y', "A5"),
    ('7', "Bb5"),
    ('u', "B5"),
];

/// Returns the note played by `key`, ignoring case.
pub fn note_for_key(key: char) -> Option<NoteId> {
    let key = key.to_ascii_lowercase();
    KEYBOARD_MAP
        .iter()
        .find(|(k, _)| *k == key)
        .and_then(|(_, name)| name.parse().ok())
}

/// Returns the computer key that plays `note`.
pub fn key_for_note(note: &NoteId) -> Option<char> {
    KEYBOARD_MAP
        .iter()
        .find(|(_, name)| note_for_key_name(name) == Some(*note))
        .map(|(k, _)| *k)
}

fn note_for_key_name(name: &str) -> Option<NoteId> {
    name.parse().ok()
}

/// Every note on the drawn keyboard, in pitch order.
pub fn keyboard_notes() -> Vec<NoteId> {
    KEYBOARD_MAP
        .iter()
        .filter_map(|(_, name)| note_for_key_name(name))
        .collect()
}

/// Screen positions of the drawn piano keys, for mouse hit testing.
/// Updated on every render.
#[derive(Debug, Clone, Default)]
pub struct KeyboardLayout {
    /// The whole keyboard panel.
    pub area: Rect,
    pub white: Vec<(NoteId, Rect)>,
    /// Drawn on top of the white keys, so checked first.
    pub black: Vec<(NoteId, Rect)>,
}

impl KeyboardLayout {
    /// Returns the key under the given screen coordinates.
    pub fn note_at(&self, x: u16, y: u16) -> Option<NoteId> {
        if !contains(self.area, x, y) {
            return None;
        }
        self.black
            .iter()
            .chain(self.white.iter())
            .find(|(_, rect)| contains(*rect, x, y))
            .map(|(note, _)| *note)
    }
}

/// Checks if a point is within a rectangle.
fn contains(rect: Rect, x: u16, y: u16) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

/// Main application state.
pub struct App {
    /// The playback and recording engine.
    pub piano: Piano,
    /// Keys the engine currently shows as sounding.
    pub keys: ActiveKeys,
    /// Computer keys held down, with the time of their last press.
    held: HashMap<char, (NoteId, Instant)>,
    /// Note held with the mouse.
    pointer: Option<NoteId>,
    /// Whether the terminal reports key releases. Without them, held keys
    /// are released after [`HOLD_TIMEOUT`].
    pub release_events: bool,
    /// Status message to display.
    pub status_message: Option<(String, Instant)>,
    /// Layout of the drawn keys (updated each frame).
    pub layout: KeyboardLayout,
}

impl App {
    /// Creates a new application playing through the default audio device.
    ///
    /// # Errors
    ///
    /// Returns error if the audio engine cannot be initialized
    pub fn new(config: EngineConfig) -> Result<Self> {
        let keys = ActiveKeys::new();
        let piano = Piano::new(config)?.with_indicator(Box::new(keys.clone()));
        Ok(Self::with_piano(piano, keys))
    }

    /// Wraps an existing engine. `keys` must be the engine's indicator.
    pub fn with_piano(piano: Piano, keys: ActiveKeys) -> Self {
        Self {
            piano,
            keys,
            held: HashMap::new(),
            pointer: None,
            release_events: false,
            status_message: None,
            layout: KeyboardLayout::default(),
        }
    }

    /// Sets a status message to display temporarily.
    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), Instant::now()));
    }

    /// Clears expired status messages.
    pub fn clear_expired_status(&mut self) {
        if let Some((_, time)) = &self.status_message {
            if time.elapsed() > STATUS_TIMEOUT {
                self.status_message = None;
            }
        }
    }

    /// Loads every keyboard sample up front.
    pub fn preload(&mut self) {
        let failures = self.piano.preload(&keyboard_notes());
        if !failures.is_empty() {
            let missing: Vec<String> = failures.iter().map(|f| f.note().to_string()).collect();
            self.set_status(format!("Missing samples: {}", missing.join(" ")));
        }
    }

    /// Handles a key press for note input.
    ///
    /// Auto-repeat presses of a held key only refresh its hold time.
    ///
    /// # Returns
    ///
    /// true if the key was handled as a note
    pub fn handle_key_press(&mut self, key: char, now: Instant) -> bool {
        let key = key.to_ascii_lowercase();
        let Some(note) = note_for_key(key) else {
            return false;
        };
        if let Some((_, last)) = self.held.get_mut(&key) {
            *last = now;
            return true;
        }
        self.held.insert(key, (note, now));
        self.piano.play_note(note);
        true
    }

    /// Handles a key release reported by the terminal.
    pub fn handle_key_release(&mut self, key: char) {
        self.release_events = true;
        if let Some((note, _)) = self.held.remove(&key.to_ascii_lowercase()) {
            self.piano.stop_note(note);
        }
    }

    /// Releases keys that were not repeated within [`HOLD_TIMEOUT`].
    /// Does nothing once the terminal has shown it reports releases.
    pub fn release_stale_keys(&mut self, now: Instant) {
        if self.release_events {
            return;
        }
        let stale: Vec<char> = self
            .held
            .iter()
            .filter(|(_, (_, last))| now.saturating_duration_since(*last) >= HOLD_TIMEOUT)
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            if let Some((note, _)) = self.held.remove(&key) {
                self.piano.stop_note(note);
            }
        }
    }

    /// Returns true while `key` is held down.
    pub fn is_key_held(&self, key: char) -> bool {
        self.held.contains_key(&key.to_ascii_lowercase())
    }

    /// Handles a mouse button press on the keyboard.
    pub fn handle_pointer_down(&mut self, x: u16, y: u16) {
        self.move_pointer(self.layout.note_at(x, y));
    }

    /// Handles a mouse drag; leaving a key stops it, entering one plays it.
    pub fn handle_pointer_drag(&mut self, x: u16, y: u16) {
        if self.pointer.is_some() {
            self.move_pointer(self.layout.note_at(x, y));
        }
    }

    /// Handles a mouse button release.
    pub fn handle_pointer_up(&mut self) {
        self.move_pointer(None);
    }

    fn move_pointer(&mut self, target: Option<NoteId>) {
        if self.pointer == target {
            return;
        }
        if let Some(note) = self.pointer.take() {
            self.piano.stop_note(note);
        }
        if let Some(note) = target {
            self.piano.play_note(note);
            self.pointer = Some(note);
        }
    }

    /// Changes the volume by `delta`, snapped to one decimal.
    pub fn adjust_volume(&mut self, delta: f32) {
        let level = ((self.piano.volume() + delta) * 10.0).round() / 10.0;
        self.piano.set_volume(level);
        self.set_status(format!("Volume: {:.0}%", self.piano.volume() * 100.0));
    }

    pub fn volume_up(&mut self) {
        self.adjust_volume(VOLUME_STEP);
    }

    pub fn volume_down(&mut self) {
        self.adjust_volume(-VOLUME_STEP);
    }

    pub fn start_recording(&mut self) {
        if self.piano.is_recording() {
            self.set_status("Already recording");
            return;
        }
        self.piano.start_recording();
        self.set_status("Recording...");
    }

    pub fn stop_recording(&mut self) {
        if !self.piano.is_recording() {
            self.set_status("Not recording");
            return;
        }
        match self.piano.stop_recording() {
            Some(path) => self.set_status(format!("Saved {}", path.display())),
            None => self.set_status("Recording failed, see log"),
        }
    }

    pub fn export_event_log(&mut self) {
        match self.piano.export_event_log() {
            Some(path) => self.set_status(format!("Saved {}", path.display())),
            None => self.set_status("Event log export failed, see log"),
        }
    }

    /// Stops every note held by keyboard or mouse.
    pub fn release_all(&mut self) {
        for (_, (note, _)) in self.held.drain() {
            self.piano.stop_note(note);
        }
        if let Some(note) = self.pointer.take() {
            self.piano.stop_note(note);
        }
    }

    /// Per-frame housekeeping.
    pub fn tick(&mut self, now: Instant) {
        self.piano.poll();
        self.release_stale_keys(now);
        self.clear_expired_status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::samples::testing::wav_bytes;
    use crate::audio::samples::MemorySource;
    use crate::audio::voices::NoteState;
    use crate::recording::artifact::MemorySink;
    use std::sync::Arc;

    fn note(name: &str) -> NoteId {
        name.parse().unwrap()
    }

    fn app() -> App {
        let mut source = MemorySource::new();
        for note in keyboard_notes() {
            source.insert(note, wav_bytes(4000, 1, 8000, 8000));
        }
        let config = EngineConfig {
            sample_rate: 8000,
            ..EngineConfig::default()
        };
        let keys = ActiveKeys::new();
        let piano = Piano::headless(config)
            .unwrap()
            .with_source(Arc::new(source))
            .with_indicator(Box::new(keys.clone()))
            .with_artifact_sink(Box::new(MemorySink::new()));
        let mut app = App::with_piano(piano, keys);
        app.preload();
        app
    }

    #[test]
    fn test_keyboard_map_covers_two_octaves() {
        let notes = keyboard_notes();
        assert_eq!(notes.len(), 24);
        assert_eq!(notes[0], note("C4"));
        assert_eq!(notes[23], note("B5"));
        assert!(notes.windows(2).all(|w| w[1].semitone() == w[0].semitone() + 1));

        let black: String = KEYBOARD_MAP
            .iter()
            .filter(|(_, n)| note(n).is_black())
            .map(|(k, _)| *k)
            .collect();
        assert_eq!(black, "sdghj23567");
    }

    #[test]
    fn test_key_lookup() {
        assert_eq!(note_for_key('z'), Some(note("C4")));
        assert_eq!(note_for_key('U'), Some(note("B5")));
        assert_eq!(note_for_key('p'), None);
        assert_eq!(key_for_note(&note("Eb5")), Some('3'));
        assert_eq!(key_for_note(&note("C6")), None);
    }

    #[test]
    fn test_press_and_release() {
        let mut app = app();
        let now = Instant::now();
        assert!(app.handle_key_press('z', now));
        assert!(!app.handle_key_press('p', now));
        assert_eq!(app.piano.note_state(&note("C4")), NoteState::Sounding);
        assert!(app.keys.is_active(&note("C4")));

        app.handle_key_release('Z');
        assert!(app.release_events);
        assert!(!app.is_key_held('z'));
        assert_eq!(app.piano.note_state(&note("C4")), NoteState::Releasing);
        assert!(!app.keys.is_active(&note("C4")));
    }

    #[test]
    fn test_hold_timeout_without_release_events() {
        let mut app = app();
        let t0 = Instant::now();
        app.handle_key_press('q', t0);
        // Auto-repeat keeps the key held.
        app.handle_key_press('q', t0 + Duration::from_millis(500));
        app.release_stale_keys(t0 + Duration::from_millis(1000));
        assert!(app.is_key_held('q'));
        assert_eq!(app.piano.note_state(&note("C5")), NoteState::Sounding);

        app.release_stale_keys(t0 + Duration::from_millis(1200));
        assert!(!app.is_key_held('q'));
        assert_eq!(app.piano.note_state(&note("C5")), NoteState::Releasing);
    }

    #[test]
    fn test_no_timeout_once_releases_seen() {
        let mut app = app();
        let t0 = Instant::now();
        app.handle_key_release('x');
        app.handle_key_press('z', t0);
        app.release_stale_keys(t0 + Duration::from_secs(10));
        assert!(app.is_key_held('z'));
    }

    #[test]
    fn test_pointer_press_drag_release() {
        let mut app = app();
        app.layout = KeyboardLayout {
            area: Rect::new(0, 0, 20, 5),
            white: vec![
                (note("C4"), Rect::new(0, 0, 6, 5)),
                (note("D4"), Rect::new(6, 0, 6, 5)),
            ],
            black: vec![(note("Db4"), Rect::new(4, 0, 4, 3))],
        };
        assert_eq!(app.layout.note_at(5, 1), Some(note("Db4")));
        assert_eq!(app.layout.note_at(5, 4), Some(note("C4")));

        app.handle_pointer_down(1, 1);
        assert_eq!(app.piano.note_state(&note("C4")), NoteState::Sounding);
        app.handle_pointer_drag(2, 1);
        assert_eq!(app.piano.sounding_notes(), vec![note("C4")]);

        app.handle_pointer_drag(10, 4);
        assert_eq!(app.piano.note_state(&note("C4")), NoteState::Releasing);
        assert_eq!(app.piano.note_state(&note("D4")), NoteState::Sounding);

        app.handle_pointer_drag(30, 4);
        assert_eq!(app.piano.note_state(&note("D4")), NoteState::Releasing);
        // Dragging back onto a key after leaving the keyboard does nothing.
        app.handle_pointer_drag(1, 1);
        assert!(app.piano.sounding_notes().is_empty());
        app.handle_pointer_up();
    }

    #[test]
    fn test_note_at_outside_panel() {
        let layout = KeyboardLayout {
            area: Rect::new(0, 0, 6, 5),
            // Wider than the panel, as after a resize shrank it.
            white: vec![(note("C4"), Rect::new(0, 0, 10, 5))],
            black: vec![],
        };
        assert_eq!(layout.note_at(3, 2), Some(note("C4")));
        assert_eq!(layout.note_at(8, 2), None);
        assert_eq!(KeyboardLayout::default().note_at(0, 0), None);
    }

    #[test]
    fn test_volume_steps_clamp() {
        let mut app = app();
        app.volume_up();
        assert_eq!(app.piano.volume(), 1.0);
        for _ in 0..3 {
            app.volume_down();
        }
        assert!((app.piano.volume() - 0.7).abs() < 1e-6);
        for _ in 0..20 {
            app.volume_down();
        }
        assert_eq!(app.piano.volume(), 0.0);
    }

    #[test]
    fn test_recording_controls() {
        let mut app = app();
        app.stop_recording();
        assert!(!app.piano.is_recording());
        app.start_recording();
        assert!(app.piano.is_recording());
        app.handle_key_press('z', Instant::now());
        app.release_all();
        app.stop_recording();
        assert!(!app.piano.is_recording());
        assert_eq!(app.piano.recorded_events().len(), 2);
    }
}
