//! Symbolic recording of note on/off events.
//!
//! Times are milliseconds since the session started. The exported document
//! is a JSON array of `{"note", "startTime", "type"}` objects.

use crate::error::RecordingError;
use crate::note::NoteId;
use crate::recording::artifact::Artifact;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Media type of the exported event log.
pub const EVENT_LOG_MEDIA_TYPE: &str = "application/json";

/// Whether a note started or stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    NoteOn,
    NoteOff,
}

/// One logged event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    pub note: NoteId,
    /// Milliseconds since the session started.
    pub start_time: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
}

/// Collects note events for the current session.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Vec<NoteEvent>,
    started: Option<Instant>,
    active: bool,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new session, discarding the previous one's events.
    pub fn start(&mut self, now: Instant) {
        self.events.clear();
        self.started = Some(now);
        self.active = true;
    }

    /// Ends the session. Events stay available for export.
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Appends an event if a session is active. Returns whether it was kept.
    ///
    /// Elapsed time never goes below zero or below the previous entry.
    pub fn record(&mut self, note: NoteId, kind: EventKind, now: Instant) -> bool {
        let Some(started) = self.started.filter(|_| self.active) else {
            return false;
        };
        let elapsed = now.saturating_duration_since(started).as_millis() as u64;
        let floor = self.events.last().map_or(0, |e| e.start_time);
        self.events.push(NoteEvent {
            note,
            start_time: elapsed.max(floor),
            kind,
        });
        debug!(note = %note, ?kind, elapsed, "Recorded note event");
        true
    }

    /// Events of the current (or last) session, in arrival order.
    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    /// Serializes the events as a pretty-printed JSON array.
    pub fn to_json(&self) -> Result<String, RecordingError> {
        Ok(serde_json::to_string_pretty(&self.events)?)
    }

    /// Parses a document produced by [`to_json`](Self::to_json).
    pub fn parse_json(json: &str) -> Result<Vec<NoteEvent>, RecordingError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Packages the event log as `piano-recording-<stamp>.json`.
    pub fn export(&self, stamp: &str) -> Result<Artifact, RecordingError> {
        let json = self.to_json()?;
        Ok(Artifact::new(
            stamp,
            "json",
            EVENT_LOG_MEDIA_TYPE,
            json.into_bytes(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn note(name: &str) -> NoteId {
        name.parse().unwrap()
    }

    #[test]
    fn test_records_only_while_active() {
        let mut rec = EventRecorder::new();
        let t0 = Instant::now();
        assert!(!rec.record(note("C4"), EventKind::NoteOn, t0));

        rec.start(t0);
        assert!(rec.record(note("C4"), EventKind::NoteOn, t0 + Duration::from_millis(12)));
        rec.stop();
        assert!(!rec.record(note("C4"), EventKind::NoteOff, t0 + Duration::from_millis(40)));

        assert_eq!(
            rec.events(),
            &[NoteEvent {
                note: note("C4"),
                start_time: 12,
                kind: EventKind::NoteOn,
            }]
        );
    }

    #[test]
    fn test_new_session_clears_events() {
        let mut rec = EventRecorder::new();
        let t0 = Instant::now();
        rec.start(t0);
        rec.record(note("C4"), EventKind::NoteOn, t0);
        rec.start(t0 + Duration::from_secs(1));
        assert!(rec.events().is_empty());
    }

    #[test]
    fn test_elapsed_never_negative_or_decreasing() {
        let mut rec = EventRecorder::new();
        let t0 = Instant::now() + Duration::from_secs(10);
        rec.start(t0);
        // An instant before the session start clamps to zero.
        rec.record(note("C4"), EventKind::NoteOn, t0 - Duration::from_millis(5));
        rec.record(note("D4"), EventKind::NoteOn, t0 + Duration::from_millis(30));
        rec.record(note("D4"), EventKind::NoteOff, t0 + Duration::from_millis(20));

        let times: Vec<u64> = rec.events().iter().map(|e| e.start_time).collect();
        assert_eq!(times, vec![0, 30, 30]);
    }

    #[test]
    fn test_json_shape() {
        let mut rec = EventRecorder::new();
        let t0 = Instant::now();
        rec.start(t0);
        rec.record(note("Db5"), EventKind::NoteOn, t0 + Duration::from_millis(250));
        rec.record(note("Db5"), EventKind::NoteOff, t0 + Duration::from_millis(500));

        let value: serde_json::Value = serde_json::from_str(&rec.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                {"note": "Db5", "startTime": 250, "type": "noteOn"},
                {"note": "Db5", "startTime": 500, "type": "noteOff"}
            ])
        );
        let parsed = EventRecorder::parse_json(&rec.to_json().unwrap()).unwrap();
        assert_eq!(parsed, rec.events());
    }

    #[test]
    fn test_export_artifact() {
        let rec = EventRecorder::new();
        let artifact = rec.export("2026-10-19T00:00:00.000Z").unwrap();
        assert_eq!(
            artifact.file_name,
            "piano-recording-2026-10-19T00:00:00.000Z.json"
        );
        assert_eq!(artifact.media_type, "application/json");
        assert_eq!(artifact.bytes, b"[]");
    }
}
