//! Per-note voice lifecycle.
//!
//! Each note moves through `Idle → Pending → Sounding → Releasing → Idle`.
//! `Pending` covers the time a sample is still loading. Every admitted play
//! gets a fresh generation number; a load that resolves for an older
//! generation is stale and must not start a voice.

use crate::audio::bus::VoiceId;
use crate::note::NoteId;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Observable state of one note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteState {
    /// Not sounding and nothing pending.
    Idle,
    /// Admitted, waiting for its sample.
    Pending,
    /// Playing at full level.
    Sounding,
    /// Fading out after a stop.
    Releasing,
}

/// Proof that a play was admitted. Carried through the sample load and
/// checked again when the load resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    note: NoteId,
    generation: u64,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A voice owned by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    pub note: NoteId,
    pub id: VoiceId,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Pending { generation: u64 },
    Sounding(Voice),
    Releasing { voice: Voice, until: Instant },
}

/// Result of [`VoiceManager::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// A sounding voice entered its release window and should be faded.
    Fading(Voice),
    /// The note was still loading; the pending load is now stale.
    Cancelled(Ticket),
    /// Nothing to stop.
    NotActive,
}

/// Tracks which notes are sounding and enforces one live voice per note.
#[derive(Debug)]
pub struct VoiceManager {
    slots: HashMap<NoteId, Slot>,
    next_generation: u64,
    release: Duration,
}

impl VoiceManager {
    /// Creates a manager whose release window lasts `release`.
    pub fn new(release: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            next_generation: 1,
            release,
        }
    }

    /// Returns the release window.
    pub fn release_window(&self) -> Duration {
        self.release
    }

    /// Admits a play request.
    ///
    /// Returns `None` while the note is pending or sounding, which swallows
    /// duplicate triggers such as key auto-repeat. A releasing note is
    /// re-triggered: its fading voice is detached and a new play begins.
    pub fn begin(&mut self, note: NoteId) -> Option<Ticket> {
        match self.slots.get(&note) {
            Some(Slot::Pending { .. }) | Some(Slot::Sounding(_)) => {
                debug!(note = %note, "Note already active, ignoring play");
                return None;
            }
            Some(Slot::Releasing { .. }) => {
                debug!(note = %note, "Re-triggering releasing note");
            }
            None => {}
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.slots.insert(note, Slot::Pending { generation });
        Some(Ticket { note, generation })
    }

    /// Returns true if the ticket's play is still wanted.
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        matches!(
            self.slots.get(&ticket.note),
            Some(Slot::Pending { generation }) if *generation == ticket.generation
        )
    }

    /// Promotes a pending play to sounding with the given bus voice.
    ///
    /// Returns `None` for a stale ticket; the caller must not keep the voice.
    pub fn start(&mut self, ticket: Ticket, id: VoiceId) -> Option<Voice> {
        if !self.is_current(&ticket) {
            debug!(note = %ticket.note, generation = ticket.generation, "Stale start suppressed");
            return None;
        }
        let voice = Voice { note: ticket.note, id };
        self.slots.insert(ticket.note, Slot::Sounding(voice));
        Some(voice)
    }

    /// Drops a pending play whose sample failed to load.
    pub fn abandon(&mut self, ticket: Ticket) -> bool {
        if self.is_current(&ticket) {
            self.slots.remove(&ticket.note);
            true
        } else {
            false
        }
    }

    /// Stops a note.
    ///
    /// A sounding note enters its release window; a pending note is
    /// cancelled outright.
    pub fn release(&mut self, note: NoteId, now: Instant) -> Release {
        match self.slots.get(&note).copied() {
            Some(Slot::Sounding(voice)) => {
                self.slots.insert(
                    note,
                    Slot::Releasing {
                        voice,
                        until: now + self.release,
                    },
                );
                Release::Fading(voice)
            }
            Some(Slot::Pending { generation }) => {
                self.slots.remove(&note);
                Release::Cancelled(Ticket { note, generation })
            }
            Some(Slot::Releasing { .. }) | None => Release::NotActive,
        }
    }

    /// Retires every voice whose release window has elapsed by `now`.
    /// Returns the notes that became idle.
    pub fn reap(&mut self, now: Instant) -> Vec<NoteId> {
        let mut done = Vec::new();
        self.slots.retain(|note, slot| match slot {
            Slot::Releasing { until, .. } if *until <= now => {
                done.push(*note);
                false
            }
            _ => true,
        });
        done
    }

    /// Returns the state of `note`.
    pub fn state(&self, note: &NoteId) -> NoteState {
        match self.slots.get(note) {
            None => NoteState::Idle,
            Some(Slot::Pending { .. }) => NoteState::Pending,
            Some(Slot::Sounding(_)) => NoteState::Sounding,
            Some(Slot::Releasing { .. }) => NoteState::Releasing,
        }
    }

    /// Returns the voice attached to `note`, sounding or releasing.
    pub fn voice(&self, note: &NoteId) -> Option<Voice> {
        match self.slots.get(note) {
            Some(Slot::Sounding(voice)) | Some(Slot::Releasing { voice, .. }) => Some(*voice),
            _ => None,
        }
    }

    /// Notes currently sounding at full level.
    pub fn sounding(&self) -> Vec<NoteId> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Sounding(_)))
            .map(|(note, _)| *note)
            .collect()
    }

    /// Number of plays waiting for a sample.
    pub fn pending_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Pending { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::bus::{Bus, StreamFormat};
    use crate::audio::samples::SampleBuffer;
    use std::sync::Arc;

    const RELEASE: Duration = Duration::from_millis(100);

    fn note(name: &str) -> NoteId {
        name.parse().unwrap()
    }

    fn voice_id() -> VoiceId {
        let bus = Bus::new(StreamFormat::stereo(1000));
        bus.connect(Arc::new(SampleBuffer::new(vec![0.0; 2], 2, 1000)))
    }

    #[test]
    fn test_duplicate_begin_is_ignored() {
        let mut vm = VoiceManager::new(RELEASE);
        let c4 = note("C4");
        let ticket = vm.begin(c4).unwrap();
        assert!(vm.begin(c4).is_none());
        assert_eq!(vm.state(&c4), NoteState::Pending);

        vm.start(ticket, voice_id()).unwrap();
        assert!(vm.begin(c4).is_none());
        assert_eq!(vm.sounding(), vec![c4]);
    }

    #[test]
    fn test_release_then_reap() {
        let mut vm = VoiceManager::new(RELEASE);
        let c4 = note("C4");
        let t0 = Instant::now();
        let ticket = vm.begin(c4).unwrap();
        let voice = vm.start(ticket, voice_id()).unwrap();

        assert_eq!(vm.release(c4, t0), Release::Fading(voice));
        assert_eq!(vm.state(&c4), NoteState::Releasing);
        assert_eq!(vm.release(c4, t0), Release::NotActive);

        assert!(vm.reap(t0 + Duration::from_millis(99)).is_empty());
        assert_eq!(vm.reap(t0 + RELEASE), vec![c4]);
        assert_eq!(vm.state(&c4), NoteState::Idle);
    }

    #[test]
    fn test_stop_while_pending_makes_load_stale() {
        let mut vm = VoiceManager::new(RELEASE);
        let c4 = note("C4");
        let ticket = vm.begin(c4).unwrap();

        assert_eq!(vm.release(c4, Instant::now()), Release::Cancelled(ticket));
        assert!(!vm.is_current(&ticket));
        assert!(vm.start(ticket, voice_id()).is_none());
        assert_eq!(vm.state(&c4), NoteState::Idle);
    }

    #[test]
    fn test_stale_ticket_cannot_start_newer_play() {
        let mut vm = VoiceManager::new(RELEASE);
        let c4 = note("C4");
        let old = vm.begin(c4).unwrap();
        vm.release(c4, Instant::now());
        let new = vm.begin(c4).unwrap();
        assert_ne!(old.generation(), new.generation());

        assert!(vm.start(old, voice_id()).is_none());
        assert_eq!(vm.state(&c4), NoteState::Pending);
        assert!(!vm.abandon(old));
        assert!(vm.start(new, voice_id()).is_some());
    }

    #[test]
    fn test_retrigger_during_release() {
        let mut vm = VoiceManager::new(RELEASE);
        let c4 = note("C4");
        let t0 = Instant::now();
        let first = vm.begin(c4).unwrap();
        vm.start(first, voice_id()).unwrap();
        vm.release(c4, t0);

        let second = vm.begin(c4).unwrap();
        let voice = vm.start(second, voice_id()).unwrap();

        // The first release window ending must not touch the new voice.
        assert!(vm.reap(t0 + Duration::from_millis(150)).is_empty());
        assert_eq!(vm.state(&c4), NoteState::Sounding);
        assert_eq!(vm.voice(&c4), Some(voice));
    }

    #[test]
    fn test_abandon_failed_load() {
        let mut vm = VoiceManager::new(RELEASE);
        let c4 = note("C4");
        let ticket = vm.begin(c4).unwrap();
        assert_eq!(vm.pending_count(), 1);
        assert!(vm.abandon(ticket));
        assert_eq!(vm.state(&c4), NoteState::Idle);
        assert_eq!(vm.pending_count(), 0);
    }

    #[test]
    fn test_notes_are_independent() {
        let mut vm = VoiceManager::new(RELEASE);
        let (c4, d4) = (note("C4"), note("D4"));
        let tc = vm.begin(c4).unwrap();
        let td = vm.begin(d4).unwrap();
        vm.start(tc, voice_id()).unwrap();
        vm.release(d4, Instant::now());
        assert_eq!(vm.state(&c4), NoteState::Sounding);
        assert!(vm.start(td, voice_id()).is_none());
    }
}
