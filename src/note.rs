//! Note identifiers.
//!
//! A note is named by a pitch letter, an optional accidental and an octave,
//! e.g. `C4`, `Db5` or `F#3`. The name doubles as the sample file stem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use thiserror::Error;

/// Pitch letters in keyboard order, starting from C.
pub const NOTE_LETTERS: [char; 7] = ['C', 'D', 'E', 'F', 'G', 'A', 'B'];

/// One octave in chromatic order using the flat spelling for black keys,
/// matching the sample file names.
const CHROMATIC: [(char, Accidental); 12] = [
    ('C', Accidental::Natural),
    ('D', Accidental::Flat),
    ('D', Accidental::Natural),
    ('E', Accidental::Flat),
    ('E', Accidental::Natural),
    ('F', Accidental::Natural),
    ('G', Accidental::Flat),
    ('G', Accidental::Natural),
    ('A', Accidental::Flat),
    ('A', Accidental::Natural),
    ('B', Accidental::Flat),
    ('B', Accidental::Natural),
];

/// Errors produced when parsing a note name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoteParseError {
    #[error("empty note name")]
    Empty,
    #[error("invalid pitch letter '{0}'")]
    Letter(char),
    #[error("invalid octave in note name '{0}'")]
    Octave(String),
}

/// Accidental applied to a pitch letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Accidental {
    Flat,
    Natural,
    Sharp,
}

impl Accidental {
    /// Semitone offset from the natural letter.
    fn offset(self) -> i32 {
        match self {
            Accidental::Flat => -1,
            Accidental::Natural => 0,
            Accidental::Sharp => 1,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Accidental::Flat => "b",
            Accidental::Natural => "",
            Accidental::Sharp => "#",
        }
    }
}

/// Identifies one key of the piano, e.g. `C4` or `Db5`.
///
/// Ordering is lexical on (letter, accidental, octave); use
/// [`NoteId::semitone`] for pitch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NoteId {
    letter: char,
    accidental: Accidental,
    octave: i8,
}

impl NoteId {
    /// Creates a note from its parts. The letter is case-insensitive.
    pub fn new(letter: char, accidental: Accidental, octave: i8) -> Result<Self, NoteParseError> {
        let upper = letter.to_ascii_uppercase();
        if !NOTE_LETTERS.contains(&upper) {
            return Err(NoteParseError::Letter(letter));
        }
        Ok(Self {
            letter: upper,
            accidental,
            octave,
        })
    }

    /// Returns the pitch letter (always uppercase).
    pub fn letter(&self) -> char {
        self.letter
    }

    /// Returns the accidental.
    pub fn accidental(&self) -> Accidental {
        self.accidental
    }

    /// Returns the octave number.
    pub fn octave(&self) -> i8 {
        self.octave
    }

    /// Returns true for keys drawn as black keys.
    pub fn is_black(&self) -> bool {
        matches!(self.semitone().rem_euclid(12), 1 | 3 | 6 | 8 | 10)
    }

    /// Absolute pitch in semitones, with C0 = 0.
    ///
    /// Enharmonic spellings (`C#4`, `Db4`) share a value.
    pub fn semitone(&self) -> i32 {
        let base = match self.letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            _ => 11,
        };
        self.octave as i32 * 12 + base + self.accidental.offset()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.letter, self.accidental.symbol(), self.octave)
    }
}

impl FromStr for NoteId {
    type Err = NoteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let letter = chars.next().ok_or(NoteParseError::Empty)?;
        let rest = chars.as_str();

        let (accidental, octave_part) = if let Some(r) = rest.strip_prefix('b') {
            (Accidental::Flat, r)
        } else if let Some(r) = rest.strip_prefix('#') {
            (Accidental::Sharp, r)
        } else {
            (Accidental::Natural, rest)
        };

        let octave: i8 = octave_part
            .parse()
            .map_err(|_| NoteParseError::Octave(s.to_string()))?;

        NoteId::new(letter, accidental, octave)
    }
}

impl TryFrom<String> for NoteId {
    type Error = NoteParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NoteId> for String {
    fn from(note: NoteId) -> Self {
        note.to_string()
    }
}

/// Lists every key in the given octaves in pitch order, black keys spelled
/// with flats.
///
/// # Examples
///
/// ```
/// use keytone::note::piano_notes;
///
/// let keys = piano_notes(4..=5);
/// assert_eq!(keys.len(), 24);
/// assert_eq!(keys[1].to_string(), "Db4");
/// ```
pub fn piano_notes(octaves: RangeInclusive<i8>) -> Vec<NoteId> {
    octaves
        .flat_map(|octave| {
            CHROMATIC.iter().map(move |&(letter, accidental)| NoteId {
                letter,
                accidental,
                octave,
            })
        })
        .collect()
}
