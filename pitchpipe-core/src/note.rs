//! # Musical Note Mapping Module
//!
//! This module provides the bidirectional mapping between frequencies and
//! musical notes used throughout the tuner. All calculations are based on
//! equal temperament with A4 = 440 Hz.
//!
//! ## Features
//! - Frequency to nearest-note conversion with cents deviation
//! - Note to frequency conversion (with optional cents offset)
//! - 12 pitch classes rooted at A (the table the detector snaps to)
//!
//! The mapping is deliberately lossy away from exact semitones: converting an
//! arbitrary frequency to a note and back reproduces the snapped semitone
//! frequency, not the original input. The cents field carries the remainder.

use std::fmt;
use std::str::FromStr;

/// Reference pitch for A4 in Hz.
pub const A4_HZ: f32 = 440.0;

/// The twelve pitch classes, in the A-rooted order used for semitone
/// indexing (index 0 is A, index 1 is A#, and so on up to G#).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PitchClass {
    A,
    ASharp,
    B,
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
}

/// Semitone index table. `PITCH_CLASSES[i]` is the pitch class `i` semitones
/// above A within one octave.
pub const PITCH_CLASSES: [PitchClass; 12] = [
    PitchClass::A,
    PitchClass::ASharp,
    PitchClass::B,
    PitchClass::C,
    PitchClass::CSharp,
    PitchClass::D,
    PitchClass::DSharp,
    PitchClass::E,
    PitchClass::F,
    PitchClass::FSharp,
    PitchClass::G,
    PitchClass::GSharp,
];

impl PitchClass {
    /// Semitone offset of this pitch class above A (0-11).
    pub fn semitone_index(self) -> i32 {
        PITCH_CLASSES.iter().position(|&p| p == self).unwrap() as i32
    }

    /// The display name, e.g. `"A#"` or `"C"`.
    pub fn name(self) -> &'static str {
        match self {
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        PITCH_CLASSES
            .iter()
            .copied()
            .find(|p| p.name() == upper)
            .ok_or(())
    }
}

/// A detected or requested musical note.
///
/// `cents` is the deviation from the exact equal-temperament frequency of the
/// snapped semitone, always in (-50, 50].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub pitch_class: PitchClass,
    /// Scientific octave number (A4 = 440 Hz).
    pub octave: i32,
    /// Deviation from the snapped semitone in cents.
    pub cents: f32,
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class, self.octave)
    }
}

/// Finds the musical note closest to a given frequency.
///
/// Returns `None` for non-positive frequencies (no note can be assigned).
///
/// The frequency is expressed as a (possibly fractional) semitone distance
/// from A4, rounded to the nearest whole semitone, and split into octave,
/// pitch class and a cents remainder.
///
/// # Arguments
/// * `hz` - Input frequency in Hz
pub fn note_from_hz(hz: f32) -> Option<Note> {
    if hz <= 0.0 {
        return None;
    }
    let semitones = (hz / A4_HZ).log2() * 12.0;
    let snapped = semitones.round() as i32;
    Some(Note {
        octave: snapped.div_euclid(12) + 4,
        pitch_class: PITCH_CLASSES[snapped.rem_euclid(12) as usize],
        cents: (semitones - snapped as f32) * 100.0,
    })
}

/// Calculates the equal-temperament frequency of a note.
///
/// This is the exact inverse of [`note_from_hz`] only at snapped semitones;
/// round-tripping an arbitrary frequency reproduces the snapped frequency
/// unless its cents remainder is passed back in.
///
/// # Arguments
/// * `pitch_class` - The pitch class of the note
/// * `octave` - Scientific octave number
/// * `cents` - Additional deviation in cents (0 for the exact semitone)
pub fn note_to_hz(pitch_class: PitchClass, octave: i32, cents: f32) -> f32 {
    let exponent =
        (octave - 4) as f32 + pitch_class.semitone_index() as f32 / 12.0 + cents / 1200.0;
    A4_HZ * exponent.exp2()
}

impl Note {
    /// The frequency of this note including its cents deviation.
    pub fn hz(&self) -> f32 {
        note_to_hz(self.pitch_class, self.octave, self.cents)
    }

    /// The frequency of the snapped semitone this note sits on.
    pub fn snapped_hz(&self) -> f32 {
        note_to_hz(self.pitch_class, self.octave, 0.0)
    }
}
