//! # Analysis Pipeline Module
//!
//! One tick of the tuner: take the latest spectrum frame, find its peak, and
//! decide whether there is a musical signal worth reporting. Everything the
//! display layer shows comes out of here as a single snapshot.
//!
//! A frame with no usable peak (below the noise floor, or outside the
//! musical range) produces a snapshot whose note and loudness are `None` -
//! "no signal" is an ordinary result, not an error.

use crate::note::{self, Note, PitchClass};
use crate::spectrum::{self, SPL_REFERENCE_DB, SpectrumFrame};
use once_cell::sync::Lazy;

/// Frequency bounds of the musical range the tuner reports, in Hz.
///
/// Computed once at startup: half a semitone below A1 up to half a semitone
/// above A7, so every note between them snaps to something inside the range.
pub static MUSICAL_RANGE: Lazy<(f32, f32)> = Lazy::new(|| {
    (
        note::note_to_hz(PitchClass::A, 1, -50.0),
        note::note_to_hz(PitchClass::A, 7, 50.0),
    )
});

/// Default peak threshold in dB: frames whose maximum sits below this are
/// treated as silence.
pub const DEFAULT_MIN_DB: f32 = -85.0;

/// Represents the result of a single analysis tick.
#[derive(Debug, Clone)]
pub struct AnalysisSnapshot {
    /// The interpolated peak frequency in Hz, if a signal was detected.
    pub peak_hz: Option<f32>,
    /// Total loudness over the audible band in dB relative to the nominal
    /// pressure reference. Comparative only - the reference is uncalibrated.
    pub total_db: Option<f32>,
    /// The musical note nearest the peak, with its cents deviation.
    pub note: Option<Note>,
    /// The raw frame, passed through untouched for plotting.
    pub frame: SpectrumFrame,
}

/// Per-tick analyzer with the thresholds that separate signal from silence.
#[derive(Debug, Clone)]
pub struct Analyzer {
    /// Minimum peak level in dB for a frame to count as signal.
    pub min_db: f32,
    /// Lowest reportable frequency in Hz.
    pub min_hz: f32,
    /// Highest reportable frequency in Hz.
    pub max_hz: f32,
}

impl Default for Analyzer {
    fn default() -> Self {
        let (min_hz, max_hz) = *MUSICAL_RANGE;
        Self {
            min_db: DEFAULT_MIN_DB,
            min_hz,
            max_hz,
        }
    }
}

impl Analyzer {
    pub fn new(min_db: f32) -> Self {
        Self {
            min_db,
            ..Self::default()
        }
    }

    /// Processes one spectrum frame into a display snapshot.
    ///
    /// The peak is estimated first; if its level is under `min_db` or its
    /// frequency falls outside [`min_hz`, `max_hz`], the note and loudness
    /// are withheld (the null-result path) while the raw frame still flows
    /// through for plotting.
    pub fn process(&self, frame: SpectrumFrame) -> AnalysisSnapshot {
        let peak = spectrum::find_peak(&frame);
        let peak_hz = peak.hz(frame.hz_per_bin);

        if peak.db < self.min_db || peak_hz < self.min_hz || peak_hz > self.max_hz {
            return AnalysisSnapshot {
                peak_hz: None,
                total_db: None,
                note: None,
                frame,
            };
        }

        let total = spectrum::total_db(&frame) - SPL_REFERENCE_DB;
        AnalysisSnapshot {
            peak_hz: Some(peak_hz),
            total_db: Some(total),
            note: note::note_from_hz(peak_hz),
            frame,
        }
    }
}
