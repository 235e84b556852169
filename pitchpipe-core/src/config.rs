//! # Configuration Module
//!
//! Serde-backed settings for the tuner and the playback presets. The CLI
//! persists this as pretty-printed JSON next to the binary; every field has
//! a default so a partial (or missing) file still loads.

use serde::{Deserialize, Serialize};

/// Settings for one colored-noise preset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NoisePreset {
    /// Integrator leak per sample. Small values walk (brown), values toward
    /// 1 whiten; the pink preset sits in between as a heuristic.
    pub leak: f32,
    /// Soft reflection bound on the integrator.
    pub limit: f32,
    /// Output gain applied to the integrator state.
    pub gain: f32,
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Peak threshold in dB below which a frame counts as silence.
    pub min_db: f32,

    /// Reference-note envelope: fade-in time in seconds.
    pub note_fade_in: f64,
    /// Reference-note sustain time in seconds.
    pub note_sustain: f64,
    /// Reference-note fade-out time in seconds.
    pub note_fade_out: f64,
    /// Reference-note target gain.
    pub note_gain: f32,

    /// Ambient-noise fade-in time in seconds.
    pub noise_fade_in: f64,
    /// Length of the generated (looping) noise buffers in seconds.
    pub noise_loop_seconds: f32,
    /// Output level of the white-noise preset.
    pub white_gain: f32,
    /// Brownian preset: near-walk integrator.
    pub brown: NoisePreset,
    /// Pink-ish preset: the leaky-integrator approximation. Voiced by ear
    /// against this exact integrator; not a calibrated 1/f filter.
    pub pink: NoisePreset,

    /// Duration of the forced fade used when silencing everything.
    pub silence_fade: f64,
    /// Use the exact cancel-and-hold when interrupting envelopes. When
    /// false, the compensated-ramp fallback is used instead.
    pub native_cancel: bool,
    /// Gain boost for the compensated-ramp fallback (empirical, ~1.15).
    pub compensation_boost: f32,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            min_db: -85.0,

            note_fade_in: 0.05,
            note_sustain: 5.0,
            note_fade_out: 8.0,
            note_gain: 0.8,

            noise_fade_in: 0.5,
            noise_loop_seconds: 2.0,
            white_gain: 0.2,
            brown: NoisePreset {
                leak: 0.002,
                limit: 24.0,
                gain: 0.04,
            },
            pink: NoisePreset {
                leak: 0.05,
                limit: 12.0,
                gain: 0.12,
            },

            silence_fade: 0.1,
            native_cancel: true,
            compensation_boost: 1.15,
        }
    }
}

impl TunerConfig {
    /// Total logical duration of a reference note (the envelope spans it).
    pub fn note_duration(&self) -> f64 {
        self.note_fade_in + self.note_sustain + self.note_fade_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = TunerConfig::default();
        assert!(config.min_db < 0.0);
        assert!(config.note_duration() > config.note_sustain);
        assert!(config.brown.leak < config.pink.leak);
        assert!(config.compensation_boost > 1.0);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: TunerConfig = serde_json::from_str(r#"{ "min_db": -70.0 }"#).unwrap();
        assert_eq!(config.min_db, -70.0);
        assert_eq!(config.note_gain, TunerConfig::default().note_gain);
    }
}
