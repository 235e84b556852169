//! # Spectrum Measurement Module
//!
//! This module operates on one analysis frame of per-bin decibel magnitudes:
//! it locates the spectral peak with sub-bin accuracy and integrates the
//! audible band into a single loudness figure.
//!
//! ## Features
//! - Linear peak scan with first-occurrence tie-breaking
//! - Sub-bin peak interpolation via an intensity-weighted offset
//! - Flat ("Z"-weighted) loudness integration over 20 Hz - 20 kHz
//!
//! Decibel values are treated as sound *intensity* levels, so conversions use
//! a factor of 10 (`10^(db/10)`), not the 20 used for pressure amplitudes.

/// Lower edge of the audible integration band in Hz.
pub const AUDIBLE_MIN_HZ: f32 = 20.0;
/// Upper edge of the audible integration band in Hz.
pub const AUDIBLE_MAX_HZ: f32 = 20_000.0;

/// Intensity level of the nominal 20 micropascal pressure reference, in dB.
///
/// Subtracting this from an integrated level expresses it relative to the
/// conventional 0 dB SPL point. The hardware gain between the microphone and
/// the samples we see is unknown, so values offset this way are comparative
/// only, never calibrated sound pressure.
pub const SPL_REFERENCE_DB: f32 = -93.979_4; // 20 * log10(20e-6)

/// One frame of spectral analysis: per-bin magnitudes in dB plus the
/// Hz-per-bin conversion factor (`sample_rate / fft_size`).
///
/// Frames are produced once per tick by the spectrum analyzer and are
/// read-only to everything downstream.
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    /// Magnitude of each frequency bin in dB.
    pub db: Vec<f32>,
    /// Width of one bin in Hz.
    pub hz_per_bin: f32,
}

impl SpectrumFrame {
    /// Center frequency of bin `i` in Hz.
    pub fn bin_hz(&self, i: usize) -> f32 {
        i as f32 * self.hz_per_bin
    }
}

/// The interpolated spectral maximum of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakEstimate {
    /// Fractional bin index of the estimated peak. Always within one bin of
    /// the discrete maximum.
    pub bin: f32,
    /// Magnitude of the discrete maximum in dB.
    pub db: f32,
}

impl PeakEstimate {
    /// The estimated peak frequency for a frame with the given bin width.
    pub fn hz(&self, hz_per_bin: f32) -> f32 {
        self.bin * hz_per_bin
    }
}

/// Converts a decibel intensity level to linear intensity.
#[inline]
pub fn intensity_from_db(db: f32) -> f32 {
    10.0_f32.powf(db / 10.0)
}

/// Locates the spectral peak of a frame with sub-bin accuracy.
///
/// The discrete maximum is found by a linear scan (ties resolve to the first
/// occurrence). Its two neighbors are converted to linear intensity - a
/// missing neighbor at an array edge counts as zero - and the peak position
/// is nudged by an intensity-weighted offset:
///
/// ```text
/// offset = (right - left) * 0.5 / (peak - min(left, right))
/// ```
///
/// This estimates the continuous peak location between bins from how the
/// energy leaks into the neighbors, which is considerably closer to the true
/// maximum than the naive bin center.
///
/// An entirely flat (or all minus-infinity) frame degenerates to bin 0 with
/// zero offset; callers must additionally threshold `db` to decide that no
/// signal is present.
pub fn find_peak(frame: &SpectrumFrame) -> PeakEstimate {
    let values = &frame.db;
    let mut peak_index = 0usize;
    let mut peak_db = f32::NEG_INFINITY;
    for (i, &db) in values.iter().enumerate() {
        if db > peak_db {
            peak_db = db;
            peak_index = i;
        }
    }

    let neighbor = |i: Option<usize>| {
        i.and_then(|i| values.get(i))
            .map_or(0.0, |&db| intensity_from_db(db))
    };
    let left = neighbor(peak_index.checked_sub(1));
    let right = neighbor(Some(peak_index + 1));
    let peak = intensity_from_db(peak_db);

    let denominator = peak - left.min(right);
    let offset = if denominator > 0.0 {
        (right - left) * 0.5 / denominator
    } else {
        // Flat neighborhood: no leakage information, keep the bin center.
        0.0
    };

    PeakEstimate {
        bin: peak_index as f32 + offset,
        db: peak_db,
    }
}

/// Integrates a frame's intensity over the audible band into one dB figure.
///
/// Bins whose center frequency falls within [20 Hz, 20 kHz] are summed as
/// linear intensity and scaled by the bin width to approximate an integral
/// over continuous frequency, then converted back to dB. The band is
/// unweighted ("Z" weighting): no perceptual curve is applied.
///
/// The result is an uncalibrated level; subtract [`SPL_REFERENCE_DB`] to
/// express it relative to the nominal pressure reference (still comparative
/// only, see the constant's documentation).
pub fn total_db(frame: &SpectrumFrame) -> f32 {
    let hz_per_bin = frame.hz_per_bin;
    let first = (AUDIBLE_MIN_HZ / hz_per_bin).ceil() as usize;
    let last = ((AUDIBLE_MAX_HZ / hz_per_bin).ceil() as usize).min(frame.db.len());

    let mut sum_intensity = 0.0f32;
    for &db in frame.db.iter().take(last).skip(first) {
        sum_intensity += intensity_from_db(db);
    }
    // Scale the bin sum so the integral is per-Hz rather than per-bin.
    sum_intensity *= hz_per_bin;

    10.0 * sum_intensity.log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame(db: Vec<f32>, hz_per_bin: f32) -> SpectrumFrame {
        SpectrumFrame { db, hz_per_bin }
    }

    #[test]
    fn symmetric_neighbors_give_zero_offset() {
        let f = frame(vec![-80.0, -20.0, -5.0, -20.0, -80.0], 10.0);
        let peak = find_peak(&f);
        assert_relative_eq!(peak.bin, 2.0, epsilon = 1e-6);
        assert_relative_eq!(peak.db, -5.0, epsilon = 1e-6);
    }

    #[test]
    fn offset_leans_toward_the_louder_neighbor() {
        let f = frame(vec![-80.0, -30.0, -5.0, -12.0, -80.0], 10.0);
        let peak = find_peak(&f);
        assert!(peak.bin > 2.0 && peak.bin < 3.0, "bin={}", peak.bin);

        let f = frame(vec![-80.0, -12.0, -5.0, -30.0, -80.0], 10.0);
        let peak = find_peak(&f);
        assert!(peak.bin < 2.0 && peak.bin > 1.0, "bin={}", peak.bin);
    }

    #[test]
    fn flat_frame_breaks_ties_to_the_first_bin() {
        let f = frame(vec![-40.0; 8], 10.0);
        let peak = find_peak(&f);
        assert_relative_eq!(peak.bin, 0.0, epsilon = 1e-6);
        assert_relative_eq!(peak.db, -40.0, epsilon = 1e-6);
    }

    #[test]
    fn all_minus_infinity_degenerates_to_first_bin() {
        let f = frame(vec![f32::NEG_INFINITY; 8], 10.0);
        let peak = find_peak(&f);
        assert_eq!(peak.bin, 0.0);
        assert_eq!(peak.db, f32::NEG_INFINITY);
    }

    #[test]
    fn edge_peak_treats_missing_neighbor_as_silent() {
        // Peak in the last bin: the missing right neighbor counts as zero
        // intensity, so the offset pulls toward the left neighbor.
        let f = frame(vec![-80.0, -80.0, -10.0, -6.0], 10.0);
        let peak = find_peak(&f);
        assert!(peak.bin <= 3.0 && peak.bin > 2.0, "bin={}", peak.bin);
    }

    #[test]
    fn offset_never_exceeds_one_bin() {
        let f = frame(vec![-60.0, -10.0, -9.99, -60.0], 10.0);
        let peak = find_peak(&f);
        assert!((peak.bin - 2.0).abs() <= 1.0, "bin={}", peak.bin);
    }

    #[test]
    fn loudness_is_monotonic_in_any_in_band_bin() {
        let base = frame(vec![-40.0; 100], 50.0);
        let reference = total_db(&base);
        for i in 1..100 {
            // Bin 0 (0 Hz) sits below the audible band and must not count.
            let mut louder = base.clone();
            louder.db[i] += 3.0;
            let level = total_db(&louder);
            assert!(
                level > reference,
                "raising bin {i} did not raise the total ({level} <= {reference})"
            );
        }
    }

    #[test]
    fn out_of_band_bins_are_ignored() {
        let hz_per_bin = 50.0;
        let base = frame(vec![-40.0; 500], hz_per_bin);
        let reference = total_db(&base);

        // Bin 0 is 0 Hz, below the 20 Hz edge.
        let mut sub_audible = base.clone();
        sub_audible.db[0] = 20.0;
        assert_relative_eq!(total_db(&sub_audible), reference, epsilon = 1e-5);

        // Bin 450 is 22.5 kHz, above the 20 kHz edge.
        let mut ultrasonic = base;
        ultrasonic.db[450] = 20.0;
        assert_relative_eq!(total_db(&ultrasonic), reference, epsilon = 1e-5);
    }

    #[test]
    fn integration_scales_with_bin_width() {
        // Identical per-bin levels over the same band should integrate to the
        // same total regardless of resolution: twice the bins at half the
        // width covers the same energy.
        let coarse = frame(vec![-40.0; 200], 100.0);
        let fine = frame(vec![-40.0; 400], 50.0);
        assert_relative_eq!(total_db(&coarse), total_db(&fine), epsilon = 0.05);
    }

    #[test]
    fn spl_reference_matches_twenty_micropascals() {
        assert_relative_eq!(
            SPL_REFERENCE_DB,
            20.0 * (20e-6f32).log10(),
            epsilon = 1e-3
        );
    }
}
