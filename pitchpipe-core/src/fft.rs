//! # Fast Fourier Transform (FFT) Module
//!
//! This module turns raw capture frames into the decibel spectrum frames the
//! rest of the tuner consumes. It handles windowing, the forward transform,
//! magnitude conversion and the exponential time smoothing that keeps the
//! displayed spectrum from flickering.
//!
//! ## Features
//! - High-performance FFT using RustFFT (transform planned once, reused)
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal for accurate analysis
//! - Per-bin exponential smoothing across frames (in linear magnitude)

use crate::spectrum::SpectrumFrame;
use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

/// Number of samples per analysis frame.
///
/// 8192 samples give a bin width of ~5.4 Hz at 44.1 kHz, enough to separate
/// neighboring semitones down to the bottom of the musical range once sub-bin
/// interpolation is applied.
pub const FFT_SIZE: usize = 8192;

/// Magnitudes below this floor are clamped before the dB conversion, putting
/// silence at -120 dB instead of negative infinity.
const MAGNITUDE_FLOOR: f32 = 1e-6;

/// Fraction of the previous frame kept by the smoothing filter. 0 disables
/// smoothing entirely, values near 1 make the spectrum very slow.
pub const DEFAULT_SMOOTHING: f32 = 0.5;

/// Removes the DC offset from a signal by making its average value zero.
///
/// DC offset shows up as a large 0 Hz component that can dwarf the musical
/// content; centering the signal keeps the low bins honest.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Converts time-domain capture frames into smoothed dB spectrum frames.
///
/// The analyzer owns the planned transform, the window, and the smoothing
/// state, so one instance should be reused for the lifetime of a stream. The
/// produced frames are truncated to the band of interest: bins above
/// `max_hz * 1.1` carry nothing the tuner looks at.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// `2 / sum(window)`: scales a windowed peak magnitude back to the
    /// amplitude of the underlying sinusoid.
    window_norm: f32,
    smoothing: f32,
    /// Previous smoothed magnitudes (linear, per bin).
    smoothed: Vec<f32>,
    hz_per_bin: f32,
    bins: usize,
}

impl SpectrumAnalyzer {
    /// Creates an analyzer for the given stream rate.
    ///
    /// # Arguments
    /// * `sample_rate` - Capture sample rate in Hz
    /// * `max_hz` - Highest frequency of interest; output frames keep a 10%
    ///   margin above it and drop everything beyond
    /// * `smoothing` - Exponential smoothing factor in [0, 1)
    pub fn new(sample_rate: u32, max_hz: f32, smoothing: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let n_minus_1 = (FFT_SIZE - 1) as f32;
        let window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
            .collect();
        let window_sum: f32 = window.iter().sum();

        let hz_per_bin = sample_rate as f32 / FFT_SIZE as f32;
        let bins = ((max_hz * 1.1 / hz_per_bin).ceil() as usize).min(FFT_SIZE / 2);

        Self {
            fft,
            window,
            window_norm: 2.0 / window_sum,
            smoothing: smoothing.clamp(0.0, 0.999),
            smoothed: vec![0.0; bins],
            hz_per_bin,
            bins,
        }
    }

    /// Width of one output bin in Hz (`sample_rate / FFT_SIZE`).
    pub fn hz_per_bin(&self) -> f32 {
        self.hz_per_bin
    }

    /// Number of bins in every produced frame.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Analyzes one capture frame into a dB spectrum frame.
    ///
    /// # Panics
    /// * If the frame length is not [`FFT_SIZE`]
    pub fn analyze(&mut self, signal: &[f32]) -> SpectrumFrame {
        assert_eq!(
            signal.len(),
            FFT_SIZE,
            "analysis frame must be exactly FFT_SIZE samples"
        );

        let mut processed = signal.to_vec();
        remove_dc_offset(&mut processed);

        let mut buffer: Vec<Complex<f32>> = processed
            .iter()
            .zip(self.window.iter())
            .map(|(&sample, &w)| Complex {
                re: sample * w,
                im: 0.0,
            })
            .collect();
        self.fft.process(&mut buffer);

        let db = buffer
            .iter()
            .take(self.bins)
            .zip(self.smoothed.iter_mut())
            .map(|(c, smoothed)| {
                let magnitude = c.norm() * self.window_norm;
                *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
                20.0 * smoothed.max(MAGNITUDE_FLOOR).log10()
            })
            .collect();

        SpectrumFrame {
            db,
            hz_per_bin: self.hz_per_bin,
        }
    }
}
