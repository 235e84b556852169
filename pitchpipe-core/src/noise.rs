//! # Noise Synthesis Module
//!
//! Generates the sample buffers behind the ambient playback presets: Gaussian
//! white noise and leaky-integrated "Brownian-family" colored noise.
//!
//! Randomness comes in through [`rand::Rng`] so tests can drive everything
//! from a seeded [`rand::rngs::StdRng`]; production callers pass a thread
//! RNG. Buffers are generated once, synchronously, and then handed to the
//! playback mixer as looping sources.
//!
//! The colored generator's intermediate `leak` settings are used as a cheap
//! stand-in for pink noise. That is a heuristic, not a calibrated 1/f filter
//! (it is unclear how close to true pink it lands), and it is kept as-is on
//! purpose: the presets were voiced against this exact integrator.

use rand::Rng;
use std::f32::consts::TAU;

/// Parameters for the leaky-integrator colored noise generator.
#[derive(Debug, Clone, Copy)]
pub struct ColoredNoiseConfig {
    /// Fraction of the integrator state discarded per sample, in [0, 1].
    /// Near 0 the output approaches a random walk (red/Brownian noise);
    /// near 1 it approaches the white input.
    pub leak: f32,
    /// Soft bound on the integrator state. When exceeded, the step that
    /// crossed it is reflected rather than clamped, so brief excursions past
    /// the limit are possible.
    pub limit: f32,
    /// Output gain applied to the integrator state.
    pub gain: f32,
    /// Remove the start-to-end drift so the buffer loops without a seam.
    pub loop_friendly: bool,
}

impl Default for ColoredNoiseConfig {
    fn default() -> Self {
        Self {
            leak: 0.0,
            limit: f32::INFINITY,
            gain: 1.0,
            loop_friendly: true,
        }
    }
}

/// Fills `target` with Gaussian samples of the given mean and standard
/// deviation.
///
/// Samples are produced in pairs by the Box-Muller transform: two uniform
/// draws become a radius `u = sqrt(-2 ln r1) * std` and an angle `v = 2*pi*r2`,
/// yielding the independent normal pair `mean + u sin v`, `mean + u cos v`.
/// An odd final slot consumes one extra pair of draws for a single sample.
pub fn fill_gaussian<R: Rng>(rng: &mut R, target: &mut [f32], mean: f32, std: f32) {
    let mut draw = |rng: &mut R| {
        // Guard the open end of [0, 1): ln(0) is -inf.
        let r1 = rng.r#gen::<f32>().max(f32::MIN_POSITIVE);
        let u = (-2.0 * r1.ln()).sqrt() * std;
        let v = rng.r#gen::<f32>() * TAU;
        (u * v.sin() + mean, u * v.cos() + mean)
    };

    let mut chunks = target.chunks_exact_mut(2);
    for pair in &mut chunks {
        let (a, b) = draw(rng);
        pair[0] = a;
        pair[1] = b;
    }
    if let [last] = chunks.into_remainder() {
        *last = draw(rng).0;
    }
}

/// Generates a buffer of unit-variance Gaussian white noise.
///
/// The buffer holds `ceil(duration * sample_rate)` samples. Values are not
/// clamped; the mixer output stage bounds them.
pub fn white_noise<R: Rng>(rng: &mut R, duration: f32, sample_rate: u32) -> Vec<f32> {
    let len = (duration * sample_rate as f32).ceil() as usize;
    let mut data = vec![0.0f32; len];
    fill_gaussian(rng, &mut data, 0.0, 1.0);
    data
}

/// Generates a colored noise buffer by leaky-integrating Gaussian white noise.
///
/// Each white sample is accumulated into a state that forgets a `leak`
/// fraction of itself per step:
///
/// ```text
/// integral = integral * (1 - leak) + sample
/// ```
///
/// When the state crosses `limit` it is reflected by subtracting the crossing
/// sample twice - a soft bound that folds the walk back instead of flattening
/// it against the edge. The output is the state scaled by `gain`.
pub fn colored_noise<R: Rng>(
    rng: &mut R,
    duration: f32,
    sample_rate: u32,
    config: ColoredNoiseConfig,
) -> Vec<f32> {
    let mut data = white_noise(rng, duration, sample_rate);
    let retain = 1.0 - config.leak;
    let mut integral = 0.0f32;
    for sample in data.iter_mut() {
        integral = integral * retain + *sample;
        if integral > config.limit || integral < -config.limit {
            integral -= *sample * 2.0;
        }
        *sample = integral * config.gain;
    }
    if config.loop_friendly {
        remove_loop_drift(&mut data);
    }
    data
}

/// Subtracts the linear drift from a buffer so it ends near zero.
///
/// Looping a buffer whose last sample sits far from its first produces an
/// audible click at the seam. Removing `last / len` per sample forces the end
/// back toward the start while leaving the broad spectral character intact.
pub fn remove_loop_drift(data: &mut [f32]) {
    let n = data.len();
    if n == 0 {
        return;
    }
    let drift = data[n - 1] / n as f32;
    for (i, sample) in data.iter_mut().enumerate() {
        *sample -= drift * i as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn variance(data: &[f32]) -> f32 {
        let mean = data.iter().sum::<f32>() / data.len() as f32;
        data.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / data.len() as f32
    }

    fn max_abs(data: &[f32]) -> f32 {
        data.iter().fold(0.0f32, |m, x| m.max(x.abs()))
    }

    #[test]
    fn gaussian_fill_has_unit_statistics() {
        let mut rng = StdRng::seed_from_u64(0xA4);
        let mut data = vec![0.0f32; 100_000];
        fill_gaussian(&mut rng, &mut data, 0.0, 1.0);
        let mean = data.iter().sum::<f32>() / data.len() as f32;
        assert!(mean.abs() < 0.02, "mean={mean}");
        let var = variance(&data);
        assert!((0.95..1.05).contains(&var), "variance={var}");
    }

    #[test]
    fn gaussian_fill_handles_odd_lengths() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut data = vec![0.0f32; 7];
        fill_gaussian(&mut rng, &mut data, 3.0, 0.0);
        // std 0 collapses every sample onto the mean, including the odd tail.
        assert!(data.iter().all(|&x| (x - 3.0).abs() < 1e-6));
    }

    #[test]
    fn white_noise_length_rounds_up() {
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(white_noise(&mut rng, 0.5, 44_100).len(), 22_050);
        assert_eq!(white_noise(&mut rng, 0.0001, 44_100).len(), 5);
    }

    #[test]
    fn near_unit_leak_stays_close_to_white() {
        let mut rng = StdRng::seed_from_u64(3);
        let config = ColoredNoiseConfig {
            leak: 0.999,
            limit: f32::INFINITY,
            gain: 1.0,
            loop_friendly: false,
        };
        let colored = colored_noise(&mut rng, 1.0, 44_100, config);
        let var = variance(&colored);
        // With almost everything leaking away each step, the integrator
        // passes its input through nearly unchanged.
        assert!((0.9..1.15).contains(&var), "variance={var}");
    }

    #[test]
    fn small_leak_walks_far_but_respects_the_limit() {
        let mut rng = StdRng::seed_from_u64(4);
        let limit = 10.0;
        let config = ColoredNoiseConfig {
            leak: 0.001,
            limit,
            gain: 1.0,
            loop_friendly: false,
        };
        let colored = colored_noise(&mut rng, 2.0, 44_100, config);
        let var = variance(&colored);
        // Slow-moving excursions dwarf the unit-variance input...
        assert!(var > 5.0, "variance={var}");
        // ...but the reflecting bound keeps the walk near the limit.
        assert!(max_abs(&colored) <= limit * 1.1, "max={}", max_abs(&colored));
    }

    #[test]
    fn loop_friendly_buffer_has_no_seam() {
        let mut rng = StdRng::seed_from_u64(5);
        let config = ColoredNoiseConfig {
            leak: 0.001,
            limit: f32::INFINITY,
            gain: 1.0,
            loop_friendly: true,
        };
        let data = colored_noise(&mut rng, 1.0, 44_100, config);
        let scale = max_abs(&data);
        let seam = (data[0] - data[data.len() - 1]).abs();
        // The end lands almost exactly on zero and the start is a single
        // white-noise step away from it: tiny next to the walk's range.
        assert!(data[data.len() - 1].abs() < 1e-2);
        assert!(seam < 0.25 * scale, "seam={seam} scale={scale}");
    }

    #[test]
    fn drift_removal_preserves_short_term_shape() {
        let mut data = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        remove_loop_drift(&mut data);
        // Endpoint pulled to last/len of its original value...
        assert!((data[4] - 0.8).abs() < 1e-6);
        // ...while consecutive differences change by only drift = 0.8.
        assert!((data[1] - data[0] - 0.2).abs() < 1e-4);
    }
}
