//! # Audio Stream Module
//!
//! This module handles both directions of real-time audio using CPAL
//! (Cross-Platform Audio Library): capturing the input the tuner analyzes,
//! and driving the output stream that renders scheduled playback.
//!
//! ## Features
//! - Automatic input device selection with mono f32 configuration
//! - Frame accumulation: overlapping FFT-sized windows at a steady hop
//! - Output stream that pulls the playback mixer sample-accurately
//! - Synthetic oscillator source as the one-shot capture fallback
//!
//! Stream construction failures are hard errors for the caller; nothing in
//! here retries. The capture fallback is resolved exactly once at startup.

use crate::fft::FFT_SIZE;
use crate::playback::Mixer;
use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Step between successive analysis frames, in samples.
///
/// Each outgoing frame shares `FFT_SIZE - CAPTURE_HOP` samples with its
/// predecessor, so frames arrive every ~46 ms at 44.1 kHz instead of every
/// 186 ms.
pub const CAPTURE_HOP: usize = 2048;

/// Amplitude of the synthetic fallback source.
const SYNTHETIC_GAIN: f32 = 0.125;

/// Starts audio capture from the default input device.
///
/// This function:
/// 1. Selects the default audio input device
/// 2. Configures a mono f32 stream as close to 44.1 kHz as the device allows
/// 3. Sets up a callback that slices the incoming samples into overlapping
///    [`FFT_SIZE`] frames and forwards them to the analysis thread
///
/// # Arguments
/// * `sender` - Channel sender for streaming analysis frames
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Audio stream handle and sample rate
/// * `Err(e)` - Error if audio setup fails
pub fn start_audio_capture(sender: Sender<Vec<f32>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    println!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, 44100)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let chosen = supported_config
        .clone()
        .try_with_sample_rate(cpal::SampleRate(44100))
        .unwrap_or_else(|| supported_config.with_max_sample_rate());
    let sample_rate_val = chosen.sample_rate().0;
    let config: cpal::StreamConfig = chosen.into();

    println!("Selected input sample rate: {} Hz", sample_rate_val);

    let err_fn = |err| eprintln!("An error occurred on the audio stream: {}", err);

    // This buffer accumulates audio data from the callback.
    let mut audio_buffer: Vec<f32> = Vec::with_capacity(FFT_SIZE * 2);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            audio_buffer.extend_from_slice(data);

            // Emit a frame for every hop of new data, keeping the overlap.
            while audio_buffer.len() >= FFT_SIZE {
                let frame = audio_buffer[..FFT_SIZE].to_vec();
                // Send the frame, ignoring errors if the channel is full.
                let _ = sender.try_send(frame);
                audio_buffer.drain(..CAPTURE_HOP);
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok((stream, sample_rate_val))
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Preference order: mono channel, 32-bit float format, sample rate range
/// closest to the target.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min_diff = (c.min_sample_rate().0 as i32 - target_rate as i32).abs();
            let max_diff = (c.max_sample_rate().0 as i32 - target_rate as i32).abs();
            min_diff.min(max_diff)
        })
}

/// Starts the playback output stream, moving the mixer into its callback.
///
/// The device's f32 output configuration nearest the mixer's sample rate is
/// used; the mono mix is duplicated across however many channels the device
/// exposes. Failure to build or start the stream is fatal for playback and is
/// propagated to the caller.
pub fn start_audio_output(mut mixer: Mixer) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;

    println!("Using audio output device: {}", device.name()?);

    let target_rate = mixer.sample_rate();
    let configs = device.supported_output_configs()?.collect::<Vec<_>>();
    let supported_config = configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min_diff = (c.min_sample_rate().0 as i32 - target_rate as i32).abs();
            let max_diff = (c.max_sample_rate().0 as i32 - target_rate as i32).abs();
            min_diff.min(max_diff)
        })
        .ok_or_else(|| anyhow!("No suitable f32 output format found"))?;

    let with_rate = supported_config
        .try_with_sample_rate(cpal::SampleRate(target_rate))
        .ok_or_else(|| {
            anyhow!("output device cannot run at the playback rate of {target_rate} Hz")
        })?;
    let config: cpal::StreamConfig = with_rate.into();
    let channels = config.channels as usize;

    let err_fn = |err| eprintln!("An error occurred on the audio stream: {}", err);

    let mut mono = Vec::new();
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            mono.resize(frames, 0.0);
            mixer.render(&mut mono);
            for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                frame.fill(sample);
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok(stream)
}

/// Handle to the synthetic fallback source thread.
///
/// Dropping the handle does not stop the thread; send on the shutdown
/// channel the caller holds, as with the capture worker.
pub struct SyntheticSource {
    /// Debug frequency in Hz, stored as f32 bits. Zero or negative reads as
    /// silence.
    frequency_bits: Arc<AtomicU32>,
    pub thread_handle: JoinHandle<()>,
}

impl SyntheticSource {
    /// Updates the oscillator frequency, taking effect on the next frame.
    pub fn set_frequency(&self, hz: f32) {
        self.frequency_bits.store(hz.to_bits(), Ordering::Relaxed);
    }
}

/// Starts the synthetic oscillator source used when no microphone can be
/// acquired.
///
/// A worker thread produces the same overlapping [`FFT_SIZE`] frames the
/// real capture path would, at the same hop cadence, containing a pure sine
/// at a runtime-adjustable debug frequency. This is a fallback, not a retry:
/// the capture decision is made once at startup.
pub fn start_synthetic_source(
    sender: Sender<Vec<f32>>,
    sample_rate: u32,
    shutdown: Receiver<()>,
) -> SyntheticSource {
    let frequency_bits = Arc::new(AtomicU32::new(0.0f32.to_bits()));
    let bits = frequency_bits.clone();

    let thread_handle = std::thread::spawn(move || {
        let mut window: Vec<f32> = vec![0.0; FFT_SIZE];
        let mut phase = 0.0f32;
        let hop_period = Duration::from_secs_f64(CAPTURE_HOP as f64 / sample_rate as f64);
        loop {
            if shutdown.try_recv().is_ok() {
                break;
            }
            let hz = f32::from_bits(bits.load(Ordering::Relaxed));
            window.copy_within(CAPTURE_HOP.., 0);
            for sample in window.iter_mut().skip(FFT_SIZE - CAPTURE_HOP) {
                if hz > 0.0 {
                    *sample = SYNTHETIC_GAIN * (TAU * phase).sin();
                    phase = (phase + hz / sample_rate as f32) % 1.0;
                } else {
                    *sample = 0.0;
                }
            }
            if sender.send(window.clone()).is_err() {
                break;
            }
            std::thread::sleep(hop_period);
        }
    });

    SyntheticSource {
        frequency_bits,
        thread_handle,
    }
}
