//! # pitchpipe - Interactive Tuner & Ambient Player CLI
//!
//! Terminal frontend for the pitchpipe core. It wires three threads together:
//!
//! - **Audio thread**: receives capture frames, runs the FFT and the
//!   per-tick analysis, and streams snapshots back to the main loop.
//! - **Stdin thread**: forwards typed commands as lines.
//! - **Main thread**: owns the playback scheduler, handles commands, pumps
//!   the deferred-removal timer, and paints the status line.
//!
//! Communication is crossbeam channels throughout; the audio thread shuts
//! down over a dedicated bounded(1) signal channel.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use pitchpipe_core::analysis::{Analyzer, MUSICAL_RANGE};
use pitchpipe_core::audio::{self, SyntheticSource};
use pitchpipe_core::config::TunerConfig;
use pitchpipe_core::fft::{DEFAULT_SMOOTHING, SpectrumAnalyzer};
use pitchpipe_core::noise::{self, ColoredNoiseConfig};
use pitchpipe_core::note::{self, PitchClass};
use pitchpipe_core::playback::{
    CancelStrategy, EnvelopeParams, PlayerOptions, SamplePlayer, SourceDescriptor, build_player,
};
use pitchpipe_core::AnalysisSnapshot;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Playback stream sample rate. The output device must support a 44.1 kHz
/// f32 configuration or playback is disabled for the session.
const PLAYBACK_SAMPLE_RATE: u32 = 44_100;

/// Sample rate assumed by the synthetic fallback source.
const FALLBACK_SAMPLE_RATE: u32 = 44_100;

/// Scheduling delay for newly requested voices, so the first envelope ramp
/// never lands in the past.
const PLAY_DELAY: f64 = 0.02;

/// How often the status line refreshes.
const DISPLAY_PERIOD: Duration = Duration::from_millis(250);

/// Path of the persisted configuration.
const CONFIG_PATH: &str = "pitchpipe.json";

/// Audio worker thread management structure.
///
/// Handles the dedicated analysis thread and provides a way to shut it down
/// gracefully.
struct AudioWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioWorker {
    fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

fn main() -> Result<()> {
    eprintln!("[MAIN] Starting pitchpipe...");
    let config = load_config(CONFIG_PATH);

    // --- Playback path ---
    let strategy = if config.native_cancel {
        CancelStrategy::NativeHold
    } else {
        CancelStrategy::CompensatedRamp {
            boost: config.compensation_boost,
        }
    };
    let (mut player, mixer) = build_player(
        PLAYBACK_SAMPLE_RATE,
        PlayerOptions {
            strategy,
            silence_fade: config.silence_fade,
        },
    );
    let _output_stream = match audio::start_audio_output(mixer) {
        Ok(stream) => Some(stream),
        Err(e) => {
            eprintln!("[MAIN] Audio output unavailable, playback disabled: {e}");
            None
        }
    };
    let playback_available = _output_stream.is_some();

    // --- Capture path (one-shot: microphone or synthetic, decided once) ---
    let (raw_tx, raw_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
    let (synthetic_shutdown_tx, synthetic_shutdown_rx) = crossbeam_channel::bounded(1);
    let mut synthetic: Option<SyntheticSource> = None;
    let (_capture_stream, capture_rate) = match audio::start_audio_capture(raw_tx.clone()) {
        Ok((stream, rate)) => (Some(stream), rate),
        Err(e) => {
            eprintln!("[MAIN] Audio capture unavailable: {e}");
            eprintln!("[MAIN] Falling back to the synthetic source (try 'debug <hz>')");
            synthetic = Some(audio::start_synthetic_source(
                raw_tx,
                FALLBACK_SAMPLE_RATE,
                synthetic_shutdown_rx,
            ));
            (None, FALLBACK_SAMPLE_RATE)
        }
    };

    // --- Analysis worker ---
    let (snapshot_tx, snapshot_rx) = crossbeam_channel::unbounded();
    let worker = start_analysis_worker(raw_rx, snapshot_tx, capture_rate, config.min_db);

    // --- Stdin commands ---
    let command_rx = start_stdin_reader();

    print_help();
    run_event_loop(
        &mut player,
        &config,
        playback_available,
        snapshot_rx,
        command_rx,
        synthetic.as_ref(),
    );

    // --- Cleanup ---
    eprintln!("[MAIN] Shutting down...");
    if let Err(e) = player.silence_all() {
        eprintln!("[MAIN] Error silencing playback: {e}");
    }
    worker.shutdown();
    if let Some(source) = synthetic {
        let _ = synthetic_shutdown_tx.send(());
        let _ = source.thread_handle.join();
    }
    eprintln!("[MAIN] Goodbye");
    Ok(())
}

/// Starts the dedicated analysis thread.
///
/// The thread owns the spectrum analyzer and the per-tick analyzer, turning
/// every raw capture frame into an [`AnalysisSnapshot`]. It exits when the
/// capture channel closes or the shutdown signal arrives.
fn start_analysis_worker(
    raw_rx: Receiver<Vec<f32>>,
    snapshot_tx: Sender<AnalysisSnapshot>,
    sample_rate: u32,
    min_db: f32,
) -> AudioWorker {
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    let thread_handle = thread::spawn(move || {
        eprintln!("[AUDIO-THREAD] Starting analysis worker...");
        let (_, max_hz) = *MUSICAL_RANGE;
        let mut spectrum = SpectrumAnalyzer::new(sample_rate, max_hz, DEFAULT_SMOOTHING);
        let analyzer = Analyzer::new(min_db);

        loop {
            crossbeam_channel::select! {
                recv(raw_rx) -> msg => match msg {
                    Ok(frame) => {
                        let snapshot = analyzer.process(spectrum.analyze(&frame));
                        if snapshot_tx.send(snapshot).is_err() {
                            eprintln!("[AUDIO-THREAD] Snapshot channel closed");
                            break;
                        }
                    }
                    Err(_) => {
                        eprintln!("[AUDIO-THREAD] Capture channel closed");
                        break;
                    }
                },
                recv(shutdown_rx) -> _ => {
                    eprintln!("[AUDIO-THREAD] Received shutdown signal");
                    break;
                }
            }
        }
        eprintln!("[AUDIO-THREAD] Analysis worker finished");
    });

    AudioWorker {
        shutdown_tx,
        thread_handle: Some(thread_handle),
    }
}

/// Forwards stdin lines over a channel; the channel closes on EOF.
fn start_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

/// The main event loop: snapshots update the status line, commands drive
/// playback, and every pass pumps the expiry timer.
fn run_event_loop(
    player: &mut SamplePlayer,
    config: &TunerConfig,
    playback_available: bool,
    snapshot_rx: Receiver<AnalysisSnapshot>,
    command_rx: Receiver<String>,
    synthetic: Option<&SyntheticSource>,
) {
    let mut last_display = Instant::now();
    let mut latest: Option<AnalysisSnapshot> = None;

    loop {
        crossbeam_channel::select! {
            recv(snapshot_rx) -> msg => match msg {
                Ok(snapshot) => latest = Some(snapshot),
                Err(_) => {
                    eprintln!("[MAIN] Analysis stream ended");
                    break;
                }
            },
            recv(command_rx) -> msg => match msg {
                Ok(line) => {
                    let command = line.trim().to_ascii_lowercase();
                    if command == "quit" || command == "exit" {
                        break;
                    }
                    if !command.is_empty() {
                        handle_command(&command, player, config, playback_available, synthetic);
                    }
                }
                Err(_) => break, // stdin closed
            },
            default(Duration::from_millis(16)) => {}
        }

        // Tick duties: deferred voice removal and the status line.
        player.reap_expired(player.now());
        if last_display.elapsed() >= DISPLAY_PERIOD {
            if let Some(snapshot) = &latest {
                show_snapshot(snapshot);
            }
            last_display = Instant::now();
        }
    }
}

/// Executes one typed command.
fn handle_command(
    command: &str,
    player: &mut SamplePlayer,
    config: &TunerConfig,
    playback_available: bool,
    synthetic: Option<&SyntheticSource>,
) {
    let mut parts = command.split_whitespace();
    let head = parts.next().unwrap_or("");

    match head {
        "help" => print_help(),
        "stop" => {
            if let Err(e) = player.silence_all() {
                eprintln!("[PLAYBACK] Error silencing: {e}");
            }
        }
        "status" => {
            let ids = player.playing_ids();
            if ids.is_empty() {
                println!("nothing playing");
            } else {
                println!("playing: {}", ids.join(", "));
            }
        }
        "save" => match save_config(config, CONFIG_PATH) {
            Ok(_) => eprintln!("[MAIN] Configuration saved to {CONFIG_PATH}"),
            Err(e) => eprintln!("[MAIN] Error saving configuration: {e}"),
        },
        "debug" => match (synthetic, parts.next().and_then(|v| v.parse::<f32>().ok())) {
            (Some(source), Some(hz)) => {
                source.set_frequency(hz);
                println!("debug source at {hz} Hz");
            }
            (None, _) => println!("debug source only available without a microphone"),
            (_, None) => println!("usage: debug <hz>"),
        },
        "white" | "brown" | "pink" => {
            if !playback_available {
                println!("playback is disabled (no output device)");
                return;
            }
            request_noise(player, config, head);
        }
        _ => {
            if let Some((pitch_class, octave)) = parse_note(head) {
                if !playback_available {
                    println!("playback is disabled (no output device)");
                    return;
                }
                request_note(player, config, pitch_class, octave);
            } else {
                println!("unknown command: {head} (try 'help')");
            }
        }
    }
}

/// Requests a reference note with voice-group semantics: the same note
/// toggles itself off, anything else replaces what is sounding.
fn request_note(
    player: &mut SamplePlayer,
    config: &TunerConfig,
    pitch_class: PitchClass,
    octave: i32,
) {
    let hz = note::note_to_hz(pitch_class, octave, 0.0);
    let id = format!("note:{pitch_class}{octave}");
    let envelope = EnvelopeParams {
        fade_in: config.note_fade_in,
        fade_out: config.note_fade_out,
        gain: config.note_gain,
    };
    let begin = player.now() + PLAY_DELAY;
    match player.request(
        &id,
        SourceDescriptor::Tone { hz },
        envelope,
        begin,
        config.note_duration(),
    ) {
        Ok(true) => println!("playing {pitch_class}{octave} ({hz:.1} Hz)"),
        Ok(false) => println!("stopped {pitch_class}{octave}"),
        Err(e) => eprintln!("[PLAYBACK] Error starting note: {e}"),
    }
}

/// Requests an ambient noise preset (infinite duration, looping buffer).
fn request_noise(player: &mut SamplePlayer, config: &TunerConfig, kind: &str) {
    let mut rng = rand::thread_rng();
    let seconds = config.noise_loop_seconds;
    let samples = match kind {
        "white" => {
            let mut buffer = noise::white_noise(&mut rng, seconds, PLAYBACK_SAMPLE_RATE);
            for sample in buffer.iter_mut() {
                *sample *= config.white_gain;
            }
            buffer
        }
        "brown" | "pink" => {
            let preset = if kind == "brown" {
                config.brown
            } else {
                config.pink
            };
            noise::colored_noise(
                &mut rng,
                seconds,
                PLAYBACK_SAMPLE_RATE,
                ColoredNoiseConfig {
                    leak: preset.leak,
                    limit: preset.limit,
                    gain: preset.gain,
                    loop_friendly: true,
                },
            )
        }
        _ => unreachable!("caller matched the preset name"),
    };

    let id = format!("noise:{kind}");
    let envelope = EnvelopeParams {
        fade_in: config.noise_fade_in,
        fade_out: 1.0,
        gain: 1.0,
    };
    let begin = player.now() + PLAY_DELAY;
    let source = SourceDescriptor::Buffer {
        samples: Arc::from(samples.into_boxed_slice()),
        looping: true,
    };
    match player.request(&id, source, envelope, begin, f64::INFINITY) {
        Ok(true) => println!("playing {kind} noise (loops until stopped)"),
        Ok(false) => println!("stopped {kind} noise"),
        Err(e) => eprintln!("[PLAYBACK] Error starting noise: {e}"),
    }
}

/// Parses commands like `a4`, `c#3` or `g#5` into a pitch class and octave.
fn parse_note(token: &str) -> Option<(PitchClass, i32)> {
    let name_len = token.chars().take_while(|c| !c.is_ascii_digit()).count();
    let (name, octave) = token.split_at(name_len);
    let pitch_class: PitchClass = name.parse().ok()?;
    let octave: i32 = octave.parse().ok()?;
    (0..=8).contains(&octave).then_some((pitch_class, octave))
}

/// Paints the single-line tuner readout.
fn show_snapshot(snapshot: &AnalysisSnapshot) {
    let line = match (&snapshot.note, snapshot.peak_hz, snapshot.total_db) {
        (Some(note), Some(hz), Some(db)) => {
            format!(
                "{:<4} {:+6.1} cents  {hz:8.1} Hz  {db:7.2} dB",
                note.to_string(),
                note.cents
            )
        }
        _ => "no signal".to_string(),
    };
    print!("\r{line:<48}");
    let _ = std::io::stdout().flush();
}

fn print_help() {
    println!("commands:");
    println!("  <note>        play a reference note (e.g. a4, c#3); repeat to stop");
    println!("  white|brown|pink   play looping ambient noise; repeat to stop");
    println!("  stop          silence everything");
    println!("  status        list playing voices");
    println!("  debug <hz>    set the synthetic source frequency (no-mic mode)");
    println!("  save          write {CONFIG_PATH}");
    println!("  quit          exit");
}

// --- Configuration save/load ---

/// Loads the configuration file, falling back to defaults if it is missing
/// or unreadable.
fn load_config(path: &str) -> TunerConfig {
    match std::fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(config) => {
                eprintln!("[MAIN] Loaded configuration from {path}");
                config
            }
            Err(e) => {
                eprintln!("[MAIN] Ignoring malformed {path}: {e}");
                TunerConfig::default()
            }
        },
        Err(_) => TunerConfig::default(),
    }
}

/// Saves the configuration as pretty-printed JSON.
fn save_config(config: &TunerConfig, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("serializing configuration")?;
    std::fs::write(path, json).with_context(|| format!("writing {path}"))?;
    Ok(())
}
