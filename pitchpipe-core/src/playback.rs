//! # Playback Scheduling Module
//!
//! This module owns everything that sounds: the registry of playing voices,
//! their gain envelopes, and the sample-accurate mixer that renders them.
//!
//! ## Architecture
//! - **Event path** ([`SamplePlayer`]): called from the UI/command thread.
//!   Owns the voice registry (the single source of truth for "currently
//!   sounding") and forwards voices to the mixer over a channel. All registry
//!   mutation funnels through its methods; there is no shared global state.
//! - **Audio path** ([`Mixer`]): lives inside the output stream callback.
//!   Executes previously scheduled gain/start/stop automation against the
//!   stream's own sample clock, independent of the analysis tick.
//!
//! A voice moves through `Scheduled` (registered, before its begin time) to
//! `Sounding` (mixer renders it) to `Silencing` (fade-out running, already
//! gone from the registry) to removed. Logical silence is instantaneous:
//! [`SamplePlayer::silence_all`] clears the registry before the audible fade
//! completes.
//!
//! Expired finite-duration voices are reaped by a cooperative timer: each
//! registration schedules a generation-tagged expiry task, and the event loop
//! pumps [`SamplePlayer::reap_expired`]. A task whose voice was already
//! silenced finds nothing to remove and is a no-op.

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Exponential ramps cannot target or originate at exact zero, so envelopes
/// pass through this small floor (as a fraction of the target gain) and cover
/// the remaining distance with short linear ramps.
pub const GAIN_FLOOR: f32 = 1e-4;

/// Length of the final linear ramp from the gain floor down to exact zero.
pub const RELEASE_TAIL: f64 = 0.02;

/// Default duration of the forced fade applied by [`SamplePlayer::silence_all`].
pub const SILENCE_FADE: f64 = 0.1;

/// Default gain boost applied by [`CancelStrategy::CompensatedRamp`].
///
/// Found by ear: stepping the held gain up by ~15% before the fade-down masks
/// the restart click on hosts that cannot hold a ramp mid-flight. Empirical,
/// not derived; keep it configurable.
pub const COMPENSATION_BOOST: f32 = 1.15;

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// A monotonic, non-negative clock in seconds. Scheduling times handed to the
/// player are interpreted against this clock.
pub trait AudioClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Clock driven by the number of samples the output stream has rendered.
#[derive(Clone)]
pub struct StreamClock {
    samples: Arc<AtomicU64>,
    sample_rate: u32,
}

impl StreamClock {
    fn new(samples: Arc<AtomicU64>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

impl AudioClock for StreamClock {
    fn now(&self) -> f64 {
        self.samples.load(AtomicOrdering::Relaxed) as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// Gain automation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum RampKind {
    /// Jump to the target at the event time.
    Set,
    /// Ramp linearly from the previous event's value.
    Linear,
    /// Ramp exponentially from the previous event's value. Both endpoints
    /// must be non-zero.
    Exponential,
}

#[derive(Debug, Clone, Copy)]
struct AutomationEvent {
    time: f64,
    target: f32,
    kind: RampKind,
}

/// A scheduled gain curve: a time-ordered list of ramp targets evaluated
/// sample-accurately by the mixer.
///
/// Between two events the value interpolates from the earlier event's target
/// to the later one's, with the later event's ramp kind. Before the first
/// event the value is the initial value (zero for envelopes); after the last
/// it holds.
#[derive(Debug, Clone)]
pub struct GainAutomation {
    events: Vec<AutomationEvent>,
    initial: f32,
}

impl GainAutomation {
    pub fn new(initial: f32) -> Self {
        Self {
            events: Vec::new(),
            initial,
        }
    }

    fn push(&mut self, event: AutomationEvent) {
        let at = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(at, event);
    }

    /// Jump to `target` at `time`.
    pub fn set_value_at(&mut self, target: f32, time: f64) {
        self.push(AutomationEvent {
            time,
            target,
            kind: RampKind::Set,
        });
    }

    /// Ramp linearly to `target`, arriving at `time`.
    pub fn linear_ramp_to(&mut self, target: f32, time: f64) {
        self.push(AutomationEvent {
            time,
            target,
            kind: RampKind::Linear,
        });
    }

    /// Ramp exponentially to `target`, arriving at `time`.
    pub fn exponential_ramp_to(&mut self, target: f32, time: f64) {
        self.push(AutomationEvent {
            time,
            target,
            kind: RampKind::Exponential,
        });
    }

    /// The automation value at time `t`.
    pub fn value_at(&self, t: f64) -> f32 {
        let next_index = self.events.partition_point(|e| e.time <= t);
        let (prev_time, prev_value) = match next_index.checked_sub(1) {
            Some(i) => (self.events[i].time, self.events[i].target),
            None => (f64::NEG_INFINITY, self.initial),
        };
        let Some(next) = self.events.get(next_index) else {
            return prev_value;
        };

        let span = next.time - prev_time;
        if !span.is_finite() || span <= 0.0 {
            return prev_value;
        }
        let progress = ((t - prev_time) / span) as f32;
        match next.kind {
            RampKind::Set => prev_value,
            RampKind::Linear => prev_value + (next.target - prev_value) * progress,
            RampKind::Exponential => {
                if prev_value <= 0.0 || next.target <= 0.0 {
                    // Degenerate endpoints: an exponential curve cannot reach
                    // zero, fall back to the linear shape.
                    prev_value + (next.target - prev_value) * progress
                } else {
                    prev_value * (next.target / prev_value).powf(progress)
                }
            }
        }
    }

    /// Discards every event after `t` and holds the in-flight value there.
    pub fn cancel_and_hold(&mut self, t: f64) {
        let held = self.value_at(t);
        self.cancel_pending(t);
        self.set_value_at(held, t);
    }

    /// Discards every event after `t` without holding: an interrupted ramp
    /// snaps back to its originating value.
    pub fn cancel_pending(&mut self, t: f64) {
        self.events.truncate(self.events.partition_point(|e| e.time <= t));
    }
}

/// How [`SamplePlayer::silence_all`] interrupts scheduled envelopes.
///
/// Selected once when the player is built, never branched per call. The
/// native strategy is exact; the compensated one emulates it on hosts without
/// a cancel-and-hold primitive by boosting the interrupted gain before the
/// fade (see [`COMPENSATION_BOOST`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CancelStrategy {
    NativeHold,
    CompensatedRamp { boost: f32 },
}

impl CancelStrategy {
    fn apply(self, gain: &mut GainAutomation, at: f64) {
        match self {
            CancelStrategy::NativeHold => gain.cancel_and_hold(at),
            CancelStrategy::CompensatedRamp { boost } => {
                let current = gain.value_at(at);
                gain.cancel_pending(at);
                gain.set_value_at(current * boost, at);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// What a voice should sound like.
#[derive(Debug, Clone)]
pub enum SourceDescriptor {
    /// A pure sine tone at the given frequency.
    Tone { hz: f32 },
    /// A pre-rendered sample buffer, optionally looped.
    Buffer {
        samples: Arc<[f32]>,
        looping: bool,
    },
}

/// Rendering state for a started source.
#[derive(Debug, Clone)]
enum SourceState {
    Tone {
        hz: f32,
        phase: f32,
    },
    Buffer {
        samples: Arc<[f32]>,
        position: usize,
        looping: bool,
    },
}

impl SourceState {
    /// Validates a descriptor and builds its rendering state. A rejected
    /// descriptor is a hard failure for the requesting operation; nothing
    /// retries it.
    fn build(descriptor: SourceDescriptor) -> Result<Self> {
        match descriptor {
            SourceDescriptor::Tone { hz } => {
                if !hz.is_finite() || hz <= 0.0 {
                    return Err(anyhow!("tone frequency must be positive, got {hz}"));
                }
                Ok(SourceState::Tone { hz, phase: 0.0 })
            }
            SourceDescriptor::Buffer { samples, looping } => {
                if samples.is_empty() {
                    return Err(anyhow!("cannot start playback of an empty buffer"));
                }
                Ok(SourceState::Buffer {
                    samples,
                    position: 0,
                    looping,
                })
            }
        }
    }

    fn next_sample(&mut self, sample_rate: u32) -> f32 {
        match self {
            SourceState::Tone { hz, phase } => {
                let s = (TAU * *phase).sin();
                *phase = (*phase + *hz / sample_rate as f32) % 1.0;
                s
            }
            SourceState::Buffer {
                samples,
                position,
                looping,
            } => {
                if *position >= samples.len() {
                    if !*looping {
                        return 0.0;
                    }
                    *position = 0;
                }
                let s = samples[*position];
                *position += 1;
                s
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Shape parameters for the standard timed-event envelope.
///
/// The envelope rises linearly from zero to a small floor (exponential ramps
/// cannot originate at exact zero), then exponentially to `gain` over
/// `fade_in`; holds through the sustain window; decays exponentially back to
/// the floor over `fade_out`; and finishes with a short linear ramp to exact
/// zero. The sustain length is derived from the voice's duration.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeParams {
    pub fade_in: f64,
    pub fade_out: f64,
    pub gain: f32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            fade_in: 0.02,
            fade_out: 1.0,
            gain: 1.0,
        }
    }
}

impl EnvelopeParams {
    /// Builds the automation curve for a voice starting at `begin` and
    /// logically lasting `duration` seconds (infinite for voices that sustain
    /// until silenced).
    fn schedule(&self, begin: f64, duration: f64) -> GainAutomation {
        let floor = self.gain * GAIN_FLOOR;
        let mut automation = GainAutomation::new(0.0);
        automation.linear_ramp_to(floor, begin);
        automation.exponential_ramp_to(self.gain, begin + self.fade_in);
        if duration.is_finite() {
            let sustain_end = begin + (duration - self.fade_out).max(self.fade_in);
            automation.linear_ramp_to(self.gain, sustain_end);
            automation.exponential_ramp_to(floor, begin + duration);
            automation.linear_ramp_to(0.0, begin + duration + RELEASE_TAIL);
        }
        automation
    }
}

// ---------------------------------------------------------------------------
// Mixer (audio path)
// ---------------------------------------------------------------------------

enum MixerCommand {
    Start {
        source: SourceState,
        gain: GainAutomation,
        begin: f64,
        stop: Option<f64>,
    },
    SilenceAll {
        at: f64,
        fade: f64,
    },
}

struct MixerVoice {
    source: SourceState,
    gain: GainAutomation,
    begin: f64,
    stop: Option<f64>,
}

/// Renders scheduled voices inside the output stream callback.
///
/// The mixer consumes commands queued by the [`SamplePlayer`], mixes every
/// active voice as `source(t) * gain(t)` with per-sample resolution, and
/// advances the shared [`StreamClock`]. It never blocks and performs no
/// allocation-heavy work per sample.
pub struct Mixer {
    voices: Vec<MixerVoice>,
    commands: Receiver<MixerCommand>,
    strategy: CancelStrategy,
    sample_rate: u32,
    samples_elapsed: u64,
    shared_samples: Arc<AtomicU64>,
}

impl Mixer {
    /// A clock view of this mixer's rendered-sample counter.
    pub fn clock(&self) -> StreamClock {
        StreamClock::new(self.shared_samples.clone(), self.sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                MixerCommand::Start {
                    source,
                    gain,
                    begin,
                    stop,
                } => self.voices.push(MixerVoice {
                    source,
                    gain,
                    begin,
                    stop,
                }),
                MixerCommand::SilenceAll { at, fade } => {
                    let stop_at = at + fade;
                    for voice in &mut self.voices {
                        self.strategy.apply(&mut voice.gain, at);
                        voice.gain.linear_ramp_to(0.0, stop_at);
                        voice.stop = Some(match voice.stop {
                            Some(existing) => existing.min(stop_at),
                            None => stop_at,
                        });
                    }
                }
            }
        }
    }

    /// Fills `out` with the mono mix of every sounding voice.
    pub fn render(&mut self, out: &mut [f32]) {
        self.drain_commands();
        let dt = 1.0 / self.sample_rate as f64;
        let mut t = self.samples_elapsed as f64 * dt;
        for slot in out.iter_mut() {
            let mut mixed = 0.0f32;
            for voice in &mut self.voices {
                let started = t >= voice.begin;
                let stopped = voice.stop.is_some_and(|stop| t >= stop);
                if started && !stopped {
                    mixed += voice.source.next_sample(self.sample_rate) * voice.gain.value_at(t);
                }
            }
            *slot = mixed.clamp(-1.0, 1.0);
            t += dt;
        }
        self.samples_elapsed += out.len() as u64;
        self.shared_samples
            .store(self.samples_elapsed, AtomicOrdering::Relaxed);
        let now = self.samples_elapsed as f64 * dt;
        self.voices
            .retain(|voice| voice.stop.is_none_or(|stop| now < stop));
    }
}

// ---------------------------------------------------------------------------
// Sample player (event path)
// ---------------------------------------------------------------------------

/// Externally visible lifecycle stage of a registered voice.
///
/// `Silencing` never appears here: silenced voices leave the registry
/// immediately and only their fade tail survives on the audio path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Registered, start time not reached yet.
    Scheduled,
    /// Between its begin time and its (possibly infinite) expiry.
    Sounding,
}

#[derive(Debug, Clone)]
struct Handle {
    generation: u64,
    begin: f64,
    /// Logical expiry time for finite voices; `None` keeps the handle alive
    /// until an explicit silence.
    expires_at: Option<f64>,
}

/// A generation-tagged deferred removal task.
struct ExpiryTask {
    at: f64,
    id: String,
    generation: u64,
}

impl PartialEq for ExpiryTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for ExpiryTask {}
impl PartialOrd for ExpiryTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ExpiryTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the soonest task first.
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

/// Options for building a [`SamplePlayer`].
#[derive(Debug, Clone, Copy)]
pub struct PlayerOptions {
    pub strategy: CancelStrategy,
    /// Duration of the forced fade in [`SamplePlayer::silence_all`].
    pub silence_fade: f64,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            strategy: CancelStrategy::NativeHold,
            silence_fade: SILENCE_FADE,
        }
    }
}

/// The playback scheduler: exclusive owner of the registry of currently
/// sounding voices.
///
/// All methods are called from the single event-handling thread; the mixer
/// only ever sees voices through the command channel. Times are seconds on
/// the player's [`AudioClock`].
pub struct SamplePlayer {
    registry: HashMap<String, Handle>,
    expiry: BinaryHeap<ExpiryTask>,
    commands: Sender<MixerCommand>,
    clock: Arc<dyn AudioClock>,
    silence_fade: f64,
    next_generation: u64,
}

/// Builds a connected player/mixer pair sharing one sample clock.
///
/// The mixer goes to the output stream callback; the player stays on the
/// event path.
pub fn build_player(sample_rate: u32, options: PlayerOptions) -> (SamplePlayer, Mixer) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mixer = Mixer {
        voices: Vec::new(),
        commands: rx,
        strategy: options.strategy,
        sample_rate,
        samples_elapsed: 0,
        shared_samples: Arc::new(AtomicU64::new(0)),
    };
    let player = SamplePlayer {
        registry: HashMap::new(),
        expiry: BinaryHeap::new(),
        commands: tx,
        clock: Arc::new(mixer.clock()),
        silence_fade: options.silence_fade,
        next_generation: 0,
    };
    (player, mixer)
}

impl SamplePlayer {
    /// The current time on the playback clock, in seconds.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Whether a voice with this id is currently registered as sounding.
    pub fn is_playing(&self, id: &str) -> bool {
        self.registry.contains_key(id)
    }

    /// The lifecycle stage of a registered voice, or `None` if the id is not
    /// in the registry.
    pub fn state_of(&self, id: &str) -> Option<PlaybackState> {
        let handle = self.registry.get(id)?;
        if self.now() < handle.begin {
            Some(PlaybackState::Scheduled)
        } else {
            Some(PlaybackState::Sounding)
        }
    }

    /// Ids of every registered voice, for status display.
    pub fn playing_ids(&self) -> Vec<String> {
        self.registry.keys().cloned().collect()
    }

    /// Registers and schedules a voice.
    ///
    /// The source starts at `begin_time`. A finite `duration` runs the full
    /// fade-in/sustain/fade-out envelope and schedules automatic removal
    /// shortly after `begin_time + duration`; an infinite duration sustains
    /// at full gain until [`silence_all`](Self::silence_all).
    ///
    /// A rejected source or an unreachable mixer fails the whole operation;
    /// the error is propagated and never retried.
    pub fn play(
        &mut self,
        id: &str,
        source: SourceDescriptor,
        envelope: EnvelopeParams,
        begin_time: f64,
        duration: f64,
    ) -> Result<()> {
        let source = SourceState::build(source)?;
        let gain = envelope.schedule(begin_time, duration);
        let stop = duration
            .is_finite()
            .then(|| begin_time + duration + RELEASE_TAIL);
        self.commands
            .send(MixerCommand::Start {
                source,
                gain,
                begin: begin_time,
                stop,
            })
            .map_err(|_| anyhow!("audio mixer is gone, cannot start playback"))?;

        let generation = self.next_generation;
        self.next_generation += 1;
        self.registry.insert(
            id.to_string(),
            Handle {
                generation,
                begin: begin_time,
                expires_at: stop,
            },
        );
        if let Some(at) = stop {
            self.expiry.push(ExpiryTask {
                at,
                id: id.to_string(),
                generation,
            });
        }
        Ok(())
    }

    /// Silences every registered voice.
    ///
    /// Pending envelope automation is cancelled at the current instant (via
    /// the configured [`CancelStrategy`]), a short linear fade to zero is
    /// scheduled, and the registry is cleared immediately: the audible tail
    /// keeps running on the audio path, but nothing is logically sounding
    /// once this returns.
    pub fn silence_all(&mut self) -> Result<()> {
        if self.registry.is_empty() {
            return Ok(());
        }
        self.commands
            .send(MixerCommand::SilenceAll {
                at: self.now(),
                fade: self.silence_fade,
            })
            .map_err(|_| anyhow!("audio mixer is gone, cannot silence playback"))?;
        self.registry.clear();
        Ok(())
    }

    /// Requests playback with voice-group semantics: at most one group sounds
    /// at a time.
    ///
    /// Any request first silences everything. If the requested id was itself
    /// sounding, the request is treated as a toggle-off and no new voice
    /// starts. Returns whether a new voice was started.
    pub fn request(
        &mut self,
        id: &str,
        source: SourceDescriptor,
        envelope: EnvelopeParams,
        begin_time: f64,
        duration: f64,
    ) -> Result<bool> {
        let toggled_off = self.is_playing(id);
        self.silence_all()?;
        if toggled_off {
            return Ok(false);
        }
        self.play(id, source, envelope, begin_time, duration)?;
        Ok(true)
    }

    /// Pumps the deferred-removal timer: drops registry entries whose voices
    /// expired at or before `now`.
    ///
    /// Safe to call at any cadence. Tasks for voices that were already
    /// silenced (or replaced under the same id) are no-ops.
    pub fn reap_expired(&mut self, now: f64) {
        while let Some(task) = self.expiry.peek() {
            if task.at > now {
                break;
            }
            let task = self.expiry.pop().expect("peeked task");
            if let Some(handle) = self.registry.get(&task.id) {
                let expired = handle.expires_at.is_some_and(|at| at <= now);
                if handle.generation == task.generation && expired {
                    self.registry.remove(&task.id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: u32 = 1_000;

    fn tone() -> SourceDescriptor {
        SourceDescriptor::Tone { hz: 100.0 }
    }

    fn render_seconds(mixer: &mut Mixer, seconds: f64) -> Vec<f32> {
        let mut out = vec![0.0f32; (seconds * SR as f64) as usize];
        mixer.render(&mut out);
        out
    }

    #[test]
    fn play_registers_and_silence_all_clears() {
        let (mut player, _mixer) = build_player(SR, PlayerOptions::default());
        player
            .play(
                "a4",
                tone(),
                EnvelopeParams::default(),
                0.0,
                f64::INFINITY,
            )
            .unwrap();
        player
            .play(
                "noise",
                tone(),
                EnvelopeParams::default(),
                0.0,
                f64::INFINITY,
            )
            .unwrap();
        assert!(player.is_playing("a4"));
        assert!(player.is_playing("noise"));

        player.silence_all().unwrap();
        assert!(!player.is_playing("a4"));
        assert!(!player.is_playing("noise"));
    }

    #[test]
    fn request_toggles_off_a_sounding_id() {
        let (mut player, _mixer) = build_player(SR, PlayerOptions::default());
        let started = player
            .request("a4", tone(), EnvelopeParams::default(), 0.0, f64::INFINITY)
            .unwrap();
        assert!(started);
        assert!(player.is_playing("a4"));

        // Same id again: silence only, nothing new starts.
        let started = player
            .request("a4", tone(), EnvelopeParams::default(), 0.0, f64::INFINITY)
            .unwrap();
        assert!(!started);
        assert!(!player.is_playing("a4"));
    }

    #[test]
    fn request_replaces_the_whole_voice_group() {
        let (mut player, _mixer) = build_player(SR, PlayerOptions::default());
        player
            .request("a4", tone(), EnvelopeParams::default(), 0.0, f64::INFINITY)
            .unwrap();
        let started = player
            .request("c5", tone(), EnvelopeParams::default(), 0.0, f64::INFINITY)
            .unwrap();
        assert!(started);
        assert!(!player.is_playing("a4"));
        assert!(player.is_playing("c5"));
    }

    #[test]
    fn finite_voices_expire_via_the_cooperative_timer() {
        let (mut player, mut mixer) = build_player(SR, PlayerOptions::default());
        player
            .play("short", tone(), EnvelopeParams::default(), 0.0, 0.5)
            .unwrap();
        assert!(player.is_playing("short"));

        // Not yet expired.
        render_seconds(&mut mixer, 0.3);
        player.reap_expired(player.now());
        assert!(player.is_playing("short"));

        // Past begin + duration + tail.
        render_seconds(&mut mixer, 0.5);
        player.reap_expired(player.now());
        assert!(!player.is_playing("short"));
    }

    #[test]
    fn reaping_after_silence_all_is_a_no_op() {
        let (mut player, mut mixer) = build_player(SR, PlayerOptions::default());
        player
            .play("short", tone(), EnvelopeParams::default(), 0.0, 0.2)
            .unwrap();
        player.silence_all().unwrap();

        // Re-use the id for a long-lived voice, then let the stale expiry
        // task fire: it must not remove the new voice.
        player
            .play("short", tone(), EnvelopeParams::default(), 0.0, f64::INFINITY)
            .unwrap();
        render_seconds(&mut mixer, 1.0);
        player.reap_expired(player.now());
        assert!(player.is_playing("short"));
    }

    #[test]
    fn scheduled_voices_report_their_stage() {
        let (mut player, mut mixer) = build_player(SR, PlayerOptions::default());
        player
            .play("later", tone(), EnvelopeParams::default(), 0.5, f64::INFINITY)
            .unwrap();
        assert_eq!(player.state_of("later"), Some(PlaybackState::Scheduled));
        render_seconds(&mut mixer, 0.6);
        assert_eq!(player.state_of("later"), Some(PlaybackState::Sounding));
        assert_eq!(player.state_of("absent"), None);
    }

    #[test]
    fn rejected_sources_fail_without_registering() {
        let (mut player, _mixer) = build_player(SR, PlayerOptions::default());
        let err = player.play(
            "bad",
            SourceDescriptor::Tone { hz: -1.0 },
            EnvelopeParams::default(),
            0.0,
            1.0,
        );
        assert!(err.is_err());
        assert!(!player.is_playing("bad"));

        let err = player.play(
            "empty",
            SourceDescriptor::Buffer {
                samples: Arc::from(Vec::new().into_boxed_slice()),
                looping: true,
            },
            EnvelopeParams::default(),
            0.0,
            1.0,
        );
        assert!(err.is_err());
        assert!(!player.is_playing("empty"));
    }

    #[test]
    fn mixer_renders_silence_before_begin_and_after_stop() {
        let (mut player, mut mixer) = build_player(SR, PlayerOptions::default());
        player
            .play(
                "tone",
                tone(),
                EnvelopeParams {
                    fade_in: 0.05,
                    fade_out: 0.05,
                    gain: 1.0,
                },
                0.2,
                0.3,
            )
            .unwrap();

        let before = render_seconds(&mut mixer, 0.2);
        assert!(before.iter().all(|&s| s == 0.0));

        let during = render_seconds(&mut mixer, 0.2);
        assert!(during.iter().any(|&s| s.abs() > 0.1));

        // Well past begin + duration + tail: the voice is gone.
        render_seconds(&mut mixer, 0.5);
        let after = render_seconds(&mut mixer, 0.1);
        assert!(after.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn silence_all_fades_to_zero_within_the_fade_window() {
        let (mut player, mut mixer) = build_player(SR, PlayerOptions::default());
        player
            .play(
                "drone",
                tone(),
                EnvelopeParams {
                    fade_in: 0.01,
                    fade_out: 1.0,
                    gain: 1.0,
                },
                0.0,
                f64::INFINITY,
            )
            .unwrap();
        render_seconds(&mut mixer, 0.5);
        player.silence_all().unwrap();

        // The audible tail may still sound during the ~100 ms fade...
        render_seconds(&mut mixer, SILENCE_FADE + 0.01);
        // ...but afterwards the mixer is fully quiet.
        let after = render_seconds(&mut mixer, 0.1);
        assert!(after.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn envelope_follows_the_two_stage_shape() {
        let envelope = EnvelopeParams {
            fade_in: 0.1,
            fade_out: 0.2,
            gain: 0.8,
        };
        let automation = envelope.schedule(1.0, 1.0);

        // Silent before begin, at the floor at begin.
        assert_relative_eq!(automation.value_at(0.5), 0.0);
        assert_relative_eq!(automation.value_at(1.0), 0.8 * GAIN_FLOOR, epsilon = 1e-6);
        // Full gain through the sustain window.
        assert_relative_eq!(automation.value_at(1.1), 0.8, epsilon = 1e-4);
        assert_relative_eq!(automation.value_at(1.5), 0.8, epsilon = 1e-4);
        // Back at the floor at begin + duration, exact zero after the tail.
        assert_relative_eq!(automation.value_at(2.0), 0.8 * GAIN_FLOOR, epsilon = 1e-6);
        assert_relative_eq!(automation.value_at(2.0 + RELEASE_TAIL), 0.0);
        // The fade-out is exponential: halfway through it should sit far
        // below the linear midpoint.
        let halfway = automation.value_at(1.9);
        assert!(halfway < 0.4, "halfway={halfway}");
    }

    #[test]
    fn infinite_duration_sustains_indefinitely() {
        let envelope = EnvelopeParams {
            fade_in: 0.1,
            fade_out: 0.2,
            gain: 0.5,
        };
        let automation = envelope.schedule(0.0, f64::INFINITY);
        assert_relative_eq!(automation.value_at(0.1), 0.5, epsilon = 1e-4);
        assert_relative_eq!(automation.value_at(1_000.0), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn cancel_and_hold_freezes_the_in_flight_value() {
        let mut automation = GainAutomation::new(0.0);
        automation.set_value_at(1.0, 0.0);
        automation.linear_ramp_to(0.0, 1.0);

        automation.cancel_and_hold(0.5);
        assert_relative_eq!(automation.value_at(0.5), 0.5, epsilon = 1e-6);
        // Held: the cancelled ramp no longer pulls the value down.
        assert_relative_eq!(automation.value_at(10.0), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn compensated_cancel_boosts_then_holds() {
        let mut automation = GainAutomation::new(0.0);
        automation.set_value_at(1.0, 0.0);
        automation.linear_ramp_to(0.0, 1.0);

        let strategy = CancelStrategy::CompensatedRamp {
            boost: COMPENSATION_BOOST,
        };
        strategy.apply(&mut automation, 0.5);
        assert_relative_eq!(automation.value_at(0.5), 0.5 * 1.15, epsilon = 1e-5);
    }

    #[test]
    fn exponential_ramp_interpolates_geometrically() {
        let mut automation = GainAutomation::new(0.0);
        automation.set_value_at(0.01, 0.0);
        automation.exponential_ramp_to(1.0, 1.0);
        // Geometric interpolation passes through sqrt(0.01 * 1.0) = 0.1 at
        // the midpoint (a linear ramp would read 0.505).
        assert_relative_eq!(automation.value_at(0.5), 0.1, epsilon = 1e-4);
    }

    #[test]
    fn looping_buffer_wraps_around() {
        let samples: Arc<[f32]> = Arc::from(vec![0.25f32, -0.25, 0.5].into_boxed_slice());
        let mut source = SourceState::build(SourceDescriptor::Buffer {
            samples,
            looping: true,
        })
        .unwrap();
        let rendered: Vec<f32> = (0..7).map(|_| source.next_sample(SR)).collect();
        assert_eq!(rendered, vec![0.25, -0.25, 0.5, 0.25, -0.25, 0.5, 0.25]);
    }

    #[test]
    fn one_shot_buffer_goes_silent_at_the_end() {
        let samples: Arc<[f32]> = Arc::from(vec![0.5f32, 0.5].into_boxed_slice());
        let mut source = SourceState::build(SourceDescriptor::Buffer {
            samples,
            looping: false,
        })
        .unwrap();
        let rendered: Vec<f32> = (0..4).map(|_| source.next_sample(SR)).collect();
        assert_eq!(rendered, vec![0.5, 0.5, 0.0, 0.0]);
    }
}
