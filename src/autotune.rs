//! PID autotune using the relay feedback method.
//!
//! While a session runs, a relay drives the heater fully on below the target and fully off above
//! it. The boiler settles into a limit cycle whose amplitude `a` and period `Tu` give the ultimate
//! gain `Ku = 4d / (pi * a)` for a relay of amplitude `d`. Gains follow the classic
//! Ziegler-Nichols PID rules:
//!
//! - `Kp = 0.6 * Ku`
//! - `Ki = 1.2 * Ku / Tu`
//! - `Kd = 0.075 * Ku * Tu`
//!
//! with `Tu` in seconds, matching the one second sample time of the PID controller.

use core::f32::consts::PI;

use heapless::HistoryBuffer;

use crate::{
    config::Gains,
    controller::{ActuatorCommand, OUTPUT_THRESHOLD},
    elapsed,
    thermometer::Temperature,
    Duration, Instant,
};

/// Sessions are cancelled after this long
pub const TIMEOUT: Duration = Duration::millis(600_000);

/// The session is aborted once the temperature rises this far above the target
pub const EMERGENCY_MARGIN: Temperature = Temperature::const_from_int(10);

/// Relay output while below the target
pub const RELAY_HIGH: f32 = 255.0;
/// Relay output while above the target
pub const RELAY_LOW: f32 = 0.0;

const RELAY_AMPLITUDE: f32 = (RELAY_HIGH - RELAY_LOW) / 2.0;

/// Leading full cycles that include the initial heat up and are not used
const WARMUP_CYCLES: u32 = 1;

/// Full cycles after warm up needed to complete a session
const REQUIRED_CYCLES: usize = 3;

/// Oscillations smaller than this (degrees Celsius) give no usable gain
const MIN_AMPLITUDE: f32 = 0.25;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AutotuneState {
    Idle,
    Sampling,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AutotuneError {
    /// A session is already running. It is left untouched.
    AlreadyRunning,
}

impl AutotuneError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "AutoTune already running",
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CancelReason {
    /// Stopped without saving
    User,
    /// The sensor reported a fault
    SensorFault,
    /// The temperature passed the emergency ceiling
    OverTemperature,
}

/// How a session ended. The session is gone once an outcome has been produced.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    Complete(Gains),
    Cancelled(CancelReason),
    TimedOut,
}

/// What the relay wants this tick
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Step {
    Relay(ActuatorCommand),
    Finished(Outcome),
}

/// Process characteristics measured from the limit cycle
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Estimate {
    /// Ku, output units per degree Celsius
    pub ultimate_gain: f32,
    /// Tu in seconds
    pub ultimate_period: f32,
    /// Half the peak to trough swing in degrees Celsius
    pub amplitude: f32,
}

impl Estimate {
    /// Ziegler-Nichols PID gains
    pub fn gains(&self) -> Gains {
        let ku = self.ultimate_gain;
        let tu = self.ultimate_period;
        Gains::new(0.6 * ku, 1.2 * ku / tu, 0.075 * ku * tu)
    }
}

/// Extreme tracked over the current half cycle
#[derive(Debug, Copy, Clone)]
enum HalfCycle {
    /// Relay off, temperature overshooting above the target
    Peak(Temperature),
    /// Relay on, temperature undershooting below the target
    Trough(Temperature),
}

/// A cycle runs from one relay off switch to the next: a peak half followed by a trough half.
/// Only the most recent cycles after warm up are kept.
struct Session {
    started: Instant,
    target: Temperature,
    ceiling: Temperature,
    relay_on: bool,
    half: Option<HalfCycle>,
    /// Relay off switches so far, i.e. the index of the current cycle
    cycle: u32,
    peaks: HistoryBuffer<Temperature, REQUIRED_CYCLES>,
    troughs: HistoryBuffer<Temperature, REQUIRED_CYCLES>,
    cycle_starts: HistoryBuffer<Instant, { REQUIRED_CYCLES + 1 }>,
}

impl Session {
    fn new(target: Temperature, now: Instant) -> Self {
        Self {
            started: now,
            target,
            ceiling: target + EMERGENCY_MARGIN,
            relay_on: true,
            half: None,
            cycle: 0,
            peaks: HistoryBuffer::new(),
            troughs: HistoryBuffer::new(),
            cycle_starts: HistoryBuffer::new(),
        }
    }

    const fn output(&self) -> f32 {
        if self.relay_on {
            RELAY_HIGH
        } else {
            RELAY_LOW
        }
    }

    const fn measuring(&self) -> bool {
        self.cycle > WARMUP_CYCLES
    }

    /// Feeds one reading to the relay and the cycle bookkeeping
    fn sample(&mut self, temp: Temperature, now: Instant) {
        if self.relay_on && temp > self.target {
            self.relay_on = false;
            if let (Some(HalfCycle::Trough(low)), true) = (self.half, self.measuring()) {
                self.troughs.write(low);
            }
            self.cycle += 1;
            if self.measuring() {
                self.cycle_starts.write(now);
            }
            self.half = Some(HalfCycle::Peak(temp));
            debug!("Relay off at {=f32}", temp.to_num::<f32>());
        } else if !self.relay_on && temp < self.target {
            self.relay_on = true;
            if let (Some(HalfCycle::Peak(high)), true) = (self.half, self.measuring()) {
                self.peaks.write(high);
            }
            self.half = Some(HalfCycle::Trough(temp));
            debug!("Relay on at {=f32}", temp.to_num::<f32>());
        } else {
            self.half = match self.half {
                Some(HalfCycle::Peak(high)) => Some(HalfCycle::Peak(high.max(temp))),
                Some(HalfCycle::Trough(low)) => Some(HalfCycle::Trough(low.min(temp))),
                None => None,
            };
        }
    }

    fn cycles(&self) -> usize {
        self.cycle_starts.len().saturating_sub(1)
    }

    /// Estimate from the kept cycles, if at least `min_cycles` are available
    fn estimate(&self, min_cycles: usize) -> Option<Estimate> {
        let cycles = self.cycles();
        if cycles < min_cycles.max(1) || self.peaks.len() == 0 || self.troughs.len() == 0 {
            return None;
        }

        let amplitude = (mean(self.peaks.as_slice()) - mean(self.troughs.as_slice())) / 2.0;
        if amplitude < MIN_AMPLITUDE {
            return None;
        }

        let first = *self.cycle_starts.oldest_ordered().next()?;
        let last = *self.cycle_starts.recent()?;
        #[allow(clippy::cast_precision_loss)]
        let period = elapsed(last, first).to_millis() as f32 / 1000.0 / cycles as f32;
        if period <= 0.0 {
            return None;
        }

        Some(Estimate {
            ultimate_gain: 4.0 * RELAY_AMPLITUDE / (PI * amplitude),
            ultimate_period: period,
            amplitude,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(temps: &[Temperature]) -> f32 {
    let sum: f32 = temps.iter().map(|t| t.to_num::<f32>()).sum();
    sum / temps.len() as f32
}

/// Relay autotune state machine. Holds at most one session.
pub struct Autotuner {
    session: Option<Session>,
}

impl Default for Autotuner {
    fn default() -> Self {
        Self::new()
    }
}

impl Autotuner {
    pub const fn new() -> Self {
        Self { session: None }
    }

    pub const fn state(&self) -> AutotuneState {
        if self.session.is_some() {
            AutotuneState::Sampling
        } else {
            AutotuneState::Idle
        }
    }

    pub const fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Start time of the running session
    pub fn started(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| s.started)
    }

    /// Time since the session started, zero when idle
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.session
            .as_ref()
            .map_or(Duration::from_ticks(0), |s| elapsed(now, s.started))
    }

    /// Target the running session oscillates around
    pub fn target(&self) -> Option<Temperature> {
        self.session.as_ref().map(|s| s.target)
    }

    /// Full oscillation cycles measured so far, excluding warm up
    pub fn cycles(&self) -> usize {
        self.session.as_ref().map_or(0, Session::cycles)
    }

    /// Starts a relay experiment around `target`
    pub fn start(&mut self, target: Temperature, now: Instant) -> Result<(), AutotuneError> {
        if self.session.is_some() {
            warn!("AutoTune already running");
            return Err(AutotuneError::AlreadyRunning);
        }

        let session = Session::new(target, now);
        info!(
            "AutoTune started: target {=f32}, emergency stop {=f32}",
            target.to_num::<f32>(),
            session.ceiling.to_num::<f32>()
        );
        self.session = Some(session);
        Ok(())
    }

    /// Feeds a reading to the running session
    pub fn update(&mut self, temp: Temperature, now: Instant) -> Step {
        let Some(session) = self.session.as_mut() else {
            return Step::Relay(ActuatorCommand::Off);
        };

        if elapsed(now, session.started) >= TIMEOUT {
            warn!("AutoTune timeout - stopping");
            self.session = None;
            return Step::Finished(Outcome::TimedOut);
        }

        if temp > session.ceiling {
            error!(
                "AutoTune emergency stop: {=f32} above {=f32}",
                temp.to_num::<f32>(),
                session.ceiling.to_num::<f32>()
            );
            self.session = None;
            return Step::Finished(Outcome::Cancelled(CancelReason::OverTemperature));
        }

        session.sample(temp, now);

        if let Some(estimate) = session.estimate(REQUIRED_CYCLES) {
            let gains = estimate.gains();
            info!(
                "AutoTune sampling complete: Ku={=f32}, Tu={=f32}s, a={=f32}",
                estimate.ultimate_gain,
                estimate.ultimate_period,
                estimate.amplitude
            );
            self.session = None;
            return Step::Finished(Outcome::Complete(gains));
        }

        Step::Relay(ActuatorCommand::from_output(session.output()))
    }

    /// Ends the running session.
    ///
    /// With `save` the gains estimated so far are kept if there is enough data, otherwise this
    /// is a cancellation. Returns `None` if no session was running.
    pub fn stop(&mut self, save: bool) -> Option<Outcome> {
        let session = self.session.take()?;

        let outcome = match session.estimate(1) {
            Some(estimate) if save => Outcome::Complete(estimate.gains()),
            _ => Outcome::Cancelled(CancelReason::User),
        };

        if let Outcome::Cancelled(_) = outcome {
            info!("AutoTune cancelled");
        }
        Some(outcome)
    }

    /// Cancels the running session without saving
    pub fn abort(&mut self, reason: CancelReason) -> Option<Outcome> {
        self.session.take().map(|_| {
            warn!("AutoTune aborted: {}", reason);
            Outcome::Cancelled(reason)
        })
    }
}

// Relay outputs must straddle the heater threshold
static_assertions::const_assert!(RELAY_HIGH > OUTPUT_THRESHOLD && RELAY_LOW <= OUTPUT_THRESHOLD);
