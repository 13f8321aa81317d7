//! Control strategies that decide what the [`Heater`](crate::heater::Heater) should do.
//!
//! Exactly one strategy is active per tick: [`Strategy::select`] picks it, [`Controllers::evaluate`]
//! runs it.

pub mod hysteresis;
pub mod pid;

use crate::{
    autotune::{Autotuner, Outcome, Step},
    config::{ControlConfig, ControlMode},
    thermometer::Temperature,
    Instant,
};

/// Half of the 0..=255 output range. Outputs above it switch the heater on.
pub const OUTPUT_THRESHOLD: f32 = 127.5;

/// What a strategy wants the heating element to do
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActuatorCommand {
    On,
    Off,
    /// Keep the current state
    Hold,
}

impl ActuatorCommand {
    /// Thresholds a continuous 0..=255 output into on/off.
    ///
    /// This is a bang-bang approximation of the continuous signal, there is no duty cycle.
    pub fn from_output(output: f32) -> Self {
        if output > OUTPUT_THRESHOLD {
            Self::On
        } else {
            Self::Off
        }
    }

    /// Resulting heater state given the current one
    pub const fn resolve(self, heating: bool) -> bool {
        match self {
            Self::On => true,
            Self::Off => false,
            Self::Hold => heating,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Strategy {
    Hysteresis,
    Pid,
    Autotuning,
}

impl Strategy {
    /// Autotuning overrides the configured mode while a session is running
    pub const fn select(mode: ControlMode, autotuning: bool) -> Self {
        match (autotuning, mode) {
            (true, _) => Self::Autotuning,
            (false, ControlMode::Hysteresis) => Self::Hysteresis,
            (false, ControlMode::Pid) => Self::Pid,
        }
    }
}

/// Result of one strategy evaluation
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Decision {
    pub command: ActuatorCommand,
    /// Set when the evaluation ended an autotune session
    pub finished: Option<Outcome>,
}

impl From<ActuatorCommand> for Decision {
    fn from(command: ActuatorCommand) -> Self {
        Self {
            command,
            finished: None,
        }
    }
}

/// The stateful strategies
pub struct Controllers {
    pub pid: pid::PidController,
    pub autotune: Autotuner,
}

impl Controllers {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            pid: pid::PidController::new(config.gains),
            autotune: Autotuner::new(),
        }
    }

    /// Strategy for the given configuration and autotune state
    pub fn strategy(&self, config: &ControlConfig) -> Strategy {
        Strategy::select(config.mode, self.autotune.is_running())
    }

    /// Runs one strategy on a successful reading
    pub fn evaluate(
        &mut self,
        strategy: Strategy,
        temp: Temperature,
        target: Temperature,
        now: Instant,
    ) -> Decision {
        match strategy {
            Strategy::Hysteresis => hysteresis::evaluate(temp, target).into(),
            Strategy::Pid => self.pid.run(temp, target, now).into(),
            Strategy::Autotuning => match self.autotune.update(temp, now) {
                Step::Relay(command) => command.into(),
                Step::Finished(outcome) => Decision {
                    command: ActuatorCommand::Off,
                    finished: Some(outcome),
                },
            },
        }
    }
}
