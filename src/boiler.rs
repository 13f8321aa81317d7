//! The boiler coordinator.
//!
//! [`Boiler`] is the single owner of the control state, the configuration and the actuator. A
//! periodic task calls [`Boiler::tick`]; user facing collaborators call the other operations.
//! Both must be serialized by the caller, in the firmware they share one RTIC resource lock.

use crate::{
    autotune::{AutotuneError, CancelReason, Outcome, TIMEOUT},
    config::{Changes, ConfigError, ConfigUpdate, ControlConfig, ControlMode, Gains},
    controller::Controllers,
    elapsed,
    heater::Heater,
    state::{BoilerMode, ControlState, Operation, Status},
    storage::settings::SettingsStore,
    thermometer::{SensorFault, SensorReader, Temperature, Thermocouple},
    Duration, Instant,
};

/// Result of one [`Boiler::tick`]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Tick {
    /// The sample interval has not elapsed yet
    Skipped,
    /// The reading failed and the heater was forced off
    Fault(SensorFault),
    /// A strategy ran on a successful reading
    Reading { temp: Temperature, heating: bool },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ToggleError {
    /// The PID controller owns the heater
    PidActive,
    /// The autotune relay owns the heater
    AutoTuning,
    /// The last reading was a fault
    SensorFault,
    /// No reading yet
    NoReading,
}

impl ToggleError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PidActive => "Manual control disabled in PID mode",
            Self::AutoTuning => "Manual control disabled during AutoTune",
            Self::SensorFault => "Manual control disabled after sensor fault",
            Self::NoReading => "Manual control disabled until the first reading",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AutotuneStatus {
    pub running: bool,
    /// Time since the session started, zero when idle
    pub elapsed: Duration,
    pub timeout: Duration,
    /// Gains currently configured
    pub gains: Gains,
    /// Limit cycles measured after warm up
    pub cycles: usize,
}

pub struct Boiler<T, H, S> {
    sensor: SensorReader<T>,
    heater: H,
    store: S,
    config: ControlConfig,
    state: ControlState,
    controllers: Controllers,
    last_tick: Option<Instant>,
}

impl<T, H, S> Boiler<T, H, S>
where
    T: Thermocouple,
    H: Heater,
    S: SettingsStore,
{
    /// Loads the configuration from `store` and starts idle in brew mode with the heater off
    pub fn new(tc: T, mut heater: H, mut store: S) -> Self {
        let config = store.load().unwrap_or_else(|_| {
            warn!("Failed to load settings, using defaults");
            ControlConfig::default()
        });

        heater.set_heating(false);

        let state = ControlState {
            target: config.target_for(BoilerMode::Brew),
            ..ControlState::default()
        };

        info!(
            "Boiler ready: brew={}, steam={}, pid={}",
            config.brew_temp.to_num::<f32>(),
            config.steam_temp.to_num::<f32>(),
            config.mode == ControlMode::Pid
        );

        Self {
            sensor: SensorReader::new(tc),
            heater,
            store,
            controllers: Controllers::new(&config),
            config,
            state,
            last_tick: None,
        }
    }

    /// Runs one control step if the sample interval has elapsed since the last one.
    ///
    /// Missed intervals are not caught up: a late tick runs once and restarts the interval.
    #[cfg_attr(feature = "sizing", inline(never))]
    pub fn tick(&mut self, now: Instant) -> Tick {
        if let Some(last) = self.last_tick {
            if elapsed(now, last) < self.config.sample_interval {
                return Tick::Skipped;
            }
        }
        self.last_tick = Some(now);

        let temp = match self.sensor.read() {
            Ok(temp) => temp,
            Err(fault) => {
                self.fail_safe(fault);
                return Tick::Fault(fault);
            }
        };

        self.state.current = Some(temp);
        self.state.fault = None;
        self.refresh_target();

        let strategy = self.controllers.strategy(&self.config);
        let decision = self
            .controllers
            .evaluate(strategy, temp, self.state.target, now);
        trace!("{}: {}", strategy, decision.command);

        self.drive(decision.command.resolve(self.heater.is_heating()));
        if let Some(outcome) = decision.finished {
            self.finish_autotune(outcome);
        }

        Tick::Reading {
            temp,
            heating: self.state.heating,
        }
    }

    pub fn status(&self) -> Status {
        Status::from(&self.state)
    }

    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Applies a partial configuration change and persists it.
    ///
    /// New gains take effect on the next PID sample. Switching the control mode resets the PID
    /// controller.
    pub fn set_config(&mut self, update: &ConfigUpdate) -> Result<Changes, ConfigError> {
        let changes = self.config.apply(update)?;

        if changes.gains {
            self.controllers.pid.set_gains(self.config.gains);
        }
        if changes.mode {
            self.controllers.pid.reset();
            info!("Control mode: {}", self.config.mode);
        }
        if changes.targets {
            self.refresh_target();
        }
        if changes.any() {
            self.persist();
        }

        Ok(changes)
    }

    /// Selects the brew or steam target. The heater is left to the next tick.
    pub fn set_mode(&mut self, mode: BoilerMode) {
        self.state.mode = mode;
        self.refresh_target();
        if !self.controllers.autotune.is_running() {
            self.state.operation = mode.into();
        }
        info!("Mode: {}, target {}", mode, self.state.target.to_num::<f32>());
    }

    /// Flips the heater by hand. Only allowed under hysteresis control with a valid reading.
    pub fn toggle_heating(&mut self) -> Result<bool, ToggleError> {
        if self.state.fault.is_some() {
            return Err(ToggleError::SensorFault);
        }
        if self.state.current.is_none() {
            return Err(ToggleError::NoReading);
        }
        if self.controllers.autotune.is_running() {
            return Err(ToggleError::AutoTuning);
        }
        if self.config.mode == ControlMode::Pid {
            return Err(ToggleError::PidActive);
        }

        let on = !self.heater.is_heating();
        self.drive(on);
        info!("Heating toggled: {}", on);
        Ok(on)
    }

    /// Starts relay autotuning around the current target
    pub fn start_autotune(&mut self, now: Instant) -> Result<(), AutotuneError> {
        self.controllers.autotune.start(self.state.target, now)?;
        self.state.operation = Operation::AutoTuning;
        Ok(())
    }

    /// Stops a running autotune session, keeping the gains found so far if `save` is set.
    ///
    /// Returns `None` if no session was running.
    pub fn stop_autotune(&mut self, save: bool) -> Option<Outcome> {
        let outcome = self.controllers.autotune.stop(save)?;
        self.finish_autotune(outcome);
        Some(outcome)
    }

    pub fn autotune_status(&self, now: Instant) -> AutotuneStatus {
        let tuner = &self.controllers.autotune;
        AutotuneStatus {
            running: tuner.is_running(),
            elapsed: tuner.elapsed(now),
            timeout: TIMEOUT,
            gains: self.config.gains,
            cycles: tuner.cycles(),
        }
    }

    /// Last computed PID output in `0..=255`
    pub fn pid_output(&self) -> f32 {
        self.controllers.pid.output()
    }

    pub const fn heater(&self) -> &H {
        &self.heater
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub fn thermocouple(&self) -> &T {
        self.sensor.thermocouple()
    }

    pub fn thermocouple_mut(&mut self) -> &mut T {
        self.sensor.thermocouple_mut()
    }

    fn fail_safe(&mut self, fault: SensorFault) {
        error!("Sensor fault: {}", fault.as_str());
        self.drive(false);
        self.state.current = None;
        self.state.fault = Some(fault);

        if let Some(outcome) = self.controllers.autotune.abort(CancelReason::SensorFault) {
            self.finish_autotune(outcome);
        }
    }

    fn finish_autotune(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Complete(gains) if gains.is_valid() => {
                self.config.gains = gains;
                self.controllers.pid.set_gains(gains);
                self.persist();
                info!(
                    "AutoTune complete: Kp={=f32}, Ki={=f32}, Kd={=f32}",
                    gains.kp,
                    gains.ki,
                    gains.kd
                );
            }
            Outcome::Complete(_) => error!("AutoTune produced invalid gains, discarded"),
            Outcome::Cancelled(_) => {}
            Outcome::TimedOut => warn!("AutoTune timed out, gains unchanged"),
        }

        // The PID has not run during the session, its history is stale
        self.controllers.pid.reset();
        self.state.operation = Operation::Idle;
        self.refresh_target();
        self.drive(false);
    }

    /// The running autotune session keeps the target it started with
    fn refresh_target(&mut self) {
        self.state.target = self
            .controllers
            .autotune
            .target()
            .unwrap_or_else(|| self.config.target_for(self.state.mode));
    }

    fn drive(&mut self, on: bool) {
        self.heater.set_heating(on);
        self.state.heating = self.heater.is_heating();
    }

    fn persist(&mut self) {
        if self.store.save(&self.config).is_err() {
            error!("Failed to save settings");
        } else {
            debug!("Settings saved");
        }
    }
}
