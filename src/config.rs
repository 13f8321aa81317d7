//! Control configuration.
//!
//! Owned by the [`Boiler`](crate::boiler::Boiler); collaborators read it with
//! [`Boiler::config`](crate::boiler::Boiler::config) and change it with partial
//! [`ConfigUpdate`]s.

use crate::{state::BoilerMode, thermometer::Temperature, Duration};

pub const DEFAULT_BREW_TEMP: Temperature = Temperature::const_from_int(93);
pub const DEFAULT_STEAM_TEMP: Temperature = Temperature::const_from_int(150);
pub const DEFAULT_GAINS: Gains = Gains::new(2.0, 5.0, 1.0);
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::millis(2000);

/// Highest target temperature accepted from a collaborator
pub const MAX_TARGET_TEMP: Temperature = Temperature::const_from_int(200);

/// PID coefficients
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Gains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Gains {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }

    /// All coefficients are finite and non-negative
    pub fn is_valid(&self) -> bool {
        is_valid_gain(self.kp) && is_valid_gain(self.ki) && is_valid_gain(self.kd)
    }
}

#[inline]
fn is_valid_gain(gain: f32) -> bool {
    gain.is_finite() && gain >= 0.0
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlMode {
    /// On/off control with a dead band
    #[default]
    Hysteresis,
    /// PID control, thresholded to on/off
    Pid,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ControlConfig {
    pub brew_temp: Temperature,
    pub steam_temp: Temperature,
    pub gains: Gains,
    pub mode: ControlMode,
    /// Minimum time between two control ticks
    pub sample_interval: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            brew_temp: DEFAULT_BREW_TEMP,
            steam_temp: DEFAULT_STEAM_TEMP,
            gains: DEFAULT_GAINS,
            mode: ControlMode::Hysteresis,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

/// Fields of a [`ConfigUpdate`], used to report which one was rejected
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigField {
    BrewTemp,
    SteamTemp,
    Kp,
    Ki,
    Kd,
    SampleInterval,
}

impl ConfigField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrewTemp => "brew",
            Self::SteamTemp => "steam",
            Self::Kp => "kp",
            Self::Ki => "ki",
            Self::Kd => "kd",
            Self::SampleInterval => "interval",
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    OutOfRange(ConfigField),
}

impl ConfigError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfRange(_) => "Value out of range",
        }
    }
}

/// A partial configuration change. `None` fields are left untouched.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct ConfigUpdate {
    pub brew_temp: Option<Temperature>,
    pub steam_temp: Option<Temperature>,
    pub kp: Option<f32>,
    pub ki: Option<f32>,
    pub kd: Option<f32>,
    pub mode: Option<ControlMode>,
    pub sample_interval: Option<Duration>,
}

impl ConfigUpdate {
    /// An update that replaces all three gains
    pub const fn gains(gains: Gains) -> Self {
        Self {
            brew_temp: None,
            steam_temp: None,
            kp: Some(gains.kp),
            ki: Some(gains.ki),
            kd: Some(gains.kd),
            mode: None,
            sample_interval: None,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let temp_ok = |t: Temperature| t >= Temperature::ZERO && t <= MAX_TARGET_TEMP;

        let checks = [
            (self.brew_temp.map_or(true, temp_ok), ConfigField::BrewTemp),
            (self.steam_temp.map_or(true, temp_ok), ConfigField::SteamTemp),
            (self.kp.map_or(true, is_valid_gain), ConfigField::Kp),
            (self.ki.map_or(true, is_valid_gain), ConfigField::Ki),
            (self.kd.map_or(true, is_valid_gain), ConfigField::Kd),
            (
                self.sample_interval.map_or(true, |d| d.ticks() > 0),
                ConfigField::SampleInterval,
            ),
        ];

        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, field)) => Err(ConfigError::OutOfRange(*field)),
            None => Ok(()),
        }
    }
}

/// What an applied [`ConfigUpdate`] actually changed
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Changes {
    pub targets: bool,
    pub gains: bool,
    pub mode: bool,
    pub sample_interval: bool,
}

impl Changes {
    pub const fn any(self) -> bool {
        self.targets || self.gains || self.mode || self.sample_interval
    }
}

impl ControlConfig {
    /// Target temperature for the given boiler mode
    pub const fn target_for(&self, mode: BoilerMode) -> Temperature {
        match mode {
            BoilerMode::Brew => self.brew_temp,
            BoilerMode::Steam => self.steam_temp,
        }
    }

    /// Validates the whole update and applies it. Nothing is changed on error.
    pub fn apply(&mut self, update: &ConfigUpdate) -> Result<Changes, ConfigError> {
        update.validate()?;

        let before = *self;

        if let Some(t) = update.brew_temp {
            self.brew_temp = t;
        }
        if let Some(t) = update.steam_temp {
            self.steam_temp = t;
        }
        if let Some(kp) = update.kp {
            self.gains.kp = kp;
        }
        if let Some(ki) = update.ki {
            self.gains.ki = ki;
        }
        if let Some(kd) = update.kd {
            self.gains.kd = kd;
        }
        if let Some(mode) = update.mode {
            self.mode = mode;
        }
        if let Some(interval) = update.sample_interval {
            self.sample_interval = interval;
        }

        Ok(Changes {
            targets: before.brew_temp != self.brew_temp || before.steam_temp != self.steam_temp,
            gains: before.gains != self.gains,
            mode: before.mode != self.mode,
            sample_interval: before.sample_interval != self.sample_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.brew_temp, Temperature::from_num(93));
        assert_eq!(config.steam_temp, Temperature::from_num(150));
        assert_eq!(config.gains, Gains::new(2.0, 5.0, 1.0));
        assert_eq!(config.mode, ControlMode::Hysteresis);
        assert_eq!(config.sample_interval.to_millis(), 2000);
    }

    #[test]
    fn partial_update_round_trip() {
        let mut config = ControlConfig::default();
        let changes = config
            .apply(&ConfigUpdate {
                kp: Some(3.5),
                ..ConfigUpdate::default()
            })
            .unwrap();

        assert_eq!(config.gains.kp, 3.5);
        assert_eq!(config.gains.ki, 5.0);
        assert!(changes.gains);
        assert!(!changes.mode && !changes.targets);
    }

    #[test]
    fn unchanged_value_reports_no_change() {
        let mut config = ControlConfig::default();
        let changes = config
            .apply(&ConfigUpdate {
                brew_temp: Some(DEFAULT_BREW_TEMP),
                ..ConfigUpdate::default()
            })
            .unwrap();
        assert!(!changes.any());
    }

    #[test]
    fn rejects_negative_gain_without_applying() {
        let mut config = ControlConfig::default();
        let err = config.apply(&ConfigUpdate {
            brew_temp: Some(Temperature::from_num(95)),
            ki: Some(-1.0),
            ..ConfigUpdate::default()
        });

        assert_eq!(err, Err(ConfigError::OutOfRange(ConfigField::Ki)));
        assert_eq!(config, ControlConfig::default());
    }

    #[test]
    fn rejects_nan_gain_and_zero_interval() {
        let mut config = ControlConfig::default();
        assert_eq!(
            config.apply(&ConfigUpdate {
                kd: Some(f32::NAN),
                ..ConfigUpdate::default()
            }),
            Err(ConfigError::OutOfRange(ConfigField::Kd))
        );
        assert_eq!(
            config.apply(&ConfigUpdate {
                sample_interval: Some(Duration::millis(0)),
                ..ConfigUpdate::default()
            }),
            Err(ConfigError::OutOfRange(ConfigField::SampleInterval))
        );
    }

    #[test]
    fn rejects_target_out_of_range() {
        let mut config = ControlConfig::default();
        assert_eq!(
            config.apply(&ConfigUpdate {
                steam_temp: Some(Temperature::from_num(250)),
                ..ConfigUpdate::default()
            }),
            Err(ConfigError::OutOfRange(ConfigField::SteamTemp))
        );
    }

    #[test]
    fn target_follows_mode() {
        let config = ControlConfig::default();
        assert_eq!(config.target_for(BoilerMode::Brew), DEFAULT_BREW_TEMP);
        assert_eq!(config.target_for(BoilerMode::Steam), DEFAULT_STEAM_TEMP);
    }
}
