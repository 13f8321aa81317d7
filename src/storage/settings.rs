//! Persistent control settings.
//!
//! The configuration is stored as a single fixed-size record. Every field has a presence bit so
//! records written by older firmware, or with a corrupted field, still load: whatever is missing
//! or out of range falls back to its default.
//!
//! Layout (little endian):
//!
//! | offset | size | field                      |
//! |--------|------|----------------------------|
//! | 0      | 2    | magic `"BL"`               |
//! | 2      | 1    | presence bits              |
//! | 3      | 1    | mode (0 hysteresis, 1 PID) |
//! | 4      | 4    | brew target, `f32`         |
//! | 8      | 4    | steam target, `f32`        |
//! | 12     | 4    | Kp, `f32`                  |
//! | 16     | 4    | Ki, `f32`                  |
//! | 20     | 4    | Kd, `f32`                  |
//! | 24     | 4    | sample interval ms, `u32`  |

use core::convert::Infallible;

use crate::{
    config::{ControlConfig, ControlMode, Gains, MAX_TARGET_TEMP},
    thermometer::Temperature,
    Duration,
};

pub const RECORD_LEN: usize = 28;

const MAGIC: [u8; 2] = *b"BL";

const MODE: u8 = 1 << 0;
const BREW: u8 = 1 << 1;
const STEAM: u8 = 1 << 2;
const KP: u8 = 1 << 3;
const KI: u8 = 1 << 4;
const KD: u8 = 1 << 5;
const INTERVAL: u8 = 1 << 6;
const ALL: u8 = MODE | BREW | STEAM | KP | KI | KD | INTERVAL;

pub type Record = [u8; RECORD_LEN];

/// Durable key-value storage for the [`ControlConfig`]
pub trait SettingsStore {
    type Error;

    /// Loads the stored configuration. Fields that were never stored take their defaults.
    fn load(&mut self) -> Result<ControlConfig, Self::Error>;

    fn save(&mut self, config: &ControlConfig) -> Result<(), Self::Error>;
}

pub fn encode(config: &ControlConfig) -> Record {
    let mut buf = [0u8; RECORD_LEN];
    buf[0..2].copy_from_slice(&MAGIC);
    buf[2] = ALL;
    buf[3] = match config.mode {
        ControlMode::Hysteresis => 0,
        ControlMode::Pid => 1,
    };
    buf[4..8].copy_from_slice(&config.brew_temp.to_num::<f32>().to_le_bytes());
    buf[8..12].copy_from_slice(&config.steam_temp.to_num::<f32>().to_le_bytes());
    buf[12..16].copy_from_slice(&config.gains.kp.to_le_bytes());
    buf[16..20].copy_from_slice(&config.gains.ki.to_le_bytes());
    buf[20..24].copy_from_slice(&config.gains.kd.to_le_bytes());

    let interval = u32::try_from(config.sample_interval.to_millis()).unwrap_or(u32::MAX);
    buf[24..28].copy_from_slice(&interval.to_le_bytes());

    buf
}

/// Decodes a stored record. An unrecognized record decodes to the defaults.
pub fn decode(buf: &[u8]) -> ControlConfig {
    let mut config = ControlConfig::default();

    if buf.len() < RECORD_LEN || buf[0..2] != MAGIC {
        if buf.iter().any(|&b| b != 0xFF) {
            warn!("Settings record not recognized, using defaults");
        }
        return config;
    }

    let present = buf[2];
    let f32_at = |at: usize| f32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
    let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

    if present & MODE != 0 {
        match buf[3] {
            0 => config.mode = ControlMode::Hysteresis,
            1 => config.mode = ControlMode::Pid,
            other => warn!("Stored control mode {=u8} invalid", other),
        }
    }
    if present & BREW != 0 {
        match target(f32_at(4)) {
            Some(t) => config.brew_temp = t,
            None => warn!("Stored brew target invalid"),
        }
    }
    if present & STEAM != 0 {
        match target(f32_at(8)) {
            Some(t) => config.steam_temp = t,
            None => warn!("Stored steam target invalid"),
        }
    }

    // Each gain is independent, so one bad coefficient only resets that one
    let defaults = config.gains;
    let gain = |bit: u8, at: usize, default: f32| {
        let value = f32_at(at);
        if present & bit == 0 {
            default
        } else if Gains::new(value, 0.0, 0.0).is_valid() {
            value
        } else {
            warn!("Stored gain invalid");
            default
        }
    };
    config.gains = Gains::new(
        gain(KP, 12, defaults.kp),
        gain(KI, 16, defaults.ki),
        gain(KD, 20, defaults.kd),
    );

    if present & INTERVAL != 0 {
        match u32_at(24) {
            0 => warn!("Stored sample interval invalid"),
            ms => config.sample_interval = Duration::millis(u64::from(ms)),
        }
    }

    config
}

fn target(value: f32) -> Option<Temperature> {
    if !value.is_finite() {
        return None;
    }
    Temperature::checked_from_num(value).filter(|t| *t >= Temperature::ZERO && *t <= MAX_TARGET_TEMP)
}

/// Settings kept in RAM. Lost on reset.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    record: Record,
    saves: u32,
}

impl MemoryStore {
    /// A store that has never been written
    pub const fn new() -> Self {
        Self {
            record: [0xFF; RECORD_LEN],
            saves: 0,
        }
    }

    /// Number of successful saves
    pub const fn saves(&self) -> u32 {
        self.saves
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore for MemoryStore {
    type Error = Infallible;

    fn load(&mut self) -> Result<ControlConfig, Self::Error> {
        Ok(decode(&self.record))
    }

    fn save(&mut self, config: &ControlConfig) -> Result<(), Self::Error> {
        self.record = encode(config);
        self.saves += 1;
        Ok(())
    }
}

#[cfg(any(test, feature = "fake"))]
pub mod fake {
    use super::*;

    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct Unavailable;

    /// A store whose medium has failed
    #[derive(Debug, Default)]
    pub struct BrokenStore {
        pub attempts: u32,
    }

    impl SettingsStore for BrokenStore {
        type Error = Unavailable;

        fn load(&mut self) -> Result<ControlConfig, Self::Error> {
            self.attempts += 1;
            Err(Unavailable)
        }

        fn save(&mut self, _config: &ControlConfig) -> Result<(), Self::Error> {
            self.attempts += 1;
            Err(Unavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_store_loads_defaults() {
        let mut store = MemoryStore::new();
        assert_eq!(store.load().unwrap(), ControlConfig::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let config = ControlConfig {
            brew_temp: Temperature::from_num(94.5),
            steam_temp: Temperature::from_num(140),
            gains: Gains::new(3.5, 0.25, 12.0),
            mode: ControlMode::Pid,
            sample_interval: Duration::millis(750),
        };

        let mut store = MemoryStore::new();
        store.save(&config).unwrap();
        assert_eq!(store.saves(), 1);
        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config = ControlConfig {
            brew_temp: Temperature::from_num(91),
            ..ControlConfig::default()
        };
        let mut record = encode(&ControlConfig {
            gains: Gains::new(9.0, 9.0, 9.0),
            ..config
        });
        record[2] = BREW;

        assert_eq!(decode(&record), config);
    }

    #[test]
    fn invalid_fields_take_defaults() {
        let mut record = encode(&ControlConfig {
            brew_temp: Temperature::from_num(91),
            gains: Gains::new(4.0, 1.0, 0.5),
            ..ControlConfig::default()
        });
        record[3] = 7;
        record[8..12].copy_from_slice(&f32::NAN.to_le_bytes());
        record[16..20].copy_from_slice(&(-2.0f32).to_le_bytes());
        record[24..28].copy_from_slice(&0u32.to_le_bytes());

        let config = decode(&record);
        assert_eq!(config.mode, ControlMode::Hysteresis);
        assert_eq!(config.brew_temp, Temperature::from_num(91));
        assert_eq!(config.steam_temp, Temperature::from_num(150));
        assert_eq!(config.gains, Gains::new(4.0, 5.0, 0.5));
        assert_eq!(config.sample_interval.to_millis(), 2000);
    }

    #[test]
    fn foreign_record_loads_defaults() {
        let mut record = encode(&ControlConfig {
            mode: ControlMode::Pid,
            ..ControlConfig::default()
        });
        record[0] = b'X';
        assert_eq!(decode(&record), ControlConfig::default());
        assert_eq!(decode(&record[..4]), ControlConfig::default());
    }
}
