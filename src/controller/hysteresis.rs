//! On/off control with a dead band below the target.

use super::ActuatorCommand;
use crate::thermometer::Temperature;

/// Width of the band below the target in which the heater keeps its state
pub const DEAD_BAND: Temperature = Temperature::const_from_int(1);

/// On below `target - DEAD_BAND`, off above `target`, otherwise unchanged
pub fn evaluate(current: Temperature, target: Temperature) -> ActuatorCommand {
    if current < target - DEAD_BAND {
        ActuatorCommand::On
    } else if current > target {
        ActuatorCommand::Off
    } else {
        ActuatorCommand::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(v: f32) -> Temperature {
        Temperature::from_num(v)
    }

    #[test]
    fn below_band_turns_on() {
        assert_eq!(evaluate(t(91.9), t(93.0)), ActuatorCommand::On);
        assert!(evaluate(t(91.9), t(93.0)).resolve(false));
    }

    #[test]
    fn above_target_turns_off() {
        assert_eq!(evaluate(t(93.1), t(93.0)), ActuatorCommand::Off);
        assert!(!evaluate(t(93.1), t(93.0)).resolve(true));
    }

    #[test]
    fn dead_band_keeps_state() {
        assert!(evaluate(t(92.5), t(93.0)).resolve(true));
        assert!(!evaluate(t(92.5), t(93.0)).resolve(false));
    }

    #[test]
    fn band_edges_hold() {
        assert_eq!(evaluate(t(92.0), t(93.0)), ActuatorCommand::Hold);
        assert_eq!(evaluate(t(93.0), t(93.0)), ActuatorCommand::Hold);
    }
}
