use pid::Pid;

use super::ActuatorCommand;
use crate::{config::Gains, elapsed, thermometer::Temperature, Duration, Instant};

/// Upper bound of the controller output; the lower bound is 0
pub const OUTPUT_LIMIT: f32 = 255.0;

/// The controller computes a new output at most once per sample time, no matter how often it
/// is run. Gains are per sample.
pub const SAMPLE_TIME: Duration = Duration::millis(1000);

pub struct PidController {
    pid: Pid<f32>,
    output: f32,
    last_sample: Option<Instant>,
}

impl PidController {
    pub fn new(gains: Gains) -> Self {
        Self {
            pid: new_pid(gains),
            output: 0.0,
            last_sample: None,
        }
    }

    pub fn gains(&self) -> Gains {
        Gains::new(self.pid.kp, self.pid.ki, self.pid.kd)
    }

    /// Retunes the controller. The integral term is kept.
    ///
    /// Invalid gains are ignored.
    pub fn set_gains(&mut self, gains: Gains) {
        if !gains.is_valid() {
            error!(
                "Ignoring invalid PID gains: Kp={=f32}, Ki={=f32}, Kd={=f32}",
                gains.kp,
                gains.ki,
                gains.kd
            );
            return;
        }

        self.pid.kp = gains.kp;
        self.pid.ki = gains.ki;
        self.pid.kd = gains.kd;

        info!(
            "PID tunings updated: Kp={=f32}, Ki={=f32}, Kd={=f32}",
            gains.kp,
            gains.ki,
            gains.kd
        );
    }

    /// Clears the integral, derivative history and sample timer
    pub fn reset(&mut self) {
        self.pid = new_pid(self.gains());
        self.output = 0.0;
        self.last_sample = None;
    }

    /// Last computed output in `0..=255`
    pub fn output(&self) -> f32 {
        self.output
    }

    /// Computes a new output if a sample is due, returning it
    pub fn compute(&mut self, temp: Temperature, target: Temperature, now: Instant) -> Option<f32> {
        if let Some(last) = self.last_sample {
            if elapsed(now, last) < SAMPLE_TIME {
                return None;
            }
        }
        self.last_sample = Some(now);

        let input: f32 = temp.to_num();
        self.pid.setpoint(target.to_num::<f32>());
        let out = self.pid.next_control_output(input);

        // Integral is held to 0..=255 like the output
        let integral = if out.i < 0.0 {
            self.pid.reset_integral_term();
            0.0
        } else {
            out.i
        };
        self.output = (out.p + integral + out.d).clamp(0.0, OUTPUT_LIMIT);

        trace!(
            "PID: input={=f32}, p={=f32}, i={=f32}, d={=f32}, output={=f32}",
            input,
            out.p,
            integral,
            out.d,
            self.output
        );

        Some(self.output)
    }

    /// Run the controller for a single tick
    ///
    /// Between samples the previous output keeps deciding the heater state.
    pub fn run(&mut self, temp: Temperature, target: Temperature, now: Instant) -> ActuatorCommand {
        let _ = self.compute(temp, target, now);
        ActuatorCommand::from_output(self.output)
    }
}

fn new_pid(gains: Gains) -> Pid<f32> {
    let mut pid = Pid::new(0.0_f32, OUTPUT_LIMIT);
    pid.p(gains.kp, OUTPUT_LIMIT);
    pid.i(gains.ki, OUTPUT_LIMIT);
    pid.d(gains.kd, OUTPUT_LIMIT);
    pid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(v: f32) -> Temperature {
        Temperature::from_num(v)
    }

    fn at(ms: u64) -> Instant {
        Instant::from_ticks(ms)
    }

    #[test]
    fn zero_gains_never_heat() {
        let mut pid = PidController::new(Gains::ZERO);
        for (i, temp) in [20.0, 60.0, 92.0, 93.0, 120.0].into_iter().enumerate() {
            let now = at(i as u64 * 1000);
            assert_eq!(pid.run(t(temp), t(93.0), now), ActuatorCommand::Off);
            assert_eq!(pid.output(), 0.0);
        }
    }

    #[test]
    fn proportional_output_is_clamped() {
        let mut pid = PidController::new(Gains::new(10.0, 0.0, 0.0));
        assert_eq!(pid.compute(t(20.0), t(93.0), at(0)), Some(255.0));

        let mut pid = PidController::new(Gains::new(10.0, 0.0, 0.0));
        assert_eq!(pid.compute(t(100.0), t(93.0), at(0)), Some(0.0));
    }

    #[test]
    fn threshold_at_half_range() {
        // error 12 * 10 = 120 -> off, error 13 * 10 = 130 -> on
        let mut pid = PidController::new(Gains::new(10.0, 0.0, 0.0));
        assert_eq!(pid.run(t(81.0), t(93.0), at(0)), ActuatorCommand::Off);
        assert_eq!(pid.run(t(80.0), t(93.0), at(1000)), ActuatorCommand::On);
    }

    #[test]
    fn samples_on_fixed_cadence() {
        let mut pid = PidController::new(Gains::new(1.0, 0.0, 0.0));
        assert!(pid.compute(t(90.0), t(93.0), at(0)).is_some());
        assert!(pid.compute(t(50.0), t(93.0), at(500)).is_none());
        assert_eq!(pid.output(), 3.0);
        assert!(pid.compute(t(50.0), t(93.0), at(1000)).is_some());
        assert_eq!(pid.output(), 43.0);
    }

    #[test]
    fn gain_change_applies_to_next_sample() {
        let mut pid = PidController::new(Gains::new(1.0, 0.0, 0.0));
        pid.compute(t(90.0), t(93.0), at(0));

        pid.set_gains(Gains::new(3.5, 0.0, 0.0));
        assert_eq!(pid.gains().kp, 3.5);
        assert_eq!(pid.compute(t(90.0), t(93.0), at(1000)), Some(10.5));
    }

    #[test]
    fn gain_change_keeps_integral() {
        let mut pid = PidController::new(Gains::new(0.0, 1.0, 0.0));
        pid.compute(t(90.0), t(93.0), at(0));
        pid.compute(t(90.0), t(93.0), at(1000));
        assert_eq!(pid.output(), 6.0);

        pid.set_gains(Gains::new(0.0, 1.0, 0.0));
        pid.compute(t(93.0), t(93.0), at(2000));
        assert_eq!(pid.output(), 6.0);

        pid.reset();
        pid.compute(t(93.0), t(93.0), at(3000));
        assert_eq!(pid.output(), 0.0);
    }

    #[test]
    fn integral_never_goes_negative() {
        let mut pid = PidController::new(Gains::new(0.0, 1.0, 0.0));
        for i in 0..3 {
            pid.compute(t(96.0), t(93.0), at(i * 1000));
            assert_eq!(pid.output(), 0.0);
        }

        // cooling below the target heats again right away
        assert_eq!(pid.compute(t(90.0), t(93.0), at(3000)), Some(3.0));
    }

    #[test]
    fn invalid_gains_are_ignored() {
        let mut pid = PidController::new(Gains::new(1.0, 2.0, 3.0));
        pid.set_gains(Gains::new(-1.0, 0.0, 0.0));
        assert_eq!(pid.gains(), Gains::new(1.0, 2.0, 3.0));
    }
}
