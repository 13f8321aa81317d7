//! Heating element driver.

use core::convert::Infallible;

use embedded_hal::digital::v2::OutputPin;

/// Binary heating element.
///
/// [`Heater::is_heating`] reports the last commanded state; there is no feedback from the element.
pub trait Heater {
    /// Command the element on or off. Commanding the current state has no effect.
    fn set_heating(&mut self, on: bool);

    fn is_heating(&self) -> bool;
}

/// A heater switched by a GPIO pin, e.g. the control input of a solid state relay.
pub struct PinHeater<PIN> {
    pin: PIN,
    on: bool,
}

impl<PIN: OutputPin<Error = Infallible>> PinHeater<PIN> {
    /// Takes the pin and drives it low
    pub fn new(mut pin: PIN) -> Self {
        infallible(pin.set_low());
        Self { pin, on: false }
    }

    pub fn release(self) -> PIN {
        self.pin
    }
}

impl<PIN: OutputPin<Error = Infallible>> Heater for PinHeater<PIN> {
    fn set_heating(&mut self, on: bool) {
        if on == self.on {
            return;
        }

        if on {
            infallible(self.pin.set_high());
        } else {
            infallible(self.pin.set_low());
        }
        self.on = on;

        debug!("Heating element: {=bool}", on);
    }

    fn is_heating(&self) -> bool {
        self.on
    }
}

#[inline]
fn infallible(res: Result<(), Infallible>) {
    match res {
        Ok(()) => {}
        Err(e) => match e {},
    }
}

/// Fake heater for testing
#[cfg(any(test, feature = "fake"))]
pub mod fake {
    use super::Heater;

    /// A heater that records how many times its state actually changed
    #[derive(Debug, Default)]
    pub struct FakeHeater {
        on: bool,
        switches: u32,
    }

    impl FakeHeater {
        pub fn switches(&self) -> u32 {
            self.switches
        }
    }

    impl Heater for FakeHeater {
        fn set_heating(&mut self, on: bool) {
            if on != self.on {
                self.on = on;
                self.switches += 1;
            }
        }

        fn is_heating(&self) -> bool {
            self.on
        }
    }
}
