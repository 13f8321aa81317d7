//! Implementation for the MAX31855 cold-junction compensated thermocouple-to-digital converter.
//!
//! The chip is read only: pulling CS low and clocking out 32 bits returns the latest conversion.

use embedded_hal::{blocking::spi::Transfer, digital::v2::OutputPin};

use crate::thermometer::{Faults, Temperature, Thermocouple};

const FAULT: u32 = 1 << 16;
const RESERVED: u32 = (1 << 17) | (1 << 3);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// SPI transfer failed
    Spi(E),

    /// Chip select pin could not be driven
    ChipSelect,

    /// Reserved bits were set. This generally means the chip is missing and MISO is floating.
    InvalidFrame,
}

impl<E> Error<E> {
    pub fn as_str(&self) -> &'static str {
        match self {
            Error::Spi(_) => "SPI error",
            Error::ChipSelect => "Chip select error",
            Error::InvalidFrame => "Invalid frame",
        }
    }
}

impl<E> From<E> for Error<E> {
    fn from(value: E) -> Self {
        Self::Spi(value)
    }
}

/// One 32-bit conversion result
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Frame(pub u32);

impl Frame {
    /// Whether any fault bit is set. The thermocouple temperature is invalid if so.
    #[inline]
    pub const fn is_fault(self) -> bool {
        self.0 & FAULT != 0
    }

    #[inline]
    pub const fn faults(self) -> Faults {
        Faults::from_bits_truncate(self.0 as u8)
    }

    /// Thermocouple temperature, 14 bits signed in steps of 0.25 degrees Celsius
    #[allow(clippy::cast_possible_wrap)]
    pub fn thermocouple(self) -> Temperature {
        let quarters = (self.0 as i32) >> 18;
        Temperature::from_bits(quarters << 2)
    }

    /// Cold junction temperature, 12 bits signed in steps of 0.0625 degrees Celsius
    #[allow(clippy::cast_possible_wrap)]
    pub fn internal(self) -> Temperature {
        let sixteenths = ((self.0 << 16) as i32) >> 20;
        Temperature::from_bits(sixteenths)
    }
}

pub struct Max31855<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI, CS, E> Max31855<SPI, CS>
where
    SPI: Transfer<u8, Error = E>,
    CS: OutputPin,
{
    pub fn new(spi: SPI, mut cs: CS) -> Self {
        // Deselected until the first read
        let _ = cs.set_high();
        Self { spi, cs }
    }

    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    /// Reads the latest conversion from the chip
    pub fn read_frame(&mut self) -> Result<Frame, Error<E>> {
        let mut buf = [0u8; 4];

        self.cs.set_low().map_err(|_| Error::ChipSelect)?;
        let res = self.spi.transfer(&mut buf).map(|_| ());
        self.cs.set_high().map_err(|_| Error::ChipSelect)?;
        res?;

        let frame = Frame(u32::from_be_bytes(buf));
        if frame.0 & RESERVED != 0 {
            return Err(Error::InvalidFrame);
        }

        Ok(frame)
    }
}

impl<SPI, CS, E> Thermocouple for Max31855<SPI, CS>
where
    SPI: Transfer<u8, Error = E>,
    CS: OutputPin,
{
    type Error = Error<E>;

    fn read_celsius(&mut self) -> Result<f32, Self::Error> {
        let frame = self.read_frame()?;
        if frame.is_fault() {
            Ok(f32::NAN)
        } else {
            Ok(frame.thermocouple().to_num())
        }
    }

    fn read_faults(&mut self) -> Result<Faults, Self::Error> {
        Ok(self.read_frame()?.faults())
    }
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;

    use super::*;

    struct FakeSpi {
        frame: [u8; 4],
        transfers: u32,
    }

    impl Transfer<u8> for FakeSpi {
        type Error = Infallible;

        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
            self.transfers += 1;
            words.copy_from_slice(&self.frame);
            Ok(words)
        }
    }

    #[derive(Default)]
    struct FakeCs {
        high: bool,
        toggles: u32,
    }

    impl OutputPin for FakeCs {
        type Error = Infallible;

        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            self.toggles += 1;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.high = true;
            self.toggles += 1;
            Ok(())
        }
    }

    fn chip(raw: u32) -> Max31855<FakeSpi, FakeCs> {
        let spi = FakeSpi {
            frame: raw.to_be_bytes(),
            transfers: 0,
        };
        Max31855::new(spi, FakeCs::default())
    }

    #[test]
    fn decodes_positive_temperatures() {
        // 93.25 C thermocouple (373 quarters), 25.0625 C junction (401 sixteenths)
        let frame = Frame((373 << 18) | (401 << 4));
        assert_eq!(frame.thermocouple(), Temperature::from_num(93.25));
        assert_eq!(frame.internal(), Temperature::from_num(25.0625));
        assert!(!frame.is_fault());
    }

    #[test]
    fn decodes_negative_temperatures() {
        // -0.25 C thermocouple, -1.0 C junction (datasheet examples)
        let frame = Frame((0x3FFF << 18) | (0xFF0 << 4));
        assert_eq!(frame.thermocouple(), Temperature::from_num(-0.25));
        assert_eq!(frame.internal(), Temperature::from_num(-1));
    }

    #[test]
    fn fault_frame_reads_nan_and_flags() {
        let mut tc = chip(FAULT | 0b010);
        assert!(tc.read_celsius().unwrap().is_nan());
        assert_eq!(tc.read_faults().unwrap(), Faults::SHORT_TO_GROUND);
    }

    #[test]
    fn reads_celsius() {
        let mut tc = chip(400 << 18);
        assert_eq!(tc.read_celsius().unwrap(), 100.0);

        let (spi, cs) = tc.release();
        assert_eq!(spi.transfers, 1);
        assert!(cs.high);
        assert_eq!(cs.toggles, 3);
    }

    #[test]
    fn floating_bus_is_invalid() {
        let mut tc = chip(u32::MAX);
        assert_eq!(tc.read_frame(), Err(Error::InvalidFrame));
    }
}
