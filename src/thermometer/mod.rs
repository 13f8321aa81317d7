//! Temperature sensor interface

pub mod max31855;

use fixed::types::I28F4;

/// I28F4 is a fixed point number with 4 fractional bits and 28 integer bits.
/// This gives us a precision of 0.0625 degrees Celsius & a range of (-2^27, 2^27 - 0.0625).
pub type Temperature = I28F4;

/// Thermocouple transport.
///
/// Mirrors what the converter chip offers: a reading in degrees Celsius that is NaN while the
/// chip flags a fault, and a separate view of the fault bits.
pub trait Thermocouple {
    type Error;

    /// Read the thermocouple temperature in degrees Celsius, NaN on a probe fault
    fn read_celsius(&mut self) -> Result<f32, Self::Error>;

    /// Read the fault bits reported at this instant
    fn read_faults(&mut self) -> Result<Faults, Self::Error>;
}

/// Set of thermocouple fault conditions.
///
/// Bit positions match the low bits of the MAX31855 frame.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Faults(u8);

impl Faults {
    pub const NONE: Self = Self(0);
    pub const OPEN_CIRCUIT: Self = Self(1 << 0);
    pub const SHORT_TO_GROUND: Self = Self(1 << 1);
    pub const SHORT_TO_SUPPLY: Self = Self(1 << 2);

    const ALL: u8 = 0b111;

    #[inline]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl core::ops::BitOr for Faults {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Faults {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(
            f,
            "Faults {{ open: {=bool}, short_gnd: {=bool}, short_vcc: {=bool} }}",
            self.contains(Self::OPEN_CIRCUIT),
            self.contains(Self::SHORT_TO_GROUND),
            self.contains(Self::SHORT_TO_SUPPLY),
        );
    }
}

/// A failed sensor reading
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorFault {
    /// The probe reported a fault. The set may be empty if the fault cleared before the fault
    /// bits were read.
    Probe(Faults),
    /// The bus transaction with the converter failed
    Bus,
}

impl SensorFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Probe(f) if f.contains(Faults::OPEN_CIRCUIT) => "Thermocouple open circuit",
            Self::Probe(f) if f.contains(Faults::SHORT_TO_GROUND) => "Thermocouple shorted to GND",
            Self::Probe(f) if f.contains(Faults::SHORT_TO_SUPPLY) => "Thermocouple shorted to VCC",
            Self::Probe(_) => "Thermocouple fault",
            Self::Bus => "Sensor bus error",
        }
    }
}

/// Turns a [`Thermocouple`] transport into classified readings.
///
/// Never retries: one bad observation is one fault.
pub struct SensorReader<T> {
    tc: T,
}

impl<T: Thermocouple> SensorReader<T> {
    pub const fn new(tc: T) -> Self {
        Self { tc }
    }

    pub fn thermocouple(&self) -> &T {
        &self.tc
    }
    pub fn thermocouple_mut(&mut self) -> &mut T {
        &mut self.tc
    }

    /// Read the temperature in degrees Celsius
    pub fn read(&mut self) -> Result<Temperature, SensorFault> {
        let celsius = self.tc.read_celsius().map_err(|_| {
            warn!("Thermocouple transaction failed");
            SensorFault::Bus
        })?;

        if celsius.is_nan() {
            let faults = self.tc.read_faults().map_err(|_| SensorFault::Bus)?;
            warn!("Thermocouple fault: {}", faults.bits());
            if faults.contains(Faults::OPEN_CIRCUIT) {
                warn!("FAULT: thermocouple is open");
            }
            if faults.contains(Faults::SHORT_TO_GROUND) {
                warn!("FAULT: thermocouple is shorted to GND");
            }
            if faults.contains(Faults::SHORT_TO_SUPPLY) {
                warn!("FAULT: thermocouple is shorted to VCC");
            }
            return Err(SensorFault::Probe(faults));
        }

        // Infinities and values outside the fixed point range count as a broken transaction
        if !celsius.is_finite() {
            return Err(SensorFault::Bus);
        }
        Temperature::checked_from_num(celsius).ok_or(SensorFault::Bus)
    }
}

/// Fake thermocouple for testing
#[cfg(any(test, feature = "fake"))]
pub mod fake {
    use core::convert::Infallible;

    use super::{Faults, Thermocouple};

    /// A fake thermocouple that returns a settable temperature or fault
    #[derive(Debug, Default)]
    pub struct FakeThermocouple {
        celsius: f32,
        faults: Faults,
        reads: u32,
    }

    impl FakeThermocouple {
        pub fn new(celsius: f32) -> Self {
            Self {
                celsius,
                ..Self::default()
            }
        }

        /// Set the temperature returned by the next reads and clear any fault
        pub fn set(&mut self, celsius: f32) {
            self.celsius = celsius;
            self.faults = Faults::NONE;
        }

        /// Make the next reads return NaN with the given fault bits
        pub fn fault(&mut self, faults: Faults) {
            self.celsius = f32::NAN;
            self.faults = faults;
        }

        /// Number of temperature reads performed
        pub fn reads(&self) -> u32 {
            self.reads
        }
    }

    impl Thermocouple for FakeThermocouple {
        type Error = Infallible;

        fn read_celsius(&mut self) -> Result<f32, Self::Error> {
            self.reads += 1;
            Ok(self.celsius)
        }

        fn read_faults(&mut self) -> Result<Faults, Self::Error> {
            Ok(self.faults)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fake::FakeThermocouple, *};

    struct BrokenBus;

    impl Thermocouple for BrokenBus {
        type Error = ();

        fn read_celsius(&mut self) -> Result<f32, ()> {
            Err(())
        }

        fn read_faults(&mut self) -> Result<Faults, ()> {
            Err(())
        }
    }

    #[test]
    fn reads_celsius() {
        let mut reader = SensorReader::new(FakeThermocouple::new(92.25));
        assert_eq!(reader.read(), Ok(Temperature::from_num(92.25)));
    }

    #[test]
    fn nan_is_fault_with_flags() {
        let mut reader = SensorReader::new(FakeThermocouple::new(20.0));
        reader
            .thermocouple_mut()
            .fault(Faults::OPEN_CIRCUIT | Faults::SHORT_TO_SUPPLY);

        let Err(SensorFault::Probe(faults)) = reader.read() else {
            panic!("expected probe fault");
        };
        assert!(faults.contains(Faults::OPEN_CIRCUIT));
        assert!(faults.contains(Faults::SHORT_TO_SUPPLY));
        assert!(!faults.contains(Faults::SHORT_TO_GROUND));
    }

    #[test]
    fn nan_without_flags_is_still_fault() {
        let mut reader = SensorReader::new(FakeThermocouple::new(f32::NAN));
        assert_eq!(reader.read(), Err(SensorFault::Probe(Faults::NONE)));
    }

    #[test]
    fn single_observation_no_retry() {
        let mut reader = SensorReader::new(FakeThermocouple::new(f32::NAN));
        let _ = reader.read();
        assert_eq!(reader.thermocouple().reads(), 1);
    }

    #[test]
    fn bus_error_is_fault() {
        let mut reader = SensorReader::new(BrokenBus);
        assert_eq!(reader.read(), Err(SensorFault::Bus));
    }

    #[test]
    fn infinite_reading_is_fault() {
        let mut reader = SensorReader::new(FakeThermocouple::new(f32::INFINITY));
        assert_eq!(reader.read(), Err(SensorFault::Bus));
    }

    #[test]
    fn fault_bits_truncate() {
        assert_eq!(Faults::from_bits_truncate(0xFF).bits(), 0b111);
    }
}
