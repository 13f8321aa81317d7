//! Recent readings and persistent settings.

pub mod settings;

use fixed::types::I12F4;
use heapless::HistoryBuffer;

use crate::{thermometer::Temperature, Instant};

/// Ring of the most recent successful readings
pub struct History<const N: usize> {
    temps: HistoryBuffer<Record, N>,
}

impl<const N: usize> History<N> {
    pub const fn new() -> Self {
        Self {
            temps: HistoryBuffer::new(),
        }
    }

    pub fn write(&mut self, temp: Temperature, now: Instant) {
        self.temps.write(Record::at(now, temp));
    }

    /// Most recent reading
    pub fn recent(&self) -> Option<Record> {
        self.temps.recent().copied()
    }

    /// Readings from oldest to newest
    pub fn oldest(&self) -> impl Iterator<Item = Record> + '_ {
        self.temps.oldest_ordered().copied()
    }

    pub fn len(&self) -> usize {
        self.temps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const N: usize> Default for History<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Copy, Clone)]
#[repr(C, packed)]
pub struct Record {
    /// Seconds since startup (LSB u24)
    secs: [u8; 3],
    /// Temperature with the full sensor precision, saturated to (-2048, 2048)
    value: I12F4,
}

static_assertions::assert_eq_size!(Record, [u8; 5]);

impl Record {
    #[inline]
    fn new(secs: u32, value: I12F4) -> Self {
        let [a, b, c, _] = secs.to_le_bytes();
        Self {
            secs: [a, b, c],
            value,
        }
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn at(now: Instant, temp: Temperature) -> Self {
        let secs = now.duration_since_epoch().to_secs();
        Self::new(secs as u32, temp.saturating_to_num())
    }

    /// Seconds since startup, wrapping after 2^24
    #[inline]
    pub fn secs(self) -> u32 {
        let [a, b, c] = self.secs;
        u32::from_le_bytes([a, b, c, 0])
    }

    #[inline]
    pub fn value(self) -> Temperature {
        let value = self.value;
        Temperature::from_num(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> Instant {
        Instant::from_ticks(secs * 1000)
    }

    #[test]
    fn keeps_most_recent() {
        let mut history = History::<3>::new();
        assert!(history.recent().is_none());

        for (i, t) in [90.0, 91.5, 92.25, 93.0625].into_iter().enumerate() {
            history.write(Temperature::from_num(t), at(i as u64));
        }

        assert_eq!(history.len(), 3);
        let recent = history.recent().unwrap();
        assert_eq!(recent.secs(), 3);
        assert_eq!(recent.value(), Temperature::from_num(93.0625));

        let secs: heapless::Vec<u32, 3> = history.oldest().map(Record::secs).collect();
        assert_eq!(secs.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn seconds_wrap_at_24_bits() {
        let record = Record::at(at(0x0100_0005), Temperature::from_num(20));
        assert_eq!(record.secs(), 5);
    }

    #[test]
    fn value_saturates() {
        let record = Record::at(at(0), Temperature::from_num(5000));
        assert_eq!(record.value(), Temperature::from_num(I12F4::MAX));
    }
}
