use std::sync::atomic::{AtomicU32, Ordering};

use crate::decoder::{DecodedReading, Temperature};

const VALID: u32 = 1 << 31;

/// Latest validated reading, packed into one word so temperature and
/// humidity are always published and observed together.
///
/// Layout: bit 31 valid, bits 8..24 temperature tenths (i16), bits 0..8 humidity.
pub struct ReadingCache {
    word: AtomicU32,
}

impl ReadingCache {
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }

    fn pack(reading: DecodedReading) -> u32 {
        let tenths = reading.temperature.tenths() as u16;
        VALID | u32::from(tenths) << 8 | u32::from(reading.humidity)
    }

    fn unpack(word: u32) -> Option<DecodedReading> {
        if word & VALID == 0 {
            return None;
        }
        Some(DecodedReading {
            temperature: Temperature::from_tenths((word >> 8) as u16 as i16),
            humidity: word as u8,
        })
    }

    pub fn publish(&self, reading: DecodedReading) {
        self.word.store(Self::pack(reading), Ordering::Release);
    }

    pub fn latest(&self) -> Option<DecodedReading> {
        Self::unpack(self.word.load(Ordering::Acquire))
    }

    /// Never blocks; the sentinel until the first publish.
    pub fn read(&self) -> DecodedReading {
        self.latest().unwrap_or(DecodedReading::SENTINEL)
    }
}

impl Default for ReadingCache {
    fn default() -> Self {
        Self::new()
    }
}
