//! DHT11 frame decoding.
//!
//! A frame is one response symbol followed by 40 bit cells, MSB first:
//! humidity (integer, fraction), temperature (integer, tenths), checksum.
//! A bit cell is ~50us low then ~26-28us high for 0 or ~70us high for 1,
//! so only the high pulse length carries the value.

use core::fmt;

use crate::pulse::{PulseSymbol, RawFrame, MIN_FRAME_SYMBOLS};

/// High pulses longer than this many ticks (1 tick = 1us) decode as 1.
pub const DURATION_MARGIN: u16 = 40;

/// Temperature in tenths of a degree Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Temperature(i16);

impl Temperature {
    pub const fn from_tenths(tenths: i16) -> Self {
        Self(tenths)
    }

    pub const fn tenths(self) -> i16 {
        self.0
    }

    pub fn celsius(self) -> f32 {
        f32::from(self.0) / 10.0
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{}", abs / 10, abs % 10)
    }
}

/// A checksum-validated measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodedReading {
    pub temperature: Temperature,
    pub humidity: u8,
}

impl DecodedReading {
    /// Value reported before the first successful decode.
    pub const SENTINEL: Self = Self {
        temperature: Temperature(0),
        humidity: 0,
    };
}

impl fmt::Display for DecodedReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°C {}%", self.temperature, self.humidity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    TooShort { len: usize },
    ChecksumMismatch { expected: u8, actual: u8 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => write!(
                f,
                "frame too short: {len} symbols, need at least {MIN_FRAME_SYMBOLS}"
            ),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "checksum mismatch: expected {expected:02X}, got {actual:02X}"
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Turns a captured frame into a reading for one sensor family.
pub trait FrameDecoder {
    fn decode(&self, frame: &RawFrame) -> Result<DecodedReading, DecodeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct Dht11Decoder {
    margin: u16,
}

impl Dht11Decoder {
    pub const fn new(margin: u16) -> Self {
        Self { margin }
    }

    pub fn margin(&self) -> u16 {
        self.margin
    }

    fn bit(&self, symbol: &PulseSymbol) -> bool {
        symbol.high_duration() > self.margin
    }

    fn accumulate(&self, symbols: impl Iterator<Item = PulseSymbol>) -> u16 {
        symbols.fold(0u16, |acc, symbol| (acc << 1) | u16::from(self.bit(&symbol)))
    }
}

impl Default for Dht11Decoder {
    fn default() -> Self {
        Self::new(DURATION_MARGIN)
    }
}

impl FrameDecoder for Dht11Decoder {
    fn decode(&self, frame: &RawFrame) -> Result<DecodedReading, DecodeError> {
        if frame.len() < MIN_FRAME_SYMBOLS {
            return Err(DecodeError::TooShort { len: frame.len() });
        }

        // Skip the sensor's response pulse.
        let mut cells = frame.symbols().skip(1);
        let humidity = self.accumulate(cells.by_ref().take(16));
        let temperature = self.accumulate(cells.by_ref().take(16));
        let checksum = self.accumulate(cells.by_ref().take(8)) as u8;

        let [hum_int, hum_frac] = humidity.to_be_bytes();
        let [temp_int, temp_frac] = temperature.to_be_bytes();
        let expected = hum_int
            .wrapping_add(hum_frac)
            .wrapping_add(temp_int)
            .wrapping_add(temp_frac);
        if expected != checksum {
            return Err(DecodeError::ChecksumMismatch {
                expected,
                actual: checksum,
            });
        }

        // The fractional humidity byte is always zero on the DHT11.
        let tenths = i16::from(temp_int) * 10 + i16::from(temp_frac);
        Ok(DecodedReading {
            temperature: Temperature(tenths),
            humidity: hum_int,
        })
    }
}

/// Decodes with the reference margin.
pub fn decode(frame: &RawFrame) -> Result<DecodedReading, DecodeError> {
    Dht11Decoder::default().decode(frame)
}
