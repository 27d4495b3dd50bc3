//! DHT11 temperature/humidity driver built on a pulse capture peripheral.
//!
//! A sampling task wakes the sensor, arms the capture channel and waits a
//! bounded time for the completion interrupt to hand over the captured
//! symbols. Decoded readings land in a lock-free cache that any task can
//! read without blocking.

pub mod cache;
pub mod capture;
pub mod config;
pub mod decoder;
pub mod handoff;
pub mod pulse;
pub mod sampler;
pub mod sensor;
pub mod trigger;

#[cfg(not(target_os = "espidf"))]
pub mod sim;

#[cfg(target_os = "espidf")]
pub mod esp;

pub use config::SamplerConfig;
pub use decoder::{decode, DecodeError, DecodedReading, Temperature};
pub use pulse::{PulseSymbol, RawFrame};
pub use sensor::{read_latest, InitError, SensorHandle, SensorStatus};
