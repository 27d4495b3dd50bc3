use core::fmt;
use std::time::Duration;

use crate::decoder::DURATION_MARGIN;
use crate::pulse::{MAX_SYMBOLS, MIN_FRAME_SYMBOLS};

// DHT11 data line GPIO. Needs a pull-up (internal or external ~4.7k).
pub const DEFAULT_GPIO: i32 = 1;
pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_OFFLINE_AFTER: u32 = 5;

// The sensor needs at least 1s between measurements and after power-up.
pub const SENSOR_RECOVERY: Duration = Duration::from_secs(1);

const DHT11_GPIO: Option<&str> = option_env!("DHT11_GPIO");
const DHT11_SAMPLE_PERIOD_MS: Option<&str> = option_env!("DHT11_SAMPLE_PERIOD_MS");
const DHT11_HANDOFF_TIMEOUT_MS: Option<&str> = option_env!("DHT11_HANDOFF_TIMEOUT_MS");
const DHT11_OFFLINE_AFTER: Option<&str> = option_env!("DHT11_OFFLINE_AFTER");

/// GPIO number of the data line, `DHT11_GPIO` at build time or the board default.
pub fn dht_gpio() -> i32 {
    DHT11_GPIO
        .and_then(|v| v.trim().parse::<i32>().ok())
        .unwrap_or(DEFAULT_GPIO)
}

fn env_millis(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeTiming {
    /// Low hold that wakes the sensor. Scheduled sleep.
    pub hold_low: Duration,
    /// High pulse before releasing the line. Busy wait, shorter than a tick.
    pub ready_pulse_us: u32,
}

impl Default for WakeTiming {
    fn default() -> Self {
        Self {
            hold_low: Duration::from_millis(20),
            ready_pulse_us: 20,
        }
    }
}

/// Receive-side settings of the pulse capture peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Tick rate of captured durations; 1MHz makes 1 tick = 1us.
    pub resolution_hz: u32,
    /// Shorter pulses are treated as glitches.
    pub min_pulse_ns: u32,
    /// A level held longer than this ends the frame.
    pub max_pulse_ns: u32,
    pub max_symbols: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            resolution_hz: 1_000_000,
            min_pulse_ns: 1_000,
            // Longest DHT11 level is 80us.
            max_pulse_ns: 200_000,
            max_symbols: MAX_SYMBOLS,
        }
    }
}

impl CaptureConfig {
    fn ns_to_ticks(&self, ns: u32) -> u64 {
        u64::from(ns) * u64::from(self.resolution_hz) / 1_000_000_000
    }

    pub fn min_pulse_ticks(&self) -> u64 {
        self.ns_to_ticks(self.min_pulse_ns)
    }

    pub fn max_pulse_ticks(&self) -> u64 {
        self.ns_to_ticks(self.max_pulse_ns)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    pub period: Duration,
    /// Bounded wait for the capture completion.
    pub handoff_timeout: Duration,
    /// Delay before the first trigger.
    pub warmup: Duration,
    /// Consecutive failed cycles before the sensor is reported offline.
    pub offline_after: u32,
    pub bit_margin: u16,
    pub wake: WakeTiming,
    pub capture: CaptureConfig,
    pub task_name: &'static str,
    pub task_stack: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_SAMPLE_PERIOD,
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
            warmup: SENSOR_RECOVERY,
            offline_after: DEFAULT_OFFLINE_AFTER,
            bit_margin: DURATION_MARGIN,
            wake: WakeTiming::default(),
            capture: CaptureConfig::default(),
            task_name: "dht11",
            task_stack: 8 * 1024,
        }
    }
}

impl SamplerConfig {
    /// Defaults with the build-time `DHT11_*` overrides applied.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            period: env_millis(DHT11_SAMPLE_PERIOD_MS).unwrap_or(defaults.period),
            handoff_timeout: env_millis(DHT11_HANDOFF_TIMEOUT_MS)
                .unwrap_or(defaults.handoff_timeout),
            offline_after: DHT11_OFFLINE_AFTER
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(defaults.offline_after),
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period < SENSOR_RECOVERY {
            return Err(ConfigError::PeriodTooShort(self.period));
        }
        if self.handoff_timeout.is_zero() || self.handoff_timeout >= self.period {
            return Err(ConfigError::HandoffTimeout(self.handoff_timeout));
        }
        let capture = &self.capture;
        if capture.resolution_hz == 0 {
            return Err(ConfigError::Resolution);
        }
        if capture.min_pulse_ns >= capture.max_pulse_ns {
            return Err(ConfigError::PulseRange {
                min_ns: capture.min_pulse_ns,
                max_ns: capture.max_pulse_ns,
            });
        }
        let margin = u64::from(self.bit_margin);
        if margin < capture.min_pulse_ticks() || margin >= capture.max_pulse_ticks() {
            return Err(ConfigError::BitMargin(self.bit_margin));
        }
        if capture.max_symbols < MIN_FRAME_SYMBOLS || capture.max_symbols > MAX_SYMBOLS {
            return Err(ConfigError::BufferSize(capture.max_symbols));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    PeriodTooShort(Duration),
    HandoffTimeout(Duration),
    Resolution,
    PulseRange { min_ns: u32, max_ns: u32 },
    BitMargin(u16),
    BufferSize(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeriodTooShort(period) => write!(
                f,
                "sample period {period:?} is shorter than the sensor recovery time {SENSOR_RECOVERY:?}"
            ),
            Self::HandoffTimeout(timeout) => write!(
                f,
                "handoff timeout {timeout:?} must be non-zero and shorter than the sample period"
            ),
            Self::Resolution => write!(f, "capture resolution must be non-zero"),
            Self::PulseRange { min_ns, max_ns } => {
                write!(f, "invalid pulse window {min_ns}ns..{max_ns}ns")
            }
            Self::BitMargin(margin) => {
                write!(f, "bit margin {margin} lies outside the capture pulse window")
            }
            Self::BufferSize(size) => write!(
                f,
                "capture buffer of {size} symbols, need {MIN_FRAME_SYMBOLS}..={MAX_SYMBOLS}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
