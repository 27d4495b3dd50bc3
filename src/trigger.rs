use core::fmt;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::WakeTiming;

/// The bidirectional data line the sensor is attached to.
pub trait WakeLine {
    type Error: fmt::Debug + fmt::Display;

    fn set_output(&mut self) -> Result<(), Self::Error>;
    fn set_input(&mut self) -> Result<(), Self::Error>;
    fn set_level(&mut self, high: bool) -> Result<(), Self::Error>;

    /// Tight delay for holds shorter than a scheduler tick.
    fn delay_us(&mut self, us: u32) {
        let deadline = Instant::now() + Duration::from_micros(u64::from(us));
        while Instant::now() < deadline {
            core::hint::spin_loop();
        }
    }
}

#[derive(Debug)]
pub enum TriggerError<E> {
    SetOutput(E),
    DriveLow(E),
    Release(E),
    SetInput(E),
}

impl<E: fmt::Display> fmt::Display for TriggerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetOutput(err) => write!(f, "switching line to output failed: {err}"),
            Self::DriveLow(err) => write!(f, "driving line low failed: {err}"),
            Self::Release(err) => write!(f, "releasing line high failed: {err}"),
            Self::SetInput(err) => write!(f, "switching line to input failed: {err}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for TriggerError<E> {}

/// Sends the wake sequence: low for `hold_low`, high for `ready_pulse_us`, then
/// hands the line to the sensor. The first failing step aborts the sequence.
///
/// The sensor starts answering within microseconds of the release, so the
/// capture channel must be armed right after this returns.
pub fn trigger<L: WakeLine>(line: &mut L, timing: &WakeTiming) -> Result<(), TriggerError<L::Error>> {
    line.set_output().map_err(TriggerError::SetOutput)?;
    line.set_level(false).map_err(TriggerError::DriveLow)?;
    thread::sleep(timing.hold_low);
    line.set_level(true).map_err(TriggerError::Release)?;
    line.delay_us(timing.ready_pulse_us);
    line.set_input().map_err(TriggerError::SetInput)?;
    Ok(())
}
