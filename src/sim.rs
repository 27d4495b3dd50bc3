//! Simulated DHT11 for host builds.
//!
//! `SimLine` and `SimChannel` share a scripted sensor: each arm consumes
//! one `Response` and delivers it through the same completion path the
//! RMT interrupt uses.

use core::fmt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::capture::{on_capture_done, CaptureChannel, Completion};
use crate::handoff::Handoff;
use crate::pulse::{Level, Phase, PulseSymbol, RawFrame};
use crate::trigger::WakeLine;

// Nominal DHT11 timings in microseconds.
const RESPONSE_LOW_US: u16 = 80;
const RESPONSE_HIGH_US: u16 = 80;
const CELL_LOW_US: u16 = 50;
const ZERO_HIGH_US: u16 = 26;
const ONE_HIGH_US: u16 = 70;

/// Which phase of a bit cell the capture recorded first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOrder {
    LowFirst,
    /// The low part was filtered out, so the symbol opens with the high pulse.
    HighFirst,
}

fn cell(one: bool, order: CellOrder) -> PulseSymbol {
    let low = Phase::new(Level::Low, CELL_LOW_US);
    let high = Phase::new(Level::High, if one { ONE_HIGH_US } else { ZERO_HIGH_US });
    match order {
        CellOrder::LowFirst => PulseSymbol::new(low, high),
        CellOrder::HighFirst => PulseSymbol::new(high, low),
    }
}

/// Frame for the given humidity and temperature words with the given checksum.
pub fn encode_raw(humidity: u16, temperature: u16, checksum: u8, order: CellOrder) -> RawFrame {
    let mut frame = RawFrame::new();
    frame.push(PulseSymbol::new(
        Phase::new(Level::Low, RESPONSE_LOW_US),
        Phase::new(Level::High, RESPONSE_HIGH_US),
    ));

    let bits = u64::from(humidity) << 24 | u64::from(temperature) << 8 | u64::from(checksum);
    for shift in (0..40).rev() {
        frame.push(cell(bits >> shift & 1 == 1, order));
    }

    // Line released by the sensor; capture ends on the idle timeout.
    frame.push(PulseSymbol::new(
        Phase::new(Level::Low, CELL_LOW_US),
        Phase::new(Level::High, 0),
    ));
    frame
}

fn checksum(humidity: u16, temperature: u16) -> u8 {
    humidity
        .to_be_bytes()
        .iter()
        .chain(temperature.to_be_bytes().iter())
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

pub fn encode_frame_with(humidity: u16, temperature: u16, order: CellOrder) -> RawFrame {
    encode_raw(humidity, temperature, checksum(humidity, temperature), order)
}

/// A valid frame as the sensor sends it.
pub fn encode_frame(humidity: u16, temperature: u16) -> RawFrame {
    encode_frame_with(humidity, temperature, CellOrder::LowFirst)
}

#[derive(Debug, Clone)]
pub enum Response {
    Reading { humidity: u16, temperature: u16 },
    /// Valid data with the lowest checksum bit flipped.
    Corrupted { humidity: u16, temperature: u16 },
    /// Sensor does not answer; no completion is delivered.
    Silent,
    /// Each frame is delivered as its own completion, in order.
    Frames(Vec<RawFrame>),
}

impl Response {
    fn frames(&self) -> Vec<RawFrame> {
        match self {
            Self::Reading {
                humidity,
                temperature,
            } => vec![encode_frame(*humidity, *temperature)],
            Self::Corrupted {
                humidity,
                temperature,
            } => vec![encode_raw(
                *humidity,
                *temperature,
                checksum(*humidity, *temperature) ^ 1,
                CellOrder::LowFirst,
            )],
            Self::Silent => Vec::new(),
            Self::Frames(frames) => frames.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError(&'static str);

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "simulated {} failure", self.0)
    }
}

impl std::error::Error for SimError {}

/// Line and channel activity in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// The wake sequence handed the line to the sensor.
    Released,
    Armed,
}

#[derive(Default)]
struct SimState {
    script: VecDeque<Response>,
    repeat: Option<Response>,
    line_released: bool,
    fail_trigger: bool,
    fail_arm: bool,
    triggers: usize,
    arms: usize,
    disarms: usize,
    released_at: Vec<Instant>,
    events: Vec<SimEvent>,
}

/// Scripted sensor shared by a `SimLine` and a `SimChannel`.
#[derive(Clone, Default)]
pub struct SimSensor {
    state: Arc<Mutex<SimState>>,
}

impl SimSensor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn line(&self) -> SimLine {
        SimLine {
            sensor: self.clone(),
        }
    }

    pub fn channel<H>(&self, handoff: Arc<H>) -> SimChannel<H>
    where
        H: Handoff<Completion> + ?Sized,
    {
        SimChannel {
            sensor: self.clone(),
            handoff,
            received: RawFrame::new(),
        }
    }

    /// Queues the answer to one trigger.
    pub fn push(&self, response: Response) {
        self.state().script.push_back(response);
    }

    /// Answer used once the script is exhausted. Without one the sensor stays silent.
    pub fn repeat(&self, response: Response) {
        self.state().repeat = Some(response);
    }

    pub fn fail_next_trigger(&self) {
        self.state().fail_trigger = true;
    }

    pub fn fail_next_arm(&self) {
        self.state().fail_arm = true;
    }

    /// Completed wake sequences.
    pub fn triggers(&self) -> usize {
        self.state().triggers
    }

    pub fn arms(&self) -> usize {
        self.state().arms
    }

    pub fn disarms(&self) -> usize {
        self.state().disarms
    }

    /// When each wake sequence released the line.
    pub fn released_at(&self) -> Vec<Instant> {
        self.state().released_at.clone()
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state().events.clone()
    }
}

pub struct SimLine {
    sensor: SimSensor,
}

impl WakeLine for SimLine {
    type Error = SimError;

    fn set_output(&mut self) -> Result<(), Self::Error> {
        let mut state = self.sensor.state();
        if std::mem::take(&mut state.fail_trigger) {
            return Err(SimError("gpio direction"));
        }
        state.line_released = false;
        Ok(())
    }

    fn set_input(&mut self) -> Result<(), Self::Error> {
        let mut state = self.sensor.state();
        state.line_released = true;
        state.triggers += 1;
        state.released_at.push(Instant::now());
        state.events.push(SimEvent::Released);
        Ok(())
    }

    fn set_level(&mut self, _high: bool) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub struct SimChannel<H: ?Sized> {
    sensor: SimSensor,
    received: RawFrame,
    handoff: Arc<H>,
}

impl<H> CaptureChannel for SimChannel<H>
where
    H: Handoff<Completion> + ?Sized,
{
    type Error = SimError;

    fn arm(&mut self) -> Result<(), Self::Error> {
        let frames = {
            let mut state = self.sensor.state();
            if std::mem::take(&mut state.fail_arm) {
                return Err(SimError("capture arm"));
            }
            state.arms += 1;
            state.events.push(SimEvent::Armed);
            if !std::mem::take(&mut state.line_released) {
                // Nobody woke the sensor, so it stays quiet.
                return Ok(());
            }
            let response = state.script.pop_front().or_else(|| state.repeat.clone());
            response.map(|r| r.frames()).unwrap_or_default()
        };

        // Each frame lands in the receive buffer over the previous one.
        for frame in frames {
            self.received = frame;
            on_capture_done(&*self.handoff, frame.len());
        }
        Ok(())
    }

    fn frame(&self, len: usize) -> RawFrame {
        let words = self.received.words();
        RawFrame::from_words(&words[..len.min(words.len())])
    }

    fn disarm(&mut self) -> Result<(), Self::Error> {
        self.sensor.state().disarms += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::SlotHandoff;
    use std::time::Duration;

    #[test]
    fn reference_frame_layout() {
        let frame = encode_frame(0x3700, 0x1A03);
        assert_eq!(frame.len(), 42);
        assert_eq!(frame.get(0).map(|s| s.high_duration()), Some(RESPONSE_HIGH_US));
        // 0x37 = 0b0011_0111
        let first_byte: Vec<bool> = frame
            .symbols()
            .skip(1)
            .take(8)
            .map(|s| s.high_duration() == ONE_HIGH_US)
            .collect();
        assert_eq!(first_byte, [false, false, true, true, false, true, true, true]);
        assert_eq!(checksum(0x3700, 0x1A03), 0x54);
    }

    #[test]
    fn channel_stays_quiet_without_wake() {
        let sensor = SimSensor::new();
        sensor.repeat(Response::Reading {
            humidity: 0x3700,
            temperature: 0x1A03,
        });
        let handoff = Arc::new(SlotHandoff::new());
        let mut channel = sensor.channel(handoff.clone());

        channel.arm().unwrap();
        assert!(handoff.take(Duration::ZERO).is_none());

        let mut line = sensor.line();
        line.set_output().unwrap();
        line.set_input().unwrap();
        channel.arm().unwrap();
        assert_eq!(handoff.take(Duration::ZERO), Some(Completion::Captured(42)));
        assert_eq!(channel.frame(42).words(), encode_frame(0x3700, 0x1A03).words());
        assert_eq!(sensor.events(), [SimEvent::Armed, SimEvent::Released, SimEvent::Armed]);
    }

    #[test]
    fn later_frame_overwrites_the_receive_buffer() {
        let sensor = SimSensor::new();
        let short = RawFrame::from_words(&encode_frame(0x1E00, 0x1400).words()[..10]);
        sensor.push(Response::Frames(vec![short, encode_frame(0x3700, 0x1A03)]));
        let handoff = Arc::new(SlotHandoff::new());
        let mut channel = sensor.channel(handoff.clone());
        let mut line = sensor.line();

        line.set_output().unwrap();
        line.set_input().unwrap();
        channel.arm().unwrap();

        assert_eq!(handoff.take(Duration::ZERO), Some(Completion::Captured(42)));
        assert_eq!(channel.frame(42).words(), encode_frame(0x3700, 0x1A03).words());
        // A stale count larger than the buffer is clamped.
        assert_eq!(channel.frame(500).len(), 42);
    }
}
