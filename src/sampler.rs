//! Periodic trigger -> capture -> wait -> decode -> publish cycle.
//!
//! Every failure is local to its cycle: the cache keeps the last good
//! reading and the next period retries from scratch.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::cache::ReadingCache;
use crate::capture::{CaptureChannel, Completion};
use crate::config::SamplerConfig;
use crate::decoder::{DecodeError, DecodedReading, FrameDecoder};
use crate::handoff::Handoff;
use crate::trigger::{trigger, TriggerError, WakeLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CycleState {
    Idle,
    Triggering,
    Capturing,
    AwaitingHandoff,
    Decoding,
}

impl CycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Triggering,
            2 => Self::Capturing,
            3 => Self::AwaitingHandoff,
            4 => Self::Decoding,
            _ => Self::Idle,
        }
    }
}

/// Whether `failures` consecutive failed cycles mean the sensor is offline.
/// A threshold of zero never reports offline.
pub fn past_offline_threshold(failures: u32, offline_after: u32) -> bool {
    offline_after > 0 && failures >= offline_after
}

#[derive(Debug)]
pub enum CycleError<LE, CE> {
    Trigger(TriggerError<LE>),
    Arm(CE),
    Timeout(Duration),
    Decode(DecodeError),
    Cancelled,
}

impl<LE: fmt::Display, CE: fmt::Display> fmt::Display for CycleError<LE, CE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trigger(err) => write!(f, "trigger failed: {err}"),
            Self::Arm(err) => write!(f, "arming capture failed: {err}"),
            Self::Timeout(wait) => write!(f, "no capture completion within {wait:?}"),
            Self::Decode(err) => write!(f, "decode failed: {err}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl<LE, CE> std::error::Error for CycleError<LE, CE>
where
    LE: fmt::Debug + fmt::Display,
    CE: fmt::Debug + fmt::Display,
{
}

/// State shared between the sampling task and any number of readers.
pub struct Shared {
    pub cache: ReadingCache,
    consecutive_failures: AtomicU32,
    stop: AtomicBool,
    state: AtomicU8,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            cache: ReadingCache::new(),
            consecutive_failures: AtomicU32::new(0),
            stop: AtomicBool::new(false),
            state: AtomicU8::new(CycleState::Idle as u8),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Where the sampling task currently is in its cycle.
    pub fn state(&self) -> CycleState {
        CycleState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: CycleState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Sampler<L, C, D, H: ?Sized> {
    line: L,
    channel: C,
    decoder: D,
    handoff: Arc<H>,
    shared: Arc<Shared>,
    config: SamplerConfig,
}

impl<L, C, D, H> Sampler<L, C, D, H>
where
    L: WakeLine,
    C: CaptureChannel,
    D: FrameDecoder,
    H: Handoff<Completion> + ?Sized,
{
    pub fn new(
        line: L,
        channel: C,
        decoder: D,
        handoff: Arc<H>,
        shared: Arc<Shared>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            line,
            channel,
            decoder,
            handoff,
            shared,
            config,
        }
    }

    pub fn state(&self) -> CycleState {
        self.shared.state()
    }

    fn enter(&self, state: CycleState) {
        debug!("{:?} -> {:?}", self.shared.state(), state);
        self.shared.set_state(state);
    }

    /// Runs one acquisition and publishes the reading if it validates.
    pub fn run_cycle(&mut self) -> Result<DecodedReading, CycleError<L::Error, C::Error>> {
        let result = self.acquire();
        self.enter(CycleState::Idle);

        match &result {
            Ok(reading) => {
                self.shared.cache.publish(*reading);
                let failures = self.shared.consecutive_failures.swap(0, Ordering::Relaxed);
                if past_offline_threshold(failures, self.config.offline_after) {
                    info!("sensor back online after {failures} failed cycles");
                }
            }
            Err(CycleError::Cancelled) => {}
            Err(_) => {
                let failures = self.shared.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures == self.config.offline_after {
                    error!("sensor offline: {failures} consecutive failed cycles");
                }
            }
        }

        result
    }

    fn acquire(&mut self) -> Result<DecodedReading, CycleError<L::Error, C::Error>> {
        // A capture that finished after the last timeout belongs to the last cycle.
        match self.handoff.take(Duration::ZERO) {
            Some(Completion::Cancel) => return Err(CycleError::Cancelled),
            Some(Completion::Captured(len)) => debug!("dropping stale capture of {len} symbols"),
            None => {}
        }

        self.enter(CycleState::Triggering);
        trigger(&mut self.line, &self.config.wake).map_err(CycleError::Trigger)?;
        // The sensor answers within microseconds of the release: arm before anything else.
        self.channel.arm().map_err(CycleError::Arm)?;
        self.enter(CycleState::Capturing);

        self.enter(CycleState::AwaitingHandoff);
        let len = match self.handoff.take(self.config.handoff_timeout) {
            Some(Completion::Captured(len)) => len,
            Some(Completion::Cancel) => {
                let _ = self.channel.disarm();
                return Err(CycleError::Cancelled);
            }
            None => {
                if let Err(err) = self.channel.disarm() {
                    warn!("resetting capture channel failed: {err}");
                }
                return Err(CycleError::Timeout(self.config.handoff_timeout));
            }
        };

        self.enter(CycleState::Decoding);
        let frame = self.channel.frame(len);
        let reading = self.decoder.decode(&frame).map_err(CycleError::Decode)?;
        debug!("decoded {reading} from {} symbols", frame.len());
        Ok(reading)
    }

    /// Samples every `period` until a stop is requested or `wakeups` fires or
    /// disconnects.
    pub fn run(mut self, wakeups: Receiver<()>) {
        info!(
            "sampling every {:?}, handoff timeout {:?}",
            self.config.period, self.config.handoff_timeout
        );

        let mut wait = self.config.warmup;
        loop {
            match wakeups.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.shared.stop_requested() {
                break;
            }

            match self.run_cycle() {
                Ok(reading) => info!("{reading}"),
                Err(CycleError::Cancelled) => break,
                Err(err) => warn!("cycle failed: {err}"),
            }
            wait = self.config.period;
        }

        info!("sampling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{Dht11Decoder, Temperature};
    use crate::handoff::SlotHandoff;
    use crate::pulse::RawFrame;
    use crate::sim::{encode_frame, Response, SimEvent, SimSensor};
    use std::sync::mpsc;
    use std::sync::{Mutex, Once};
    use std::thread;
    use std::time::Instant;

    static INIT: Once = Once::new();

    fn setup() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }

    fn config() -> SamplerConfig {
        let mut config = SamplerConfig {
            period: Duration::from_millis(20),
            handoff_timeout: Duration::from_millis(50),
            warmup: Duration::ZERO,
            offline_after: 3,
            ..Default::default()
        };
        config.wake.hold_low = Duration::from_millis(1);
        config
    }

    type TestSampler = Sampler<
        crate::sim::SimLine,
        crate::sim::SimChannel<SlotHandoff<Completion>>,
        Dht11Decoder,
        SlotHandoff<Completion>,
    >;

    fn sampler(sensor: &SimSensor) -> (TestSampler, Arc<Shared>, Arc<SlotHandoff<Completion>>) {
        setup();
        let handoff = Arc::new(SlotHandoff::new());
        let shared = Arc::new(Shared::new());
        let sampler = Sampler::new(
            sensor.line(),
            sensor.channel(handoff.clone()),
            Dht11Decoder::default(),
            handoff.clone(),
            shared.clone(),
            config(),
        );
        (sampler, shared, handoff)
    }

    /// Records the cycle state each time the channel is armed.
    struct StateAtArm<C> {
        inner: C,
        shared: Arc<Shared>,
        seen: Arc<Mutex<Vec<CycleState>>>,
    }

    impl<C: CaptureChannel> CaptureChannel for StateAtArm<C> {
        type Error = C::Error;

        fn arm(&mut self) -> Result<(), Self::Error> {
            self.seen.lock().unwrap().push(self.shared.state());
            self.inner.arm()
        }

        fn frame(&self, len: usize) -> RawFrame {
            self.inner.frame(len)
        }

        fn disarm(&mut self) -> Result<(), Self::Error> {
            self.inner.disarm()
        }
    }

    fn reading(tenths: i16, humidity: u8) -> DecodedReading {
        DecodedReading {
            temperature: Temperature::from_tenths(tenths),
            humidity,
        }
    }

    #[test]
    fn publishes_valid_reading() {
        let sensor = SimSensor::new();
        sensor.push(Response::Reading {
            humidity: 0x3700,
            temperature: 0x1A03,
        });
        let (mut sampler, shared, _) = sampler(&sensor);

        assert_eq!(sampler.run_cycle().unwrap(), reading(263, 55));
        assert_eq!(sampler.state(), CycleState::Idle);
        assert_eq!(shared.cache.latest(), Some(reading(263, 55)));
        assert_eq!(sensor.triggers(), 1);
    }

    #[test]
    fn timeout_leaves_cache_untouched() {
        let sensor = SimSensor::new();
        sensor.push(Response::Reading {
            humidity: 0x3700,
            temperature: 0x1A03,
        });
        sensor.push(Response::Silent);
        let (mut sampler, shared, _) = sampler(&sensor);

        sampler.run_cycle().unwrap();
        let started = Instant::now();
        let err = sampler.run_cycle().unwrap_err();
        assert!(matches!(err, CycleError::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(shared.cache.read(), reading(263, 55));
        assert_eq!(sensor.disarms(), 1);
    }

    #[test]
    fn checksum_failure_keeps_previous_value() {
        let sensor = SimSensor::new();
        sensor.push(Response::Reading {
            humidity: 0x3700,
            temperature: 0x1A03,
        });
        sensor.push(Response::Corrupted {
            humidity: 0x4000,
            temperature: 0x1400,
        });
        let (mut sampler, shared, _) = sampler(&sensor);

        sampler.run_cycle().unwrap();
        let err = sampler.run_cycle().unwrap_err();
        assert!(matches!(
            err,
            CycleError::Decode(DecodeError::ChecksumMismatch { .. })
        ));
        assert_eq!(shared.cache.read(), reading(263, 55));
    }

    #[test]
    fn short_frame_never_writes_cache() {
        let sensor = SimSensor::new();
        let full = encode_frame(0x3700, 0x1A03);
        sensor.push(Response::Frames(vec![crate::pulse::RawFrame::from_words(
            &full.words()[..30],
        )]));
        let (mut sampler, shared, _) = sampler(&sensor);

        assert!(matches!(
            sampler.run_cycle(),
            Err(CycleError::Decode(DecodeError::TooShort { len: 30 }))
        ));
        assert_eq!(shared.cache.latest(), None);
    }

    #[test]
    fn trigger_failure_skips_capture() {
        let sensor = SimSensor::new();
        sensor.fail_next_trigger();
        let (mut sampler, shared, _) = sampler(&sensor);

        assert!(matches!(sampler.run_cycle(), Err(CycleError::Trigger(_))));
        assert_eq!(sensor.arms(), 0);
        assert_eq!(shared.consecutive_failures(), 1);
    }

    #[test]
    fn arm_failure_is_reported() {
        let sensor = SimSensor::new();
        sensor.fail_next_arm();
        let (mut sampler, _, _) = sampler(&sensor);

        assert!(matches!(sampler.run_cycle(), Err(CycleError::Arm(_))));
    }

    #[test]
    fn only_latest_of_two_completions_is_decoded() {
        let sensor = SimSensor::new();
        sensor.push(Response::Frames(vec![
            encode_frame(0x1E00, 0x1400),
            encode_frame(0x3700, 0x1A03),
        ]));
        let (mut sampler, _, handoff) = sampler(&sensor);

        assert_eq!(sampler.run_cycle().unwrap(), reading(263, 55));
        assert_eq!(handoff.overwritten(), 1);
    }

    #[test]
    fn stale_completion_is_flushed_before_trigger() {
        let sensor = SimSensor::new();
        sensor.push(Response::Reading {
            humidity: 0x3700,
            temperature: 0x1A03,
        });
        let (mut sampler, _, handoff) = sampler(&sensor);
        handoff.offer(Completion::Captured(42));

        assert_eq!(sampler.run_cycle().unwrap(), reading(263, 55));
        // The leftover was drained before the new capture landed, not replaced by it.
        assert_eq!(handoff.overwritten(), 0);
    }

    #[test]
    fn reports_offline_and_recovers() {
        let sensor = SimSensor::new();
        for _ in 0..3 {
            sensor.push(Response::Silent);
        }
        sensor.push(Response::Reading {
            humidity: 0x3700,
            temperature: 0x1A03,
        });
        let (mut sampler, shared, _) = sampler(&sensor);

        for expected in 1..=3 {
            assert!(sampler.run_cycle().is_err());
            assert_eq!(shared.consecutive_failures(), expected);
        }
        sampler.run_cycle().unwrap();
        assert_eq!(shared.consecutive_failures(), 0);
    }

    #[test]
    fn cancel_interrupts_the_bounded_wait() {
        let sensor = SimSensor::new();
        sensor.push(Response::Silent);
        let (mut sampler, shared, handoff) = sampler(&sensor);
        let mut long = config();
        long.handoff_timeout = Duration::from_secs(10);
        sampler.config = long;

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handoff.offer(Completion::Cancel);
        });
        let started = Instant::now();
        assert!(matches!(sampler.run_cycle(), Err(CycleError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(shared.consecutive_failures(), 0);
        canceller.join().unwrap();
    }

    #[test]
    fn run_loop_samples_until_stopped() {
        let sensor = SimSensor::new();
        sensor.repeat(Response::Reading {
            humidity: 0x2D00,
            temperature: 0x1605,
        });
        let (sampler, shared, _) = sampler(&sensor);
        let (stop_tx, stop_rx) = mpsc::channel();

        let worker = thread::spawn(move || sampler.run(stop_rx));
        let deadline = Instant::now() + Duration::from_secs(5);
        while sensor.triggers() < 3 {
            assert!(Instant::now() < deadline, "sampler did not cycle");
            thread::sleep(Duration::from_millis(5));
        }
        shared.request_stop();
        let _ = stop_tx.send(());
        worker.join().unwrap();

        assert_eq!(shared.cache.read(), reading(225, 45));
    }

    #[test]
    fn arms_right_after_release() {
        setup();
        let sensor = SimSensor::new();
        sensor.push(Response::Reading {
            humidity: 0x3700,
            temperature: 0x1A03,
        });
        let handoff = Arc::new(SlotHandoff::<Completion>::new());
        let shared = Arc::new(Shared::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let channel = StateAtArm {
            inner: sensor.channel(handoff.clone()),
            shared: shared.clone(),
            seen: seen.clone(),
        };
        let mut sampler = Sampler::new(
            sensor.line(),
            channel,
            Dht11Decoder::default(),
            handoff,
            shared.clone(),
            config(),
        );

        assert_eq!(sampler.run_cycle().unwrap(), reading(263, 55));
        // Nothing, not even a state change, sits between the release and the arm.
        assert_eq!(*seen.lock().unwrap(), [CycleState::Triggering]);
        assert_eq!(sensor.events(), [SimEvent::Released, SimEvent::Armed]);
        assert_eq!(shared.state(), CycleState::Idle);
    }

    #[test]
    fn run_waits_for_warmup_then_keeps_the_period() {
        let sensor = SimSensor::new();
        sensor.repeat(Response::Reading {
            humidity: 0x3700,
            temperature: 0x1A03,
        });
        let (mut sampler, shared, _) = sampler(&sensor);
        let warmup = Duration::from_millis(300);
        let period = Duration::from_millis(40);
        sampler.config.warmup = warmup;
        sampler.config.period = period;
        let (stop_tx, stop_rx) = mpsc::channel();

        let started = Instant::now();
        let worker = thread::spawn(move || sampler.run(stop_rx));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sensor.triggers(), 0);

        let deadline = Instant::now() + Duration::from_secs(5);
        while sensor.triggers() < 3 {
            assert!(Instant::now() < deadline, "sampler did not cycle");
            thread::sleep(Duration::from_millis(5));
        }
        shared.request_stop();
        let _ = stop_tx.send(());
        worker.join().unwrap();

        let released = sensor.released_at();
        assert!(released[0].duration_since(started) >= warmup);
        for pair in released.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= period);
        }
    }

    #[test]
    fn offline_threshold_of_zero_is_disabled() {
        assert!(!past_offline_threshold(0, 0));
        assert!(!past_offline_threshold(7, 0));
        assert!(!past_offline_threshold(4, 5));
        assert!(past_offline_threshold(5, 5));
        assert!(past_offline_threshold(6, 5));
    }
}
