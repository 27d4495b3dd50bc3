use core::fmt;
use std::io;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info};

use crate::capture::{CaptureChannel, Completion};
use crate::config::{ConfigError, SamplerConfig};
use crate::decoder::{DecodedReading, Dht11Decoder, FrameDecoder};
use crate::handoff::Handoff;
use crate::sampler::{past_offline_threshold, Sampler, Shared};
use crate::trigger::WakeLine;

#[derive(Debug)]
pub enum InitError {
    Config(ConfigError),
    /// Data line, capture channel or handoff queue could not be set up.
    Resource {
        what: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The sampling task could not be created.
    Task(io::Error),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
            Self::Resource { what, source } => write!(f, "allocating {what} failed: {source}"),
            Self::Task(err) => write!(f, "creating sampling task failed: {err}"),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Resource { source, .. } => Some(source.as_ref()),
            Self::Task(err) => Some(err),
        }
    }
}

impl InitError {
    pub fn resource<E>(what: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Resource {
            what,
            source: Box::new(source),
        }
    }
}

impl From<ConfigError> for InitError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorStatus {
    /// No successful decode yet.
    Pending,
    Online,
    /// Too many consecutive failed cycles; the cache holds the last good value.
    Offline,
}

/// Owner of one sensor's sampling task.
///
/// Dropping the handle stops the task and releases the capture channel and
/// the handoff queue.
pub struct SensorHandle {
    shared: Arc<Shared>,
    offline_after: u32,
    wake: Option<Sender<()>>,
    cancel: Box<dyn Fn() + Send + Sync>,
    worker: Option<JoinHandle<()>>,
}

impl SensorHandle {
    /// Starts sampling with the reference DHT11 decoder.
    pub fn spawn<L, C, H>(
        line: L,
        channel: C,
        handoff: Arc<H>,
        config: SamplerConfig,
    ) -> Result<Self, InitError>
    where
        L: WakeLine + Send + 'static,
        C: CaptureChannel + Send + 'static,
        H: Handoff<Completion> + ?Sized + 'static,
    {
        let decoder = Dht11Decoder::new(config.bit_margin);
        Self::spawn_with_decoder(line, channel, decoder, handoff, config)
    }

    pub fn spawn_with_decoder<L, C, D, H>(
        line: L,
        channel: C,
        decoder: D,
        handoff: Arc<H>,
        config: SamplerConfig,
    ) -> Result<Self, InitError>
    where
        L: WakeLine + Send + 'static,
        C: CaptureChannel + Send + 'static,
        D: FrameDecoder + Send + 'static,
        H: Handoff<Completion> + ?Sized + 'static,
    {
        config.validate()?;

        let shared = Arc::new(Shared::new());
        let (wake_tx, wake_rx) = mpsc::channel();
        let offline_after = config.offline_after;
        let builder = thread::Builder::new()
            .name(config.task_name.to_string())
            .stack_size(config.task_stack);

        let sampler = Sampler::new(line, channel, decoder, handoff.clone(), shared.clone(), config);
        let worker = builder
            .spawn(move || sampler.run(wake_rx))
            .map_err(|err| {
                error!("sampling task creation failed: {err}");
                InitError::Task(err)
            })?;

        Ok(Self {
            shared,
            offline_after,
            wake: Some(wake_tx),
            cancel: Box::new(move || {
                handoff.offer(Completion::Cancel);
            }),
            worker: Some(worker),
        })
    }

    /// Latest validated reading, or the sentinel before the first one. Never blocks.
    pub fn read_latest(&self) -> DecodedReading {
        self.shared.cache.read()
    }

    pub fn latest(&self) -> Option<DecodedReading> {
        self.shared.cache.latest()
    }

    pub fn status(&self) -> SensorStatus {
        if past_offline_threshold(self.shared.consecutive_failures(), self.offline_after) {
            SensorStatus::Offline
        } else if self.shared.cache.latest().is_none() {
            SensorStatus::Pending
        } else {
            SensorStatus::Online
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.consecutive_failures()
    }

    /// Stops the sampling task and waits for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.shared.request_stop();
        // Wake the period sleep, then cut a pending bounded wait short.
        if let Some(wake) = self.wake.take() {
            let _ = wake.send(());
        }
        (self.cancel)();

        if worker.join().is_err() {
            error!("sampling task panicked");
        } else {
            info!("sensor stopped");
        }
    }
}

impl Drop for SensorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Free-function form of [`SensorHandle::read_latest`].
pub fn read_latest(handle: &SensorHandle) -> DecodedReading {
    handle.read_latest()
}
