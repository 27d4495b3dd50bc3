//! ESP-IDF bindings: GPIO wake line, RMT receive channel and the
//! FreeRTOS queue between the RMT interrupt and the sampling task.

use core::ffi::c_void;
use core::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use esp_idf_hal::delay::{Ets, TickType};
use esp_idf_hal::gpio::{AnyIOPin, Pin};
use esp_idf_hal::sys::EspError;
use esp_idf_hal::task::queue::Queue;
use esp_idf_sys as sys;
use log::{info, warn};

use crate::capture::{on_capture_done, CaptureChannel, Completion};
use crate::config::{CaptureConfig, SamplerConfig};
use crate::handoff::Handoff;
use crate::pulse::RawFrame;
use crate::sensor::{InitError, SensorHandle};
use crate::trigger::WakeLine;

/// Open-drain style data line: driven for the wake pulse, released to the
/// pull-up while the RMT channel listens on the same pin.
pub struct EspWakeLine {
    _pin: AnyIOPin,
    gpio: sys::gpio_num_t,
}

impl EspWakeLine {
    pub fn new(pin: AnyIOPin) -> Result<Self, EspError> {
        let gpio = pin.pin() as sys::gpio_num_t;
        unsafe {
            sys::esp!(sys::gpio_reset_pin(gpio))?;
            sys::esp!(sys::gpio_pullup_en(gpio))?;
            sys::esp!(sys::gpio_set_level(gpio, 1))?;
        }
        Ok(Self { _pin: pin, gpio })
    }

    pub fn gpio(&self) -> sys::gpio_num_t {
        self.gpio
    }
}

impl WakeLine for EspWakeLine {
    type Error = EspError;

    fn set_output(&mut self) -> Result<(), Self::Error> {
        sys::esp!(unsafe { sys::gpio_set_direction(self.gpio, sys::gpio_mode_t_GPIO_MODE_OUTPUT) })
    }

    fn set_input(&mut self) -> Result<(), Self::Error> {
        sys::esp!(unsafe { sys::gpio_set_direction(self.gpio, sys::gpio_mode_t_GPIO_MODE_INPUT) })
    }

    fn set_level(&mut self, high: bool) -> Result<(), Self::Error> {
        sys::esp!(unsafe { sys::gpio_set_level(self.gpio, u32::from(high)) })
    }

    fn delay_us(&mut self, us: u32) {
        Ets::delay_us(us);
    }
}

/// Depth-1 FreeRTOS queue. Safe to offer from interrupt context.
pub struct QueueHandoff {
    queue: Queue<Completion>,
    overwritten: AtomicU32,
}

impl QueueHandoff {
    pub fn new() -> Self {
        Self {
            queue: Queue::new(1),
            overwritten: AtomicU32::new(0),
        }
    }
}

impl Default for QueueHandoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Handoff<Completion> for QueueHandoff {
    fn offer(&self, item: Completion) -> bool {
        if let Ok(woken) = self.queue.send_back(item, 0) {
            return woken;
        }
        // Full: drop the pending item so the newest one wins.
        self.overwritten.fetch_add(1, Ordering::Relaxed);
        let drained = self.queue.recv_front(0).map_or(false, |(_, woken)| woken);
        self.queue.send_back(item, 0).unwrap_or(false) || drained
    }

    fn take(&self, timeout: Duration) -> Option<Completion> {
        let ticks = TickType::new_millis(timeout.as_millis() as u64).ticks();
        self.queue.recv_front(ticks).map(|(item, _)| item)
    }

    fn overwritten(&self) -> u32 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

unsafe extern "C" fn on_recv_done(
    _channel: sys::rmt_channel_handle_t,
    edata: *const sys::rmt_rx_done_event_data_t,
    user_ctx: *mut c_void,
) -> bool {
    if edata.is_null() || user_ctx.is_null() {
        return false;
    }
    let handoff = &*(user_ctx as *const QueueHandoff);
    // The symbols are already in the channel's buffer; the task copies them out.
    on_capture_done(handoff, (*edata).num_symbols)
}

/// RMT receive channel that posts every finished capture into a [`QueueHandoff`].
pub struct RmtCapture {
    channel: sys::rmt_channel_handle_t,
    receive: sys::rmt_receive_config_t,
    buffer: Box<[u32]>,
    // Keeps the callback context alive for as long as the channel exists.
    _handoff: Arc<QueueHandoff>,
}

// The channel handle is only touched by the task that owns the capture.
unsafe impl Send for RmtCapture {}

impl RmtCapture {
    pub fn new(
        gpio: sys::gpio_num_t,
        config: &CaptureConfig,
        handoff: Arc<QueueHandoff>,
    ) -> Result<Self, EspError> {
        let channel_config = sys::rmt_rx_channel_config_t {
            gpio_num: gpio,
            clk_src: sys::soc_periph_rmt_clk_src_t_RMT_CLK_SRC_DEFAULT,
            resolution_hz: config.resolution_hz,
            mem_block_symbols: config.max_symbols,
            ..Default::default()
        };

        let mut channel: sys::rmt_channel_handle_t = ptr::null_mut();
        sys::esp!(unsafe { sys::rmt_new_rx_channel(&channel_config, &mut channel) })?;

        let callbacks = sys::rmt_rx_event_callbacks_t {
            on_recv_done: Some(on_recv_done),
        };
        let registered = sys::esp!(unsafe {
            sys::rmt_rx_register_event_callbacks(
                channel,
                &callbacks,
                Arc::as_ptr(&handoff) as *mut c_void,
            )
        })
        .and_then(|()| sys::esp!(unsafe { sys::rmt_enable(channel) }));
        if let Err(err) = registered {
            unsafe { sys::rmt_del_channel(channel) };
            return Err(err);
        }

        info!(
            "RMT rx on GPIO{gpio}: {}Hz, {} symbols",
            config.resolution_hz, config.max_symbols
        );

        Ok(Self {
            channel,
            receive: sys::rmt_receive_config_t {
                signal_range_min_ns: config.min_pulse_ns,
                signal_range_max_ns: config.max_pulse_ns,
                ..Default::default()
            },
            buffer: vec![0u32; config.max_symbols].into_boxed_slice(),
            _handoff: handoff,
        })
    }
}

impl CaptureChannel for RmtCapture {
    type Error = EspError;

    fn arm(&mut self) -> Result<(), Self::Error> {
        sys::esp!(unsafe {
            sys::rmt_receive(
                self.channel,
                self.buffer.as_mut_ptr() as *mut c_void,
                self.buffer.len() * core::mem::size_of::<u32>(),
                &self.receive,
            )
        })
    }

    fn frame(&self, len: usize) -> RawFrame {
        // rmt_symbol_word_t is a single 32 bit word.
        RawFrame::from_words(&self.buffer[..len.min(self.buffer.len())])
    }

    fn disarm(&mut self) -> Result<(), Self::Error> {
        // Re-enabling drops a receive that never finished.
        sys::esp!(unsafe { sys::rmt_disable(self.channel) })?;
        sys::esp!(unsafe { sys::rmt_enable(self.channel) })
    }
}

impl Drop for RmtCapture {
    fn drop(&mut self) {
        unsafe {
            sys::rmt_disable(self.channel);
            if let Err(err) = sys::esp!(sys::rmt_del_channel(self.channel)) {
                warn!("deleting RMT channel failed: {err}");
            }
        }
    }
}

/// Sets up the data line, the RMT channel and the handoff queue, then starts
/// the sampling task.
pub fn init(pin: AnyIOPin, config: SamplerConfig) -> Result<SensorHandle, InitError> {
    config.validate()?;

    let line = EspWakeLine::new(pin).map_err(|err| InitError::resource("data line GPIO", err))?;
    let handoff = Arc::new(QueueHandoff::new());
    let channel = RmtCapture::new(line.gpio(), &config.capture, handoff.clone())
        .map_err(|err| InitError::resource("RMT rx channel", err))?;

    SensorHandle::spawn(line, channel, handoff, config)
}
