// main.rs
// DHT11 on an ESP32-C6, sampled through the RMT receiver.
//
// Pin map:
// DHT11 DATA = GPIO1 (override with DHT11_GPIO at build time), 4.7k pull-up to 3V3
//
// Host builds run the same pipeline against a simulated sensor.

use anyhow::Result;
use log::info;

use std::thread;

use dht11_rmt::{read_latest, SamplerConfig};

#[cfg(target_os = "espidf")]
fn main() -> Result<()> {
    use dht11_rmt::{config, esp, SensorStatus};
    use esp_idf_hal::gpio::AnyIOPin;
    use esp_idf_svc::log::EspLogger;
    use esp_idf_sys as sys;
    use log::warn;
    use std::time::Duration;

    const REPORT_INTERVAL: Duration = Duration::from_secs(10);

    sys::link_patches();
    EspLogger::initialize_default();

    let gpio = config::dht_gpio();
    info!("DHT11 on GPIO{gpio}");

    // The pin number is configured at build time; nothing else claims it.
    let pin = unsafe { AnyIOPin::new(gpio) };
    let sensor = esp::init(pin, SamplerConfig::from_env())?;

    loop {
        thread::sleep(REPORT_INTERVAL);
        let reading = read_latest(&sensor);
        match sensor.status() {
            SensorStatus::Online => info!(
                "T={:.1}°C RH={}%",
                reading.temperature.celsius(),
                reading.humidity
            ),
            SensorStatus::Pending => info!("waiting for first reading"),
            SensorStatus::Offline => warn!(
                "sensor offline ({} failed cycles), last value {reading}",
                sensor.consecutive_failures()
            ),
        }
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<()> {
    use dht11_rmt::capture::Completion;
    use dht11_rmt::handoff::SlotHandoff;
    use dht11_rmt::sim::{Response, SimSensor};
    use dht11_rmt::SensorHandle;
    use std::sync::Arc;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let sensor = SimSensor::new();
    sensor.push(Response::Silent);
    sensor.push(Response::Corrupted {
        humidity: 0x3700,
        temperature: 0x1A03,
    });
    sensor.repeat(Response::Reading {
        humidity: 0x3700,
        temperature: 0x1A03,
    });

    let handoff = Arc::new(SlotHandoff::<Completion>::new());
    let config = SamplerConfig::from_env();
    let period = config.period;
    let handle = SensorHandle::spawn(sensor.line(), sensor.channel(handoff.clone()), handoff, config)?;

    for _ in 0..4 {
        thread::sleep(period);
        info!("{:?}: {}", handle.status(), read_latest(&handle));
    }

    handle.shutdown();
    Ok(())
}
