//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     the only place that touches the board. the rest of the host sees the
//!     sensor, the indicator led, the network state and the button through
//!     the `HardwareProvider` trait.
//!
//! design philosophy:
//!     - "Compile Anywhere": the default build uses MockHal and runs on any
//!       machine (press Enter to simulate the button).
//!     - feature "hardware": PiHal drives a Raspberry Pi through `rppal`
//!       (MCP3008 adc on SPI0/CE0, led on a gpio output, button on a gpio
//!       input with an async interrupt on both edges).
//!
//! relationships:
//!     - used by: uploader.rs (read_analog, is_network_ready)
//!     - used by: indicator.rs (set_indicator, indicator)
//!     - used by: activation.rs (timestamp_ms)
//!     - feeds: activation.rs (EdgeHandle, from subscribe_edges)
//!
//! ==============================================================================

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::activation::EdgeHandle;
use crate::config::HostConfig;

pub trait HardwareProvider: Send + Sync {
    /// one sample on the sensor's raw scale (0-1023)
    fn read_analog(&self) -> Result<f64>;
    fn set_indicator(&self, on: bool) -> Result<()>;
    /// current indicator level
    fn indicator(&self) -> bool;
    fn is_network_ready(&self) -> bool;
    /// start delivering button edges to `edges`
    fn subscribe_edges(&self, edges: EdgeHandle) -> Result<()>;
}

/// get current timestamp in milliseconds (unix epoch)
pub fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// pick the provider for this build
#[cfg(not(feature = "hardware"))]
pub fn init(_config: &HostConfig) -> Result<Arc<dyn HardwareProvider>> {
    Ok(Arc::new(MockHal::new()))
}

#[cfg(feature = "hardware")]
pub fn init(config: &HostConfig) -> Result<Arc<dyn HardwareProvider>> {
    Ok(Arc::new(pi::PiHal::new(&config.pins)?))
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For development machines and tests)
// ==============================================================================================

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "hardware", allow(dead_code))]
enum MockReading {
    /// walks the adc range in uneven steps so both sides of the threshold show up
    Sweep(u32),
    Fixed(f64),
    Fault,
}

#[cfg_attr(feature = "hardware", allow(dead_code))]
pub struct MockHal {
    reading: Mutex<MockReading>,
    indicator: AtomicBool,
    indicator_writes: AtomicUsize,
    network_ready: AtomicBool,
}

// constructors and knobs beyond new() are for tests
#[allow(dead_code)]
impl MockHal {
    pub fn new() -> Self {
        tracing::info!("Using MOCK HAL (No hardware access)");
        Self::with(MockReading::Sweep(0))
    }

    /// every read returns `value`
    pub fn with_reading(value: f64) -> Self {
        Self::with(MockReading::Fixed(value))
    }

    fn with(reading: MockReading) -> Self {
        Self {
            reading: Mutex::new(reading),
            indicator: AtomicBool::new(false),
            indicator_writes: AtomicUsize::new(0),
            network_ready: AtomicBool::new(true),
        }
    }

    pub fn set_reading(&self, value: f64) {
        if let Ok(mut reading) = self.reading.lock() {
            *reading = MockReading::Fixed(value);
        }
    }

    /// make every following read fail
    pub fn set_sensor_fault(&self) {
        if let Ok(mut reading) = self.reading.lock() {
            *reading = MockReading::Fault;
        }
    }

    pub fn set_network_ready(&self, ready: bool) {
        self.network_ready.store(ready, Ordering::SeqCst);
    }

    pub fn indicator_writes(&self) -> usize {
        self.indicator_writes.load(Ordering::SeqCst)
    }
}

impl Default for MockHal {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareProvider for MockHal {
    fn read_analog(&self) -> Result<f64> {
        let mut reading = self
            .reading
            .lock()
            .map_err(|_| anyhow!("mock sensor lock poisoned"))?;
        let value = match *reading {
            MockReading::Sweep(step) => {
                *reading = MockReading::Sweep(step.wrapping_add(1));
                f64::from(step.wrapping_mul(197) % 1024)
            }
            MockReading::Fixed(value) => value,
            MockReading::Fault => anyhow::bail!("mock sensor fault"),
        };
        tracing::debug!("[MOCK ADC] Read {}", value);
        Ok(value)
    }

    fn set_indicator(&self, on: bool) -> Result<()> {
        self.indicator.store(on, Ordering::SeqCst);
        self.indicator_writes.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("[MOCK LED] {}", if on { "ON" } else { "OFF" });
        Ok(())
    }

    fn indicator(&self) -> bool {
        self.indicator.load(Ordering::SeqCst)
    }

    fn is_network_ready(&self) -> bool {
        self.network_ready.load(Ordering::SeqCst)
    }

    fn subscribe_edges(&self, edges: EdgeHandle) -> Result<()> {
        tracing::info!("[MOCK BUTTON] Press Enter to toggle uploads");
        std::thread::Builder::new()
            .name("mock-button".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                let mut line = String::new();
                while matches!(stdin.read_line(&mut line), Ok(n) if n > 0) {
                    line.clear();
                    if !edges.on_edge_signal() {
                        break;
                    }
                }
            })?;
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
mod pi {
    use super::*;
    use crate::config::PinsConfig;
    use rppal::gpio::{Event, Gpio, InputPin, OutputPin, Trigger};
    use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
    use std::time::Duration;

    pub struct PiHal {
        adc: Mutex<Spi>,
        adc_channel: u8,
        led: Mutex<OutputPin>,
        // held so the interrupt stays registered
        button: Mutex<InputPin>,
        debounce: Option<Duration>,
    }

    impl PiHal {
        pub fn new(pins: &PinsConfig) -> Result<Self> {
            tracing::info!("Using REAL HARDWARE HAL (rppal)");
            if pins.adc_channel > 7 {
                anyhow::bail!("MCP3008 has channels 0-7, got {}", pins.adc_channel);
            }

            let gpio = Gpio::new()?;
            let led = gpio.get(pins.led_gpio)?.into_output_low();
            let button = gpio.get(pins.button_gpio)?.into_input_pullup();
            let adc = Spi::new(Bus::Spi0, SlaveSelect::Ss0, 1_000_000, Mode::Mode0)?;

            Ok(Self {
                adc: Mutex::new(adc),
                adc_channel: pins.adc_channel,
                led: Mutex::new(led),
                button: Mutex::new(button),
                debounce: (pins.button_debounce_ms > 0)
                    .then(|| Duration::from_millis(pins.button_debounce_ms)),
            })
        }
    }

    impl HardwareProvider for PiHal {
        fn read_analog(&self) -> Result<f64> {
            let spi = self.adc.lock().map_err(|_| anyhow!("adc lock poisoned"))?;
            // start bit, single-ended + channel, then clock out 10 bits
            let write = [0x01, (0x08 | self.adc_channel) << 4, 0x00];
            let mut read = [0u8; 3];
            spi.transfer(&mut read, &write)?;
            let raw = (u16::from(read[1] & 0x03) << 8) | u16::from(read[2]);
            Ok(f64::from(raw))
        }

        fn set_indicator(&self, on: bool) -> Result<()> {
            let mut led = self.led.lock().map_err(|_| anyhow!("led lock poisoned"))?;
            if on { led.set_high(); } else { led.set_low(); }
            Ok(())
        }

        fn indicator(&self) -> bool {
            self.led.lock().map(|led| led.is_set_high()).unwrap_or(false)
        }

        fn is_network_ready(&self) -> bool {
            interface_up()
        }

        fn subscribe_edges(&self, edges: EdgeHandle) -> Result<()> {
            let mut button = self.button.lock().map_err(|_| anyhow!("button lock poisoned"))?;
            button.set_async_interrupt(Trigger::Both, self.debounce, move |_event: Event| {
                edges.on_edge_signal();
            })?;
            Ok(())
        }
    }

    /// any non-loopback interface reporting operstate "up"
    fn interface_up() -> bool {
        let Ok(entries) = std::fs::read_dir("/sys/class/net") else {
            return false;
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name() != "lo")
            .any(|entry| {
                std::fs::read_to_string(entry.path().join("operstate"))
                    .map(|state| state.trim() == "up")
                    .unwrap_or(false)
            })
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp() {
        let ts = timestamp_ms();
        // should be after 2024
        assert!(ts > 1700000000000, "timestamp should be after 2024");
    }

    #[test]
    fn test_sweep_stays_in_adc_range_and_crosses_threshold() {
        let hal = MockHal::new();
        let values: Vec<f64> = (0..32).map(|_| hal.read_analog().unwrap()).collect();
        assert!(values.iter().all(|v| (0.0..1024.0).contains(v)));
        assert!(values.iter().any(|v| *v >= 500.0));
        assert!(values.iter().any(|v| *v < 500.0));
    }

    #[test]
    fn test_fixed_reading_and_fault() {
        let hal = MockHal::with_reading(612.0);
        assert_eq!(hal.read_analog().unwrap(), 612.0);
        hal.set_reading(12.0);
        assert_eq!(hal.read_analog().unwrap(), 12.0);
        hal.set_sensor_fault();
        assert!(hal.read_analog().is_err());
    }

    #[test]
    fn test_indicator_tracks_writes() {
        let hal = MockHal::with_reading(0.0);
        assert!(!hal.indicator());
        hal.set_indicator(true).unwrap();
        assert!(hal.indicator());
        hal.set_indicator(false).unwrap();
        assert!(!hal.indicator());
        assert_eq!(hal.indicator_writes(), 2);
    }

    #[test]
    fn test_network_ready_toggle() {
        let hal = MockHal::with_reading(0.0);
        assert!(hal.is_network_ready());
        hal.set_network_ready(false);
        assert!(!hal.is_network_ready());
    }
}
