//! ==============================================================================
//! indicator.rs - single owner of the onboard led
//! ==============================================================================
//!
//! purpose:
//!     two things drive the led: the uploader lights it while a request is in
//!     flight, and the activation task blinks it on every button edge. both
//!     go through `Indicator` so the led always settles on the right level.
//!
//! rule:
//!     the resting level of the led is "is a request in flight". a blink
//!     never restores a snapshot taken before it started; it ends by writing
//!     the current transmit state. the transmit flag and the final writes
//!     share one lock, so whichever side writes last writes the right value.
//!
//! relationships:
//!     - used by: uploader.rs (set_transmitting around the send)
//!     - used by: activation.rs (blink on every edge)
//!     - drives: hal.rs (HardwareProvider::set_indicator)
//!
//! ==============================================================================

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use crate::hal::HardwareProvider;

pub struct Indicator {
    hal: Arc<dyn HardwareProvider>,
    transmitting: Mutex<bool>,
}

impl Indicator {
    pub fn new(hal: Arc<dyn HardwareProvider>) -> Self {
        Self { hal, transmitting: Mutex::new(false) }
    }

    /// Mark a request as in flight (or finished) and show it.
    pub fn set_transmitting(&self, on: bool) {
        let mut transmitting = self.lock();
        *transmitting = on;
        self.write(on);
    }

    #[cfg(test)]
    pub fn is_transmitting(&self) -> bool {
        *self.lock()
    }

    /// `count` on/off cycles of `period` each, then back to the resting level
    pub async fn blink(&self, count: u32, period: Duration) {
        debug!(count, lit = self.hal.indicator(), "blinking indicator");
        self.write(false);
        for _ in 0..count {
            self.write(true);
            tokio::time::sleep(period).await;
            self.write(false);
            tokio::time::sleep(period).await;
        }

        let transmitting = self.lock();
        self.write(*transmitting);
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        // a bool cannot be left half-written
        self.transmitting.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self, on: bool) {
        if let Err(e) = self.hal.set_indicator(on) {
            warn!(error = %e, "indicator write failed");
        }
    }
}
