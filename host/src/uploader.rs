//! ==============================================================================
//! uploader.rs - sample, post, repeat
//! ==============================================================================
//!
//! purpose:
//!     while uploads are active, wakes on a fixed time grid, samples the
//!     sensor and posts the reading to the telemetry endpoint.
//!
//! one cycle:
//!
//!     paced wait ─> sample ─> decide payload ─> network ready? ─> build
//!         ^                                                         │
//!         └──── log outcome <── indicator off <── send <── indicator on
//!
//! policy:
//!     fire-and-forget. the response is logged, never parsed. a failed
//!     upload is logged and the next cycle tries again with a fresh reading;
//!     nothing here ever ends the loop.
//!
//! pacing:
//!     cycles start on multiples of the interval measured from a monotonic
//!     origin, so slow uploads do not make the cadence drift. if a cycle
//!     overruns, the missed grid points are skipped.
//!
//!     deactivating during the wait cancels it right away. an upload that
//!     already started always runs to completion.
//!
//! relationships:
//!     - uses: http.rs (build_request), transport.rs (Transport)
//!     - uses: hal.rs (read_analog, is_network_ready)
//!     - uses: indicator.rs (led on while a request is in flight)
//!     - watches: activation.rs (ActivationState)
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::activation::ActivationState;
use crate::config::{EndpointConfig, HostConfig, NetworkConfig, UploadConfig};
use crate::error::TransportError;
use crate::hal::HardwareProvider;
use crate::http::{build_request, UploadPayload};
use crate::indicator::Indicator;
use crate::transport::Transport;

/// why a cycle ended without transmitting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SensorUnavailable,
    NetworkUnavailable,
}

/// result of one upload cycle; logged, then dropped
#[derive(Debug)]
pub enum CycleOutcome {
    Sent { response: String },
    Failed(TransportError),
    Skipped(SkipReason),
}

impl CycleOutcome {
    fn log(&self) {
        match self {
            Self::Sent { response } => {
                info!(bytes = response.len(), "...disconnected");
                debug!(%response, "endpoint reply");
            }
            Self::Failed(e) => {
                error!(code = ?e.code(), connection = e.is_connection(), error = %e, "upload failed");
            }
            Self::Skipped(reason) => warn!(?reason, "cycle skipped"),
        }
    }
}

/// `field=<reading>`, plus `status=<alert>` at or above the threshold
pub fn decide_payload(reading: f64, upload: &UploadConfig) -> UploadPayload {
    let payload = UploadPayload::new().with(upload.field.as_str(), reading.to_string());
    if reading >= upload.alert_threshold {
        payload.with("status", upload.alert_message.as_str())
    } else {
        payload
    }
}

/// First grid point strictly after `now`. Grid points are `origin + k * interval`.
pub fn next_tick(origin: Instant, now: Instant, interval: Duration) -> Instant {
    let step = interval.as_nanos().max(1);
    let elapsed = now.saturating_duration_since(origin).as_nanos();
    let ticks = elapsed / step + 1;
    origin + Duration::from_nanos(u64::try_from(ticks * step).unwrap_or(u64::MAX))
}

pub struct Uploader<T> {
    endpoint: EndpointConfig,
    upload: UploadConfig,
    network: NetworkConfig,
    transport: T,
    hal: Arc<dyn HardwareProvider>,
    indicator: Arc<Indicator>,
    origin: Instant,
}

impl<T: Transport> Uploader<T> {
    pub fn new(
        config: &HostConfig,
        transport: T,
        hal: Arc<dyn HardwareProvider>,
        indicator: Arc<Indicator>,
    ) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            upload: config.upload.clone(),
            network: config.network.clone(),
            transport,
            hal,
            indicator,
            origin: Instant::now(),
        }
    }

    /// Upload while active, idle while inactive. Returns when the activation
    /// source goes away.
    pub async fn run(&self, mut activation: watch::Receiver<ActivationState>) {
        loop {
            if activation.wait_for(|state| state.is_active()).await.is_err() {
                debug!("activation source closed");
                return;
            }
            info!(interval_ms = self.upload.interval_ms, "uploads active");

            loop {
                tokio::select! {
                    _ = self.paced_wait() => {}
                    changed = activation.wait_for(|state| !state.is_active()) => {
                        if changed.is_err() {
                            return;
                        }
                        break;
                    }
                }

                if !activation.borrow().is_active() {
                    break;
                }
                self.run_cycle().await;
            }

            info!("uploads paused");
        }
    }

    /// Sleep until the next grid point; returns it.
    pub async fn paced_wait(&self) -> Instant {
        let tick = next_tick(self.origin, Instant::now(), self.upload.interval());
        sleep_until(tick).await;
        tick
    }

    /// Sample, build, transmit. Never panics on transport failure.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let outcome = self.transmit_reading().await;
        outcome.log();
        outcome
    }

    async fn transmit_reading(&self) -> CycleOutcome {
        let reading = match self.hal.read_analog() {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "sensor read failed");
                return CycleOutcome::Skipped(SkipReason::SensorUnavailable);
            }
        };
        let payload = decide_payload(reading, &self.upload);

        if !self.wait_for_network().await {
            return CycleOutcome::Skipped(SkipReason::NetworkUnavailable);
        }

        let request = build_request(&self.endpoint.host, &self.endpoint.api_key, &payload);
        info!(
            reading,
            fields = payload.len(),
            body = %payload,
            "connecting to {}:{}",
            self.endpoint.host,
            self.endpoint.port
        );

        // lit for exactly the span of the transport call
        self.indicator.set_transmitting(true);
        let result = self
            .transport
            .send_request(&self.endpoint.host, self.endpoint.port, &request)
            .await;
        self.indicator.set_transmitting(false);

        match result {
            Ok(response) => CycleOutcome::Sent { response },
            Err(e) => CycleOutcome::Failed(e),
        }
    }

    async fn wait_for_network(&self) -> bool {
        let deadline = Instant::now() + Duration::from_millis(self.network.ready_timeout_ms);
        let poll = Duration::from_millis(self.network.poll_ms.max(1));
        loop {
            if self.hal.is_network_ready() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            debug!("waiting for network");
            sleep(poll).await;
        }
    }
}
