//! ==============================================================================
//! main.rs - telemetry relay entry point
//! ==============================================================================
//!
//! purpose:
//!     samples an analog sensor and posts each reading to a ThingSpeak-style
//!     `/update` endpoint over a raw tcp socket. a button toggles uploading
//!     on and off; the onboard led blinks on every press and stays lit while
//!     a request is in flight.
//!
//! responsibilities:
//!     - load and validate configuration (config/host.toml)
//!     - initialize logging
//!     - pick the hardware provider (mock, or rppal with --features hardware)
//!     - wire button edges into the activation task
//!     - run the upload loop until ctrl-c
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    relay host (this file)                    │
//!     │  ┌──────────────┐   watch flag    ┌──────────────────────┐  │
//!     │  │ activation   │ ──────────────> │ uploader             │  │
//!     │  │ task         │                 │ (paced upload loop)  │  │
//!     │  └──────▲───────┘                 └──────────┬───────────┘  │
//!     │         │ edge signals                       │              │
//!     │  ┌──────┴───────┐                 ┌──────────┴───────────┐  │
//!     │  │ hal.rs       │ <── led/adc ─── │ http.rs + transport  │  │
//!     │  │ (button irq) │                 │ (POST /update)       │  │
//!     │  └──────────────┘                 └──────────┬───────────┘  │
//!     └──────────────────────────────────────────────┼──────────────┘
//!                                                    │ tcp :80
//!                                                    ▼
//!                                           telemetry endpoint
//!
//! ==============================================================================

mod activation;
mod config;
mod error;
mod hal;
mod http;
mod indicator;
mod transport;
mod uploader;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::activation::{Activation, ActivationSwitch};
use crate::config::{ConfigOrigin, HostConfig};
use crate::indicator::Indicator;
use crate::transport::SocketTransport;
use crate::uploader::Uploader;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration (logging level comes from it)
    let (config, origin) = HostConfig::load_or_default()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .init();

    match &origin {
        ConfigOrigin::File(path) => info!("[CONFIG] Loaded from {}", path.display()),
        ConfigOrigin::Defaults => tracing::warn!("[CONFIG] No config file found - using defaults"),
    }
    config.validate()?;
    config.log_summary();

    // step 2: hardware
    let hal = hal::init(&config)?;
    let indicator = Arc::new(Indicator::new(hal.clone()));
    indicator.set_transmitting(false);

    // step 3: activation state machine, fed by button edges
    let switch = ActivationSwitch::new();
    let activation_state = switch.subscribe();
    let (edges, edge_rx) = activation::edge_channel();
    let activation = Activation::new(switch, indicator.clone(), &config.indicator);
    tokio::spawn(activation.run(edge_rx));
    hal.subscribe_edges(edges)?;

    // step 4: upload loop
    let transport = SocketTransport::from_config(&config.transport);
    let uploader = Uploader::new(&config, transport, hal.clone(), indicator.clone());
    info!("[RUNTIME] Waiting for button press to start uploading");

    tokio::select! {
        _ = uploader.run(activation_state) => {
            info!("[RUNTIME] Activation source closed");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("[RUNTIME] Shutdown requested");
        }
    }

    // an upload cut short by ctrl-c never cleared it
    indicator.set_transmitting(false);
    Ok(())
}
