//! ==============================================================================
//! activation.rs - button-driven on/off switch for uploads
//! ==============================================================================
//!
//! purpose:
//!     every edge on the button flips uploads between Inactive and Active
//!     (initially Inactive) and blinks the indicator so the user sees the
//!     press was registered.
//!
//! flow:
//!
//!     interrupt thread             activation task                uploader
//!     ────────────────             ───────────────                ────────
//!     EdgeHandle::on_edge_signal ─> recv EdgeSignal
//!       (non-blocking send)          toggle watch flag ─────────>  wait_for(active)
//!                                    blink indicator (indicator.rs)
//!
//!     the interrupt side only pushes into an unbounded channel; all state
//!     changes happen on the activation task, one signal at a time, in the
//!     order they were delivered.
//!
//! relationships:
//!     - edge source: hal.rs (HardwareProvider::subscribe_edges)
//!     - blinks: indicator.rs (Indicator::blink)
//!     - observed by: uploader.rs (watch::Receiver<ActivationState>)
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::IndicatorConfig;
use crate::hal;
use crate::indicator::Indicator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationState {
    #[default]
    Inactive,
    Active,
}

impl ActivationState {
    pub fn toggled(self) -> Self {
        match self {
            Self::Inactive => Self::Active,
            Self::Active => Self::Inactive,
        }
    }

    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

/// one button edge
#[derive(Debug, Clone, Copy)]
pub struct EdgeSignal {
    /// unix epoch milliseconds at delivery
    pub timestamp_ms: u64,
}

/// Cloneable sending side handed to the interrupt source.
#[derive(Debug, Clone)]
pub struct EdgeHandle {
    tx: mpsc::UnboundedSender<EdgeSignal>,
}

impl EdgeHandle {
    /// Safe to call from any thread, never blocks.
    /// Returns false once the activation task is gone.
    pub fn on_edge_signal(&self) -> bool {
        self.tx
            .send(EdgeSignal { timestamp_ms: hal::timestamp_ms() })
            .is_ok()
    }
}

pub fn edge_channel() -> (EdgeHandle, mpsc::UnboundedReceiver<EdgeSignal>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EdgeHandle { tx }, rx)
}

/// Owner of the activation flag. Only this type writes it.
#[derive(Debug)]
pub struct ActivationSwitch {
    state: watch::Sender<ActivationState>,
}

impl Default for ActivationSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivationSwitch {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ActivationState::Inactive);
        Self { state }
    }

    /// Flip the flag and return the new state.
    pub fn toggle(&self) -> ActivationState {
        let mut next = ActivationState::Inactive;
        self.state.send_modify(|state| {
            *state = state.toggled();
            next = *state;
        });
        next
    }

    pub fn state(&self) -> ActivationState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ActivationState> {
        self.state.subscribe()
    }
}

/// The state machine: consumes edge signals, toggles, blinks.
pub struct Activation {
    switch: ActivationSwitch,
    indicator: Arc<Indicator>,
    blink_count: u32,
    blink_period: Duration,
}

impl Activation {
    pub fn new(switch: ActivationSwitch, indicator: Arc<Indicator>, config: &IndicatorConfig) -> Self {
        Self {
            switch,
            indicator,
            blink_count: config.blink_count,
            blink_period: Duration::from_millis(config.blink_ms),
        }
    }

    /// Process edge signals until every `EdgeHandle` is dropped.
    pub async fn run(self, mut edges: mpsc::UnboundedReceiver<EdgeSignal>) {
        while let Some(signal) = edges.recv().await {
            self.handle(signal).await;
        }
        debug!("edge source closed, activation task exiting");
    }

    pub async fn handle(&self, signal: EdgeSignal) -> ActivationState {
        let next = self.switch.toggle();
        info!(at_ms = signal.timestamp_ms, state = ?next, "button edge");
        self.indicator.blink(self.blink_count, self.blink_period).await;
        next
    }

    #[cfg(test)]
    pub fn state(&self) -> ActivationState {
        self.switch.state()
    }
}
