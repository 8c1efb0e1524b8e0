//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - EndpointConfig: Where readings go (host, port, write API key).
//!     - UploadConfig: Upload cadence and the alert threshold/message.
//!     - TransportConfig: Socket timeout and read buffer size.
//!     - NetworkConfig: How long to wait for the network before skipping a cycle.
//!     - IndicatorConfig: Blink sequence shown on every button edge.
//!     - PinsConfig: ADC channel and GPIO pins (hardware builds only).
//!
//!     every section is optional; missing keys take the defaults below,
//!     which mirror the constants the device shipped with.
//!
//! ==============================================================================

use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub endpoint: EndpointConfig,
    pub upload: UploadConfig,
    pub transport: TransportConfig,
    pub network: NetworkConfig,
    pub indicator: IndicatorConfig,
    #[cfg_attr(not(feature = "hardware"), allow(dead_code))]
    pub pins: PinsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub interval_ms: u64,
    /// channel field the reading is written to
    pub field: String,
    /// readings at or above this value also carry the alert status
    pub alert_threshold: f64,
    pub alert_message: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    pub timeout_seconds: u64,
    pub buffer_size: usize,
    /// longer responses are truncated
    pub max_response_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub poll_ms: u64,
    pub ready_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndicatorConfig {
    pub blink_count: u32,
    pub blink_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
pub struct PinsConfig {
    /// MCP3008 input the sensor is wired to
    pub adc_channel: u8,
    pub led_gpio: u8,
    pub button_gpio: u8,
    pub button_debounce_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "184.106.153.149".to_string(),
            port: 80,
            api_key: String::new(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            field: "field1".to_string(),
            alert_threshold: 500.0,
            alert_message: "Someone is in your room!!!".to_string(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { timeout_seconds: 30, buffer_size: 1024, max_response_bytes: 64 * 1024 }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { poll_ms: 500, ready_timeout_ms: 10_000 }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self { blink_count: 10, blink_ms: 50 }
    }
}

impl Default for PinsConfig {
    fn default() -> Self {
        Self { adc_channel: 2, led_gpio: 17, button_gpio: 27, button_debounce_ms: 20 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// where the active configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    File(PathBuf),
    Defaults,
}

impl UploadConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: HostConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load the first config file found, or the defaults when there is none.
    ///
    /// a file that exists but does not parse is an error, not a silent
    /// fallback: uploading to the default endpoint with no key is never
    /// what the operator wanted.
    pub fn load_or_default() -> Result<(Self, ConfigOrigin)> {
        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];

        for path in paths {
            if path.exists() {
                let config = Self::load(&path)?;
                return Ok((config, ConfigOrigin::File(path)));
            }
        }

        Ok((Self::default(), ConfigOrigin::Defaults))
    }

    /// Reject values the upload loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.host.trim().is_empty() {
            bail!("endpoint.host must not be empty");
        }
        if self.upload.interval_ms == 0 {
            bail!("upload.interval_ms must be greater than zero");
        }
        if self.transport.timeout_seconds == 0 {
            bail!("transport.timeout_seconds must be greater than zero");
        }
        if self.transport.buffer_size == 0 {
            bail!("transport.buffer_size must be greater than zero");
        }
        if self.transport.max_response_bytes == 0 {
            bail!("transport.max_response_bytes must be greater than zero");
        }
        if self.endpoint.api_key.is_empty() {
            tracing::warn!("endpoint.api_key is empty; the endpoint will most likely reject updates");
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        let key = if self.endpoint.api_key.is_empty() { "<unset>" } else { "<set>" };
        tracing::info!(
            endpoint = %format!("{}:{}", self.endpoint.host, self.endpoint.port),
            api_key = key,
            interval_ms = self.upload.interval_ms,
            threshold = self.upload.alert_threshold,
            timeout_s = self.transport.timeout_seconds,
            log_level = %self.logging.level,
            "host configuration"
        );
    }
}
