//! Configuration management for Triton
//!
//! This module handles loading, validation, and management of the user
//! configuration from YAML files with support for environment variable
//! overrides and debounced hot reload.

use crate::error::{Result, TritonError};
use serde::{Deserialize, Serialize};
use std::path::Path;

mod defaults;
pub mod watcher;

fn default_true() -> bool {
    true
}

/// Controller variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerType {
    IntelliCenter,
    IntelliTouch,
    EasyTouch,
    SunTouch,
    IntelliCom,
    AquaLink,
    Standalone,
}

impl ControllerType {
    /// Lowercase tag used in config files, error payloads, and logs
    pub fn tag(&self) -> &'static str {
        match self {
            ControllerType::IntelliCenter => "intellicenter",
            ControllerType::IntelliTouch => "intellitouch",
            ControllerType::EasyTouch => "easytouch",
            ControllerType::SunTouch => "suntouch",
            ControllerType::IntelliCom => "intellicom",
            ControllerType::AquaLink => "aqualink",
            ControllerType::Standalone => "standalone",
        }
    }
}

impl std::fmt::Display for ControllerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Controller and bus communication configuration
    pub controller: ControllerConfig,

    /// Site location for sunrise/sunset schedules
    pub location: LocationConfig,

    /// Logging configuration
    pub log: LogSection,

    /// Persistent data configuration
    pub data: DataConfig,

    /// Delay manager tunables
    pub delays: DelaysConfig,
}

/// Controller section: variant tag, primary bus, auxiliary ports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Controller variant on the primary port
    #[serde(rename = "type")]
    pub controller_type: ControllerType,

    /// Primary port communication parameters
    pub comms: CommsConfig,

    /// Additional RS-485 ports (id 1..N)
    pub aux_ports: Vec<AuxPortConfig>,
}

/// Communication parameters for one RS-485 endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommsConfig {
    /// Use a TCP-bridged serial server instead of a local device
    pub net_connect: bool,

    /// Host of the serial-over-TCP bridge
    pub net_host: String,

    /// TCP port of the serial-over-TCP bridge
    pub net_port: u16,

    /// Local serial device path
    pub rs485_port: String,

    /// Baud rate
    pub baud_rate: u32,

    /// Data bits (5-8)
    pub data_bits: u8,

    /// Parity (none, even, odd)
    pub parity: String,

    /// Stop bits (1 or 2)
    pub stop_bits: u8,

    /// Flow control (none, software, hardware)
    pub flow_control: String,

    /// Minimum bus-quiet interval before transmit, in milliseconds
    pub idle_before_tx_ms: u64,

    /// Gap after the previous transmit completes, in milliseconds
    pub inter_frame_delay_ms: u64,

    /// Optional per-byte throttling for slow USB-RS485 bridges
    pub inter_byte_delay_ms: u64,

    /// Per-message response timeout in milliseconds
    pub response_timeout_ms: u64,

    /// Retry budget per outbound message
    pub retries: u32,
}

/// Auxiliary port definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxPortConfig {
    /// Port id (1..N; 0 is the primary)
    pub id: u8,

    /// Variant spoken on this port (defaults to the primary's)
    #[serde(rename = "type", default)]
    pub controller_type: Option<ControllerType>,

    /// Communication parameters
    #[serde(default)]
    pub comms: CommsConfig,

    /// Whether the port is opened at startup
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Site location configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
}

/// Log section wrapper matching the `log.app.*` config paths
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub app: LogConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Directory for rotated log files
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to use JSON format
    pub json_format: bool,

    /// Whether to log to console
    pub console_output: bool,
}

/// Persistent data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataConfig {
    /// Directory holding pool-config and pool-state
    pub dir: String,

    /// Flush no sooner than this after the most recent mutation
    pub flush_quiet_ms: u64,

    /// Flush no later than this after the first unflushed mutation
    pub flush_max_ms: u64,
}

/// Delay manager tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DelaysConfig {
    /// Minimum gap between high-current load starts
    pub startup_stagger_ms: u64,

    /// Per-pump minimum between state changes
    pub pump_cooldown_ms: u64,

    /// Per-heater minimum between state changes
    pub heater_cooldown_ms: u64,

    /// Per-valve minimum between state changes
    pub valve_cooldown_ms: u64,

    /// Pump run-on after a heater turns off
    pub heater_run_on_ms: u64,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            TritonError::config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration with an optional explicit override path.
    ///
    /// When `override_path` is provided, the configuration is loaded strictly
    /// from that path and any error (including file-not-found) is returned
    /// without falling back to default search locations. When `override_path`
    /// is `None`, this behaves like `load()` and searches default locations.
    pub fn load_with_override<P: AsRef<Path>>(override_path: Option<P>) -> Result<Self> {
        if let Some(p) = override_path {
            return Self::from_file(p);
        }
        Self::load()
    }

    /// Load configuration from the default search locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "triton_config.yaml",
            "/data/triton_config.yaml",
            "/etc/triton/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|e| TritonError::config(e.to_string()))?;
        Ok(())
    }

    /// Apply environment variable overrides.
    ///
    /// Variables map onto config paths as follows:
    /// `POOL_NET_CONNECT` → `controller.comms.netConnect`,
    /// `POOL_NET_HOST` → `controller.comms.netHost`,
    /// `POOL_NET_PORT` → `controller.comms.netPort`,
    /// `POOL_RS485_PORT` → `controller.comms.rs485Port`,
    /// `POOL_LATITUDE` → `location.latitude`,
    /// `POOL_LONGITUDE` → `location.longitude`,
    /// `POOL_LOG_LEVEL` → `log.app.level`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("POOL_NET_CONNECT") {
            if let Ok(b) = v.parse::<bool>() {
                self.controller.comms.net_connect = b;
            }
        }
        if let Ok(v) = std::env::var("POOL_NET_HOST") {
            if !v.is_empty() {
                self.controller.comms.net_host = v;
            }
        }
        if let Ok(v) = std::env::var("POOL_NET_PORT") {
            if let Ok(p) = v.parse::<u16>() {
                self.controller.comms.net_port = p;
            }
        }
        if let Ok(v) = std::env::var("POOL_RS485_PORT") {
            if !v.is_empty() {
                self.controller.comms.rs485_port = v;
            }
        }
        if let Ok(v) = std::env::var("POOL_LATITUDE") {
            if let Ok(lat) = v.parse::<f64>() {
                self.location.latitude = lat;
            }
        }
        if let Ok(v) = std::env::var("POOL_LONGITUDE") {
            if let Ok(lon) = v.parse::<f64>() {
                self.location.longitude = lon;
            }
        }
        if let Ok(v) = std::env::var("POOL_LOG_LEVEL") {
            if !v.is_empty() {
                self.log.app.level = v;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.controller.comms.validate("controller.comms")?;
        for aux in &self.controller.aux_ports {
            if aux.id == 0 {
                return Err(TritonError::config(
                    "controller.auxPorts: id 0 is reserved for the primary port",
                ));
            }
            aux.comms
                .validate(&format!("controller.auxPorts[{}].comms", aux.id))?;
        }

        if !(-90.0..=90.0).contains(&self.location.latitude) {
            return Err(TritonError::config(
                "location.latitude must be within [-90, 90]",
            ));
        }
        if !(-180.0..=180.0).contains(&self.location.longitude) {
            return Err(TritonError::config(
                "location.longitude must be within [-180, 180]",
            ));
        }

        if self.data.flush_quiet_ms == 0 || self.data.flush_max_ms == 0 {
            return Err(TritonError::config(
                "data.flushQuietMs and data.flushMaxMs must be greater than 0",
            ));
        }
        if self.data.flush_quiet_ms > self.data.flush_max_ms {
            return Err(TritonError::config(
                "data.flushQuietMs must not exceed data.flushMaxMs",
            ));
        }

        Ok(())
    }
}

impl CommsConfig {
    fn validate(&self, section: &str) -> Result<()> {
        if self.net_connect {
            if self.net_host.is_empty() {
                return Err(TritonError::config(format!(
                    "{}.netHost cannot be empty when netConnect is set",
                    section
                )));
            }
            if self.net_port == 0 {
                return Err(TritonError::config(format!(
                    "{}.netPort must be greater than 0",
                    section
                )));
            }
        } else if self.rs485_port.is_empty() {
            return Err(TritonError::config(format!(
                "{}.rs485Port cannot be empty",
                section
            )));
        }

        if self.baud_rate == 0 {
            return Err(TritonError::config(format!(
                "{}.baudRate must be greater than 0",
                section
            )));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(TritonError::config(format!(
                "{}.dataBits must be 5, 6, 7, or 8",
                section
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(TritonError::config(format!(
                "{}.stopBits must be 1 or 2",
                section
            )));
        }
        if !["none", "even", "odd"].contains(&self.parity.as_str()) {
            return Err(TritonError::config(format!(
                "{}.parity must be none, even, or odd",
                section
            )));
        }
        if !["none", "software", "hardware"].contains(&self.flow_control.as_str()) {
            return Err(TritonError::config(format!(
                "{}.flowControl must be none, software, or hardware",
                section
            )));
        }
        if self.response_timeout_ms == 0 {
            return Err(TritonError::config(format!(
                "{}.responseTimeoutMs must be greater than 0",
                section
            )));
        }
        Ok(())
    }
}

// Tests live in `src/config_tests.rs` alongside the watcher tests
#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
