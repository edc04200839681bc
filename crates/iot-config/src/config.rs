//! Platform configuration
//!
//! Parses the top-level configuration file. Every key is optional; a missing
//! file section falls back to the defaults below.

use iot_core::DEFAULT_COMMAND_TIMEOUT_SECS;
use iot_flow::{validate, Flow, FlowGraph};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Kinds of simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Light,
    Hvac,
    Occupancy,
    TemperatureSensor,
    SmartLock,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Light => "light",
            DeviceKind::Hvac => "hvac",
            DeviceKind::Occupancy => "occupancy",
            DeviceKind::TemperatureSensor => "temperature_sensor",
            DeviceKind::SmartLock => "smart_lock",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One simulated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimDeviceConfig {
    pub id: String,
    pub kind: DeviceKind,
}

impl SimDeviceConfig {
    pub fn new(id: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Simulated device fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between simulation ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_devices")]
    pub devices: Vec<SimDeviceConfig>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: default_tick_interval(),
            devices: default_devices(),
        }
    }
}

impl SimulatorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// A flow seeded from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Stable id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub graph: FlowGraph,
}

impl FlowDefinition {
    pub fn into_flow(self) -> Flow {
        let mut flow = match self.id {
            Some(id) => Flow::with_id(id, self.name, self.graph),
            None => Flow::new(self.name, self.graph),
        };
        flow.enabled = self.enabled;
        flow
    }
}

/// Top-level platform configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Default tracing filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for JSON persistence; in-memory storage when unset
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Runs kept per flow, also the default history page size
    #[serde(default = "default_run_history_limit")]
    pub run_history_limit: usize,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    pub simulator: SimulatorConfig,

    #[serde(default)]
    pub flows: Vec<FlowDefinition>,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_run_history_limit() -> usize {
    50
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_tick_interval() -> u64 {
    5
}

fn default_devices() -> Vec<SimDeviceConfig> {
    vec![
        SimDeviceConfig::new("sim-light-001", DeviceKind::Light),
        SimDeviceConfig::new("sim-light-002", DeviceKind::Light),
        SimDeviceConfig::new("sim-sensor-temp-001", DeviceKind::TemperatureSensor),
        SimDeviceConfig::new("sim-lock-001", DeviceKind::SmartLock),
        SimDeviceConfig::new("sim-hvac-001", DeviceKind::Hvac),
        SimDeviceConfig::new("sim-occupancy-001", DeviceKind::Occupancy),
    ]
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            storage_dir: None,
            command_timeout_secs: default_command_timeout(),
            run_history_limit: default_run_history_limit(),
            event_channel_capacity: default_event_channel_capacity(),
            simulator: SimulatorConfig::default(),
            flows: Vec::new(),
        }
    }
}

impl PlatformConfig {
    /// Load and validate a configuration file
    ///
    /// A relative `storage_dir` is resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let config_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file = path.file_name().map(Path::new).unwrap_or(path);

        let yaml = load_yaml(config_dir, file)?;
        let mut config = Self::from_yaml(yaml)?;

        if let Some(dir) = config.storage_dir.take() {
            config.storage_dir = Some(if dir.is_relative() {
                config_dir.join(dir)
            } else {
                dir
            });
        }

        info!(
            path = ?path,
            flows = config.flows.len(),
            devices = config.simulator.devices.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration from an already-resolved YAML value
    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        let yaml = match yaml {
            // An empty file is an all-defaults configuration
            Value::Null => Value::Mapping(Default::default()),
            Value::Mapping(_) => yaml,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "root".to_string(),
                    reason: "configuration must be a mapping".to_string(),
                })
            }
        };

        let config: PlatformConfig =
            serde_yaml::from_value(yaml).map_err(|e| ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges, device id uniqueness and every seeded flow graph
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("command_timeout_secs", self.command_timeout_secs as usize),
            ("run_history_limit", self.run_history_limit),
            ("event_channel_capacity", self.event_channel_capacity),
            ("simulator.tick_interval_secs", self.simulator.tick_interval_secs as usize),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for device in &self.simulator.devices {
            if !seen.insert(device.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "simulator.devices".to_string(),
                    reason: format!("duplicate device id '{}'", device.id),
                });
            }
        }

        for flow in &self.flows {
            validate(&flow.graph).map_err(|source| ConfigError::InvalidFlow {
                name: flow.name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
