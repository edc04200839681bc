//! YAML configuration loading for the IoT platform
//!
//! The platform reads one YAML file. It may pull in other files with the
//! loader's custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!include_dir_merge_list dir` - Merge lists from all YAML files in a directory
//! - `!env_var VAR` / `!env_var [VAR, default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use iot_config::PlatformConfig;
//!
//! let config = PlatformConfig::load("config/iot.yaml")?;
//! println!("{} flows seeded", config.flows.len());
//! ```

mod config;
mod error;
mod loader;

pub use config::{DeviceKind, FlowDefinition, PlatformConfig, SimDeviceConfig, SimulatorConfig};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
