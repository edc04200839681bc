//! Device command dispatch
//!
//! The engine issues commands through the [`CommandDispatcher`] trait.
//! [`CommandRegistry`] is the in-process implementation: devices (real
//! adapters or simulators) register an async handler per device id, and every
//! command is correlated with its response by request id and bounded by a
//! deadline.

use async_trait::async_trait;
use dashmap::DashMap;
use iot_core::{DeviceCommand, DeviceResponse, DEFAULT_COMMAND_TIMEOUT_SECS};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors returned by command dispatch
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device answered with `ok: false`
    #[error("{0}")]
    Rejected(String),

    #[error("Command timeout")]
    Timeout,

    #[error("Response request id {found} does not match command {expected}")]
    Uncorrelated { expected: String, found: String },
}

/// Result type for command dispatch
pub type CommandResult<T> = Result<T, CommandError>;

/// Sends commands to devices and waits for their result
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn send_command(
        &self,
        device_id: &str,
        action_name: &str,
        params: &Map<String, Value>,
    ) -> CommandResult<Value>;
}

/// Future type for async command handlers
pub type CommandFuture = Pin<Box<dyn Future<Output = DeviceResponse> + Send>>;

/// Command handler function type
pub type CommandHandler = Arc<dyn Fn(DeviceCommand) -> CommandFuture + Send + Sync>;

/// Registry of device command handlers
pub struct CommandRegistry {
    /// Handlers indexed by device id
    devices: DashMap<String, CommandHandler>,
    timeout: Duration,
}

impl CommandRegistry {
    /// Create a registry with the default command deadline
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS))
    }

    /// Create a registry with a custom command deadline
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            devices: DashMap::new(),
            timeout,
        }
    }

    /// Register the command handler for a device, replacing any previous one
    pub fn register<F, Fut>(&self, device_id: impl Into<String>, handler: F)
    where
        F: Fn(DeviceCommand) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DeviceResponse> + Send + 'static,
    {
        let device_id = device_id.into();
        debug!(device_id = %device_id, "Registering device command handler");

        let handler: CommandHandler = Arc::new(move |cmd| Box::pin(handler(cmd)) as CommandFuture);
        self.devices.insert(device_id, handler);
    }

    /// Remove a device; returns whether it was registered
    pub fn unregister(&self, device_id: &str) -> bool {
        self.devices.remove(device_id).is_some()
    }

    pub fn has_device(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Registered device ids, sorted
    pub fn devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandDispatcher for CommandRegistry {
    #[instrument(skip(self, params))]
    async fn send_command(
        &self,
        device_id: &str,
        action_name: &str,
        params: &Map<String, Value>,
    ) -> CommandResult<Value> {
        let handler = self
            .devices
            .get(device_id)
            .map(|h| h.value().clone())
            .ok_or_else(|| {
                warn!("Device not found");
                CommandError::DeviceNotFound(device_id.to_string())
            })?;

        let command = DeviceCommand::new(device_id, action_name, params.clone());
        let request_id = command.request_id.clone();
        debug!(request_id = %request_id, "Sending command");

        let response = tokio::time::timeout(self.timeout, handler(command))
            .await
            .map_err(|_| {
                warn!(request_id = %request_id, timeout = ?self.timeout, "Command timed out");
                CommandError::Timeout
            })?;

        if response.request_id != request_id {
            return Err(CommandError::Uncorrelated {
                expected: request_id,
                found: response.request_id,
            });
        }

        if response.ok {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(CommandError::Rejected(
                response.error.unwrap_or_else(|| "Command failed".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> CommandRegistry {
        let registry = CommandRegistry::with_timeout(Duration::from_millis(50));
        registry.register("light", |cmd: DeviceCommand| async move {
            match cmd.action_name.as_str() {
                "turnOn" => DeviceResponse::ok(&cmd, json!({"on": true})),
                "explode" => DeviceResponse {
                    error: None,
                    ..DeviceResponse::error(&cmd, "")
                },
                _ => DeviceResponse::error(&cmd, format!("Unknown command: {}", cmd.action_name)),
            }
        });
        registry.register("slow", |cmd: DeviceCommand| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            DeviceResponse::ok(&cmd, json!(null))
        });
        registry.register("confused", |cmd: DeviceCommand| async move {
            let mut response = DeviceResponse::ok(&cmd, json!(null));
            response.request_id = "someone-else".to_string();
            response
        });
        registry
    }

    #[tokio::test]
    async fn test_successful_command_returns_result() {
        let result = registry()
            .send_command("light", "turnOn", &Map::new())
            .await
            .unwrap();
        assert_eq!(result, json!({"on": true}));
    }

    #[tokio::test]
    async fn test_rejected_command() {
        let registry = registry();
        assert_eq!(
            registry.send_command("light", "dance", &Map::new()).await,
            Err(CommandError::Rejected("Unknown command: dance".to_string()))
        );
        assert_eq!(
            registry.send_command("light", "explode", &Map::new()).await,
            Err(CommandError::Rejected("Command failed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unknown_device() {
        assert_eq!(
            registry().send_command("ghost", "turnOn", &Map::new()).await,
            Err(CommandError::DeviceNotFound("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = registry()
            .send_command("slow", "turnOn", &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::Timeout);
        assert_eq!(err.to_string(), "Command timeout");
    }

    #[tokio::test]
    async fn test_uncorrelated_response() {
        let err = registry()
            .send_command("confused", "turnOn", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Uncorrelated { .. }));
    }

    #[test]
    fn test_registration() {
        let registry = registry();
        assert_eq!(registry.devices(), vec!["confused", "light", "slow"]);
        assert!(registry.unregister("slow"));
        assert!(!registry.has_device("slow"));
    }
}
