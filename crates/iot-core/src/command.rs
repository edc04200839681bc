//! Device commands and their correlated responses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A command sent to a device
///
/// Each command carries a fresh request id; the device answers with a
/// [`DeviceResponse`] bearing the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    /// Correlation id for the response
    pub request_id: String,

    /// Target device
    pub device_id: String,

    /// Action to invoke on the device
    pub action_name: String,

    /// Action parameters
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,

    /// When the command was issued
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts: DateTime<Utc>,
}

impl DeviceCommand {
    /// Create a new command with a generated request id
    pub fn new(
        device_id: impl Into<String>,
        action_name: impl Into<String>,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            device_id: device_id.into(),
            action_name: action_name.into(),
            params,
            ts: Utc::now(),
        }
    }
}

/// A device's answer to a [`DeviceCommand`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    /// Request id of the command being answered
    pub request_id: String,

    /// Whether the command succeeded
    pub ok: bool,

    /// Result payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the response was produced
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts: DateTime<Utc>,
}

impl DeviceResponse {
    /// Successful response to `command`
    pub fn ok(command: &DeviceCommand, result: serde_json::Value) -> Self {
        Self {
            request_id: command.request_id.clone(),
            ok: true,
            result: Some(result),
            error: None,
            ts: Utc::now(),
        }
    }

    /// Failed response to `command`
    pub fn error(command: &DeviceCommand, error: impl Into<String>) -> Self {
        Self {
            request_id: command.request_id.clone(),
            ok: false,
            result: None,
            error: Some(error.into()),
            ts: Utc::now(),
        }
    }
}
