//! Device events delivered by the transport

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A discrete occurrence reported by a device
///
/// Events are published by devices on their `event/{eventName}` topic and fed
/// to the flow router. The payload is free-form JSON defined by the device model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    /// Device that emitted the event
    pub device_id: String,

    /// Event name (e.g. "occupied", "temperature")
    pub event_name: String,

    /// Event payload
    #[serde(default)]
    pub payload: serde_json::Value,

    /// When the event was received, serialized as epoch milliseconds
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts: DateTime<Utc>,
}

impl DeviceEvent {
    /// Create a new event stamped with the current time
    pub fn new(
        device_id: impl Into<String>,
        event_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            event_name: event_name.into(),
            payload,
            ts: Utc::now(),
        }
    }

    /// Override the event timestamp
    pub fn with_ts(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = ts;
        self
    }
}
