//! Topic scheme used by devices and the backend
//!
//! ```text
//! iot/v1/devices/{deviceId}/presence
//! iot/v1/devices/{deviceId}/desc
//! iot/v1/devices/{deviceId}/state/{propertyName}
//! iot/v1/devices/{deviceId}/event/{eventName}
//! iot/v1/devices/{deviceId}/cmd/{actionName}
//! iot/v1/devices/{deviceId}/resp/{requestId}
//! ```

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::DeviceEvent;

/// Prefix shared by every device topic
pub const BASE: &str = "iot/v1/devices";

/// Error type for topics outside the device scheme
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic must start with 'iot/v1/devices/'")]
    WrongPrefix,

    #[error("topic is missing the device id")]
    MissingDeviceId,

    #[error("unknown topic kind '{0}'")]
    UnknownKind(String),

    #[error("topic kind '{0}' requires a trailing path segment")]
    MissingSubPath(TopicKind),

    #[error("expected an event topic, got '{0}'")]
    NotAnEvent(TopicKind),
}

/// The message class a topic carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Presence,
    Desc,
    State,
    Event,
    Cmd,
    Resp,
}

impl TopicKind {
    /// Topic segment for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKind::Presence => "presence",
            TopicKind::Desc => "desc",
            TopicKind::State => "state",
            TopicKind::Event => "event",
            TopicKind::Cmd => "cmd",
            TopicKind::Resp => "resp",
        }
    }

    fn requires_sub_path(&self) -> bool {
        !matches!(self, TopicKind::Presence | TopicKind::Desc)
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicKind {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "presence" => Ok(TopicKind::Presence),
            "desc" => Ok(TopicKind::Desc),
            "state" => Ok(TopicKind::State),
            "event" => Ok(TopicKind::Event),
            "cmd" => Ok(TopicKind::Cmd),
            "resp" => Ok(TopicKind::Resp),
            other => Err(TopicError::UnknownKind(other.to_string())),
        }
    }
}

/// Presence topic (retained)
pub fn presence(device_id: &str) -> String {
    format!("{BASE}/{device_id}/presence")
}

/// Self-description topic (retained)
pub fn desc(device_id: &str) -> String {
    format!("{BASE}/{device_id}/desc")
}

/// Property state topic
pub fn state(device_id: &str, property: &str) -> String {
    format!("{BASE}/{device_id}/state/{property}")
}

/// Device event topic
pub fn event(device_id: &str, event_name: &str) -> String {
    format!("{BASE}/{device_id}/event/{event_name}")
}

/// Command topic
pub fn cmd(device_id: &str, action_name: &str) -> String {
    format!("{BASE}/{device_id}/cmd/{action_name}")
}

/// Command response topic
pub fn resp(device_id: &str, request_id: &str) -> String {
    format!("{BASE}/{device_id}/resp/{request_id}")
}

/// Wildcard subscription for every device event
pub fn all_events() -> String {
    format!("{BASE}/+/event/#")
}

/// A topic split into its components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub kind: TopicKind,
    pub device_id: String,
    /// Everything after the kind segment (property, event, action or request id)
    pub sub_path: Option<String>,
}

impl ParsedTopic {
    /// Build a [`DeviceEvent`] from an event topic and its JSON payload
    pub fn into_event(self, payload: serde_json::Value) -> Result<DeviceEvent, TopicError> {
        if self.kind != TopicKind::Event {
            return Err(TopicError::NotAnEvent(self.kind));
        }
        let event_name = self.sub_path.ok_or(TopicError::MissingSubPath(self.kind))?;
        Ok(DeviceEvent::new(self.device_id, event_name, payload))
    }
}

/// Split a device topic into kind, device id and sub path
pub fn parse(topic: &str) -> Result<ParsedTopic, TopicError> {
    let rest = topic
        .strip_prefix(BASE)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or(TopicError::WrongPrefix)?;

    let mut parts = rest.splitn(3, '/');
    let device_id = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(TopicError::MissingDeviceId)?;
    let kind: TopicKind = parts
        .next()
        .ok_or_else(|| TopicError::UnknownKind(String::new()))?
        .parse()?;
    let sub_path = parts.next().filter(|s| !s.is_empty()).map(str::to_string);

    if kind.requires_sub_path() && sub_path.is_none() {
        return Err(TopicError::MissingSubPath(kind));
    }

    Ok(ParsedTopic {
        kind,
        device_id: device_id.to_string(),
        sub_path,
    })
}
