//! Core types for the IoT platform
//!
//! This crate provides the fundamental types exchanged between devices and the
//! backend: DeviceEvent, DeviceCommand, DeviceResponse, and the topic scheme
//! the transport uses to address them.

mod command;
mod event;
pub mod topics;

pub use command::{DeviceCommand, DeviceResponse};
pub use event::DeviceEvent;
pub use topics::{ParsedTopic, TopicError, TopicKind};

/// Default deadline for a device to answer a command (matches the gateway)
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 5;
