//! Event bus for device events
//!
//! This crate provides the EventBus, the in-process fan-out point between the
//! transport adapter (or simulated devices) and consumers such as the flow
//! router. Consumers subscribe either to a single device or to every event.

use dashmap::DashMap;
use iot_core::DeviceEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity for event subscriptions
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The event bus for publishing and subscribing to device events
///
/// Delivery is best-effort broadcast: a subscriber that falls more than
/// `capacity` events behind observes `RecvError::Lagged`.
pub struct EventBus {
    /// Per-device broadcast senders
    devices: DashMap<String, broadcast::Sender<DeviceEvent>>,
    /// Sender for subscribers of every event
    match_all_sender: broadcast::Sender<DeviceEvent>,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            devices: DashMap::new(),
            match_all_sender,
            capacity,
        }
    }

    /// Subscribe to events emitted by a single device
    pub fn subscribe_device(&self, device_id: impl Into<String>) -> broadcast::Receiver<DeviceEvent> {
        let device_id = device_id.into();
        trace!(device_id = %device_id, "Subscribing to device events");

        self.devices
            .entry(device_id)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to all events
    pub fn subscribe_all(&self) -> broadcast::Receiver<DeviceEvent> {
        self.match_all_sender.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// The event will be delivered to:
    /// 1. All subscribers of the emitting device
    /// 2. All match-all subscribers
    pub fn fire(&self, event: DeviceEvent) {
        debug!(
            device_id = %event.device_id,
            event_name = %event.event_name,
            "Firing device event"
        );

        if let Some(sender) = self.devices.get(&event.device_id) {
            // Send errors only mean there are no active receivers
            let _ = sender.send(event.clone());
        }

        let _ = self.match_all_sender.send(event);
    }

    /// Number of devices with at least one subscription ever made
    pub fn device_subscription_count(&self) -> usize {
        self.devices.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;
