//! Device models

mod hvac;
mod light;
mod lock;
mod occupancy;
mod temperature;

pub use hvac::{FanSpeed, Hvac, HvacMode};
pub use light::Light;
pub use lock::SmartLock;
pub use occupancy::Occupancy;
pub use temperature::TemperatureSensor;

use crate::device::SimDevice;
use iot_config::DeviceKind;

/// Build a device of the given kind in its initial state
pub fn build(kind: DeviceKind) -> Box<dyn SimDevice> {
    match kind {
        DeviceKind::Light => Box::new(Light::new()),
        DeviceKind::Hvac => Box::new(Hvac::new()),
        DeviceKind::Occupancy => Box::new(Occupancy::new()),
        DeviceKind::TemperatureSensor => Box::new(TemperatureSensor::new()),
        DeviceKind::SmartLock => Box::new(SmartLock::new()),
    }
}
