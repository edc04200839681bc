//! Simulated devices
//!
//! In-memory stand-ins for the platform's demo hardware. They answer
//! commands through the orchestrator's command registry and publish their
//! events on the event bus, so flows can be exercised end to end without a
//! broker.
//!
//! | kind | actions | events |
//! |---|---|---|
//! | light | `turnOn`, `turnOff`, `setBrightness{brightness}` | `overheat` |
//! | hvac | `setMode{mode}`, `setTargetTemp{temp}`, `setFanSpeed{speed}` | |
//! | occupancy | `setOccupancy{occupied}` | `occupied` |
//! | temperature_sensor | `enable`, `disable`, `reset` | `temperature` |
//! | smart_lock | `lock`, `unlock` | `locked`, `unlocked`, `tamper` |

mod device;
pub mod devices;
mod simulator;

pub use device::{Emitted, Reply, SimDevice, SimError, SimResult};
pub use simulator::Simulator;
