use iot_config::DeviceKind;
use iot_flow::is_truthy;
use rand::rngs::StdRng;
use serde_json::{json, Map, Value};

use crate::device::{Emitted, Reply, SimDevice, SimError, SimResult};

/// Presence sensor driven by `setOccupancy`
#[derive(Debug, Clone, Default)]
pub struct Occupancy {
    occupied: bool,
}

impl Occupancy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimDevice for Occupancy {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Occupancy
    }

    fn state(&self) -> Value {
        json!({ "occupied": self.occupied })
    }

    fn handle(&mut self, action_name: &str, params: &Map<String, Value>) -> SimResult<Reply> {
        if action_name != "setOccupancy" {
            return Err(SimError::UnknownCommand);
        }

        self.occupied = params.get("occupied").map(is_truthy).unwrap_or(false);
        Ok(Reply::new(json!({ "occupied": self.occupied }))
            .emit("occupied", json!({ "occupied": self.occupied })))
    }

    fn tick(&mut self, _rng: &mut StdRng) -> Vec<Emitted> {
        Vec::new()
    }
}
