use chrono::Utc;
use iot_config::DeviceKind;
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{json, Map, Value};

use crate::device::{round1, Emitted, Reply, SimDevice, SimError, SimResult};

/// Door lock announcing every lock state change
#[derive(Debug, Clone)]
pub struct SmartLock {
    locked: bool,
    battery: f64,
}

impl Default for SmartLock {
    fn default() -> Self {
        Self {
            locked: true,
            battery: 95.0,
        }
    }
}

impl SmartLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimDevice for SmartLock {
    fn kind(&self) -> DeviceKind {
        DeviceKind::SmartLock
    }

    fn state(&self) -> Value {
        json!({ "isLocked": self.locked, "battery": round1(self.battery) })
    }

    fn handle(&mut self, action_name: &str, _params: &Map<String, Value>) -> SimResult<Reply> {
        let (locked, event_name) = match action_name {
            "lock" => (true, "locked"),
            "unlock" => (false, "unlocked"),
            other => return Err(SimError::UnknownAction(other.to_string())),
        };

        self.locked = locked;
        Ok(Reply::new(json!({ "isLocked": locked })).emit(event_name, json!({ "isLocked": locked })))
    }

    fn tick(&mut self, rng: &mut StdRng) -> Vec<Emitted> {
        self.battery = (self.battery - 0.001).max(0.0);

        if rng.gen::<f64>() > 0.95 {
            return vec![Emitted::new(
                "tamper",
                json!({ "severity": "high", "ts": Utc::now().timestamp_millis() }),
            )];
        }
        Vec::new()
    }
}
