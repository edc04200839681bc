use iot_config::DeviceKind;
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{json, Map, Value};

use crate::device::{round1, Emitted, Reply, SimDevice, SimError, SimResult};

const INITIAL_TEMPERATURE: f64 = 25.0;
const INITIAL_HUMIDITY: f64 = 45.0;

/// Temperature and humidity sensor reporting a `temperature` event per tick
/// while active
#[derive(Debug, Clone)]
pub struct TemperatureSensor {
    active: bool,
    temperature: f64,
    humidity: f64,
    battery: f64,
}

impl Default for TemperatureSensor {
    fn default() -> Self {
        Self {
            active: true,
            temperature: INITIAL_TEMPERATURE,
            humidity: INITIAL_HUMIDITY,
            battery: 100.0,
        }
    }
}

impl TemperatureSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimDevice for TemperatureSensor {
    fn kind(&self) -> DeviceKind {
        DeviceKind::TemperatureSensor
    }

    fn state(&self) -> Value {
        json!({
            "active": self.active,
            "temperature": round1(self.temperature),
            "humidity": round1(self.humidity),
            "battery": round1(self.battery),
        })
    }

    fn handle(&mut self, action_name: &str, _params: &Map<String, Value>) -> SimResult<Reply> {
        match action_name {
            "enable" => {
                self.active = true;
                Ok(Reply::new(json!({ "active": true })))
            }
            "disable" => {
                self.active = false;
                Ok(Reply::new(json!({ "active": false })))
            }
            "reset" => {
                self.temperature = INITIAL_TEMPERATURE;
                self.humidity = INITIAL_HUMIDITY;
                Ok(Reply::new(json!({ "success": true })))
            }
            other => Err(SimError::UnknownAction(other.to_string())),
        }
    }

    fn tick(&mut self, rng: &mut StdRng) -> Vec<Emitted> {
        if !self.active {
            return Vec::new();
        }

        self.temperature += rng.gen::<f64>() - 0.5;
        self.humidity += (rng.gen::<f64>() - 0.5) * 2.0;
        self.battery = (self.battery - 0.01).max(0.0);

        vec![Emitted::new(
            "temperature",
            json!({ "temperature": round1(self.temperature) }),
        )]
    }
}
