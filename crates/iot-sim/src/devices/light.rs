use iot_config::DeviceKind;
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{json, Map, Value};

use crate::device::{Emitted, Reply, SimDevice, SimError, SimResult};

const OVERHEAT_THRESHOLD: f64 = 35.0;

/// Dimmable light with an occasional overheat event at high brightness
#[derive(Debug, Clone)]
pub struct Light {
    on: bool,
    brightness: u8,
    temperature: f64,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            on: false,
            brightness: 0,
            temperature: 25.0,
        }
    }
}

impl Light {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimDevice for Light {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Light
    }

    fn state(&self) -> Value {
        json!({ "on": self.on, "brightness": self.brightness })
    }

    fn handle(&mut self, action_name: &str, params: &Map<String, Value>) -> SimResult<Reply> {
        match action_name {
            "turnOn" => {
                self.on = true;
                if self.brightness == 0 {
                    self.brightness = 50;
                }
                Ok(Reply::new(json!({ "on": true, "brightness": self.brightness })))
            }
            "turnOff" => {
                self.on = false;
                self.brightness = 0;
                Ok(Reply::new(json!({ "on": false, "brightness": 0 })))
            }
            "setBrightness" => {
                let brightness = params
                    .get("brightness")
                    .and_then(Value::as_f64)
                    .filter(|b| (0.0..=100.0).contains(b))
                    .ok_or(SimError::InvalidParams("Brightness must be between 0 and 100"))?;

                self.brightness = brightness.round() as u8;
                self.on = self.brightness > 0;
                Ok(Reply::new(json!({ "brightness": self.brightness, "on": self.on })))
            }
            other => Err(SimError::UnknownAction(other.to_string())),
        }
    }

    fn tick(&mut self, rng: &mut StdRng) -> Vec<Emitted> {
        self.temperature = 20.0 + rng.gen::<f64>() * 15.0;

        if self.on && self.brightness > 80 && rng.gen::<f64>() > 0.8 {
            return vec![Emitted::new(
                "overheat",
                json!({ "temperature": self.temperature, "threshold": OVERHEAT_THRESHOLD }),
            )];
        }
        Vec::new()
    }
}
