use iot_config::DeviceKind;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::device::{round1, Emitted, Reply, SimDevice, SimError, SimResult};

const AMBIENT: f64 = 26.0;
const MIN_TARGET: f64 = 16.0;
const MAX_TARGET: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacMode {
    Off,
    Cool,
    Heat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanSpeed {
    Low,
    Mid,
    High,
}

/// Air conditioner drifting its room temperature toward the target
#[derive(Debug, Clone)]
pub struct Hvac {
    mode: HvacMode,
    target_temp: f64,
    current_temp: f64,
    fan_speed: FanSpeed,
}

impl Default for Hvac {
    fn default() -> Self {
        Self {
            mode: HvacMode::Off,
            target_temp: 24.0,
            current_temp: AMBIENT,
            fan_speed: FanSpeed::Mid,
        }
    }
}

impl Hvac {
    pub fn new() -> Self {
        Self::default()
    }
}

fn param<T: for<'de> Deserialize<'de>>(params: &Map<String, Value>, key: &str) -> Option<T> {
    params
        .get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Numbers and numeric strings
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl SimDevice for Hvac {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Hvac
    }

    fn state(&self) -> Value {
        json!({
            "mode": self.mode,
            "targetTemp": self.target_temp,
            "currentTemp": self.current_temp,
            "fanSpeed": self.fan_speed,
        })
    }

    fn handle(&mut self, action_name: &str, params: &Map<String, Value>) -> SimResult<Reply> {
        match action_name {
            "setMode" => {
                self.mode = param(params, "mode").ok_or(SimError::InvalidParams("Invalid mode"))?;
                Ok(Reply::new(json!({ "mode": self.mode })))
            }
            "setTargetTemp" => {
                self.target_temp = params
                    .get("temp")
                    .and_then(numeric)
                    .filter(|t| (MIN_TARGET..=MAX_TARGET).contains(t))
                    .ok_or(SimError::InvalidParams("Temperature out of range (16-30)"))?;
                Ok(Reply::new(json!({ "targetTemp": self.target_temp })))
            }
            "setFanSpeed" => {
                self.fan_speed =
                    param(params, "speed").ok_or(SimError::InvalidParams("Invalid fan speed"))?;
                Ok(Reply::new(json!({ "fanSpeed": self.fan_speed })))
            }
            _ => Err(SimError::UnknownCommand),
        }
    }

    fn tick(&mut self, _rng: &mut StdRng) -> Vec<Emitted> {
        match self.mode {
            HvacMode::Cool if self.current_temp > self.target_temp => self.current_temp -= 0.5,
            HvacMode::Heat if self.current_temp < self.target_temp => self.current_temp += 0.5,
            // Drift back to ambient
            HvacMode::Off if self.current_temp > AMBIENT => self.current_temp -= 0.1,
            HvacMode::Off if self.current_temp < AMBIENT => self.current_temp += 0.1,
            _ => {}
        }
        self.current_temp = round1(self.current_temp);
        Vec::new()
    }
}
