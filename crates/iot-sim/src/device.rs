//! Simulated device contract

use iot_config::DeviceKind;
use rand::rngs::StdRng;
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a simulated device refused a command
///
/// The display text is what the device reports in its error response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown command")]
    UnknownCommand,

    #[error("{0}")]
    InvalidParams(&'static str),
}

/// Result type for simulated commands
pub type SimResult<T> = Result<T, SimError>;

/// An event a device wants published, without its device id
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub event_name: String,
    pub payload: Value,
}

impl Emitted {
    pub fn new(event_name: impl Into<String>, payload: Value) -> Self {
        Self {
            event_name: event_name.into(),
            payload,
        }
    }
}

/// Outcome of a successful command
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub result: Value,
    pub events: Vec<Emitted>,
}

impl Reply {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            events: Vec::new(),
        }
    }

    pub fn emit(mut self, event_name: impl Into<String>, payload: Value) -> Self {
        self.events.push(Emitted::new(event_name, payload));
        self
    }
}

/// A device living entirely in memory
pub trait SimDevice: Send {
    fn kind(&self) -> DeviceKind;

    /// Current state as reported on the state topic
    fn state(&self) -> Value;

    /// Apply a command
    fn handle(&mut self, action_name: &str, params: &Map<String, Value>) -> SimResult<Reply>;

    /// Advance the simulation by one interval
    fn tick(&mut self, rng: &mut StdRng) -> Vec<Emitted>;
}

/// Round to one decimal place, the precision devices report
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
