//! Simulated device fleet
//!
//! Each device answers commands through the [`CommandRegistry`] and publishes
//! what it emits on the event bus, the same path a transport adapter would use
//! for real hardware.

use dashmap::DashMap;
use iot_config::{DeviceKind, SimulatorConfig};
use iot_core::{DeviceCommand, DeviceEvent, DeviceResponse};
use iot_event_bus::SharedEventBus;
use iot_orchestrator::CommandRegistry;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::device::{Emitted, SimDevice};
use crate::devices;

type DeviceCell = Arc<Mutex<Box<dyn SimDevice>>>;

/// A set of simulated devices sharing one event bus and one noise source
pub struct Simulator {
    devices: DashMap<String, DeviceCell>,
    bus: SharedEventBus,
    rng: Mutex<StdRng>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl Simulator {
    pub fn new(bus: SharedEventBus) -> Self {
        Self::with_rng(bus, StdRng::from_entropy())
    }

    /// Deterministic noise, for tests
    pub fn with_seed(bus: SharedEventBus, seed: u64) -> Self {
        Self::with_rng(bus, StdRng::seed_from_u64(seed))
    }

    fn with_rng(bus: SharedEventBus, rng: StdRng) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            devices: DashMap::new(),
            bus,
            rng: Mutex::new(rng),
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Build the configured device set
    pub fn from_config(config: &SimulatorConfig, bus: SharedEventBus) -> Self {
        let sim = Self::new(bus);
        for device in &config.devices {
            sim.add_kind(&device.id, device.kind);
        }
        info!("Loaded {} simulated devices", sim.devices.len());
        sim
    }

    /// Add a device in its initial state, replacing one with the same id
    pub fn add_kind(&self, device_id: impl Into<String>, kind: DeviceKind) {
        self.add(device_id, devices::build(kind));
    }

    pub fn add(&self, device_id: impl Into<String>, device: Box<dyn SimDevice>) {
        let device_id = device_id.into();
        debug!(device_id = %device_id, kind = %device.kind(), "Adding simulated device");
        self.devices.insert(device_id, Arc::new(Mutex::new(device)));
    }

    /// Device ids, sorted
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub async fn state(&self, device_id: &str) -> Option<Value> {
        let cell = self.cell(device_id)?;
        let device = cell.lock().await;
        Some(device.state())
    }

    fn cell(&self, device_id: &str) -> Option<DeviceCell> {
        self.devices.get(device_id).map(|e| Arc::clone(e.value()))
    }

    /// Apply a command and publish the events it produced
    pub async fn handle(&self, command: DeviceCommand) -> DeviceResponse {
        let Some(cell) = self.cell(&command.device_id) else {
            return DeviceResponse::error(&command, format!("Unknown device: {}", command.device_id));
        };

        let outcome = cell.lock().await.handle(&command.action_name, &command.params);
        match outcome {
            Ok(reply) => {
                debug!(
                    device_id = %command.device_id,
                    action = %command.action_name,
                    "Command executed"
                );
                self.publish(&command.device_id, reply.events);
                DeviceResponse::ok(&command, reply.result)
            }
            Err(e) => {
                warn!(
                    device_id = %command.device_id,
                    action = %command.action_name,
                    error = %e,
                    "Command failed"
                );
                DeviceResponse::error(&command, e.to_string())
            }
        }
    }

    /// Register a command handler for every device
    pub fn attach(self: &Arc<Self>, registry: &CommandRegistry) {
        for device_id in self.device_ids() {
            let sim = Arc::clone(self);
            registry.register(device_id, move |command| {
                let sim = Arc::clone(&sim);
                async move { sim.handle(command).await }
            });
        }
    }

    /// Advance every device by one interval; returns the number of events
    /// published
    pub async fn tick(&self) -> usize {
        let mut cells: Vec<(String, DeviceCell)> = self
            .devices
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        cells.sort_by(|a, b| a.0.cmp(&b.0));

        let mut rng = self.rng.lock().await;
        let mut published = 0;
        for (device_id, cell) in cells {
            let emitted = cell.lock().await.tick(&mut rng);
            published += emitted.len();
            self.publish(&device_id, emitted);
        }
        published
    }

    fn publish(&self, device_id: &str, emitted: Vec<Emitted>) {
        for Emitted {
            event_name,
            payload,
        } in emitted
        {
            self.bus
                .fire(DeviceEvent::new(device_id, event_name, payload));
        }
    }

    /// Tick every `interval` until stopped
    pub fn start(self: &Arc<Self>, interval: Duration) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Simulator already running");
            return;
        }

        info!(interval_secs = interval.as_secs(), "Starting device simulator");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let sim = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sim.tick().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Device simulator received shutdown signal");
                        break;
                    }
                }
            }

            sim.running.store(false, Ordering::SeqCst);
        });
    }

    pub fn stop(&self) {
        info!("Stopping device simulator");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
