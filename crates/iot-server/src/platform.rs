//! The running platform instance

use anyhow::{Context, Result};
use iot_config::PlatformConfig;
use iot_event_bus::{EventBus, SharedEventBus};
use iot_orchestrator::{
    CommandRegistry, FlowExecutor, FlowManager, FlowRouter, RunNotification, RunRecorder,
};
use iot_sim::Simulator;
use iot_storage::{JsonFlowStore, MemoryFlowStore, SharedFlowStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Every long-lived component, wired together
pub struct Platform {
    pub config: PlatformConfig,
    /// Device events from simulators and the topic feed
    pub bus: SharedEventBus,
    /// Device command handlers
    pub commands: Arc<CommandRegistry>,
    pub simulator: Option<Arc<Simulator>>,
    pub router: Arc<FlowRouter>,
    pub flows: FlowManager,
}

impl Platform {
    pub async fn new(config: PlatformConfig) -> Result<Self> {
        let bus = Arc::new(EventBus::with_capacity(config.event_channel_capacity));
        let commands = Arc::new(CommandRegistry::with_timeout(config.command_timeout()));

        let store: SharedFlowStore = match &config.storage_dir {
            Some(dir) => {
                info!("Using JSON flow storage in {:?}", dir);
                Arc::new(
                    JsonFlowStore::open(dir, config.run_history_limit)
                        .await
                        .with_context(|| format!("opening flow storage in {}", dir.display()))?,
                )
            }
            None => {
                info!("Using in-memory flow storage");
                Arc::new(MemoryFlowStore::with_run_limit(config.run_history_limit))
            }
        };

        let simulator = if config.simulator.enabled {
            let sim = Arc::new(Simulator::from_config(&config.simulator, bus.clone()));
            sim.attach(&commands);
            Some(sim)
        } else {
            None
        };

        let executor = Arc::new(FlowExecutor::new(commands.clone()));
        let recorder = Arc::new(RunRecorder::new(store.clone()));
        let router = Arc::new(FlowRouter::new(store.clone(), executor, recorder));
        let flows = FlowManager::new(store, router.clone(), config.run_history_limit);

        Ok(Self {
            config,
            bus,
            commands,
            simulator,
            router,
            flows,
        })
    }

    /// Import the flows defined in configuration, then load the enabled set
    pub async fn seed_flows(&self) -> Result<usize> {
        for definition in self.config.flows.iter().cloned() {
            let name = definition.name.clone();
            self.flows
                .import(definition.into_flow())
                .await
                .with_context(|| format!("importing flow '{}'", name))?;
        }
        let enabled = self.router.reload().await?;
        Ok(enabled)
    }

    /// Start routing events and ticking simulated devices
    pub fn start(&self) {
        self.router.start(&self.bus);
        if let Some(sim) = &self.simulator {
            sim.start(self.config.simulator.tick_interval());
        }
    }

    pub fn stop(&self) {
        if let Some(sim) = &self.simulator {
            sim.stop();
        }
        self.router.stop();
    }

    /// Log run transitions as they happen
    pub fn log_runs(&self) {
        let mut rx = self.router.recorder().subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(RunNotification::Started { flow_id, run_id }) => {
                        info!(flow_id = %flow_id, run_id = %run_id, "Flow run started")
                    }
                    Ok(RunNotification::Completed { flow_id, run_id }) => {
                        info!(flow_id = %flow_id, run_id = %run_id, "Flow run completed")
                    }
                    Ok(RunNotification::Failed {
                        flow_id,
                        run_id,
                        error,
                    }) => {
                        warn!(flow_id = %flow_id, run_id = %run_id, error = %error, "Flow run failed")
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Run log lagged by {} notifications", n)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
