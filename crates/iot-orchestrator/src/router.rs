//! Event router and enabled-flow registry
//!
//! The router keeps an immutable snapshot of the enabled flows. `reload`
//! builds a new snapshot from the store and swaps it in whole, so an event
//! being routed always sees either the old set or the new one. Each run holds
//! its own `Arc<Flow>`, which keeps in-flight runs on the graph they started
//! with no matter how often the registry changes.

use futures::future::join_all;
use iot_core::DeviceEvent;
use iot_event_bus::EventBus;
use iot_flow::{Flow, FlowRun};
use iot_storage::{SharedFlowStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::executor::FlowExecutor;
use crate::recorder::RunRecorder;

/// Router errors
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Failed to load enabled flows: {0}")]
    Store(#[from] StoreError),
}

/// Result type for router operations
pub type RouterResult<T> = Result<T, RouterError>;

/// The set of enabled flows at one point in time
#[derive(Debug, Default)]
pub struct FlowSnapshot {
    flows: Vec<Arc<Flow>>,
}

impl FlowSnapshot {
    pub fn new(flows: Vec<Flow>) -> Self {
        Self {
            flows: flows.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn flows(&self) -> &[Arc<Flow>] {
        &self.flows
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Ids of the flows in the snapshot, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.flows.iter().map(|f| f.id.clone()).collect();
        ids.sort();
        ids
    }

    /// Flows with at least one trigger matching `event`
    pub fn matching<'a>(&'a self, event: &'a DeviceEvent) -> impl Iterator<Item = &'a Arc<Flow>> + 'a {
        self.flows
            .iter()
            .filter(move |flow| flow.graph.is_triggered_by(event))
    }
}

/// Matches device events against enabled flows and starts runs
pub struct FlowRouter {
    store: SharedFlowStore,
    executor: Arc<FlowExecutor>,
    recorder: Arc<RunRecorder>,
    snapshot: RwLock<Arc<FlowSnapshot>>,
    /// Held from the store read to the swap, so reloads apply in call order
    reload_lock: Mutex<()>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl FlowRouter {
    pub fn new(
        store: SharedFlowStore,
        executor: Arc<FlowExecutor>,
        recorder: Arc<RunRecorder>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            executor,
            recorder,
            snapshot: RwLock::new(Arc::new(FlowSnapshot::default())),
            reload_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    pub fn recorder(&self) -> &Arc<RunRecorder> {
        &self.recorder
    }

    /// Current enabled-flow snapshot
    pub async fn snapshot(&self) -> Arc<FlowSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Replace the snapshot with the enabled flows currently in the store
    ///
    /// On failure the previous snapshot stays in place.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> RouterResult<usize> {
        let _guard = self.reload_lock.lock().await;
        let flows = self.store.list_enabled_flows().await?;
        let next = Arc::new(FlowSnapshot::new(flows));
        let count = next.len();

        *self.snapshot.write().await = next;
        info!(enabled_flows = count, "Reloaded flow registry");
        Ok(count)
    }

    /// Start one run per enabled flow whose triggers match `event`
    ///
    /// Runs execute concurrently as independent tasks; the returned handles
    /// resolve to the terminal run records.
    pub async fn on_event(&self, event: DeviceEvent) -> Vec<JoinHandle<FlowRun>> {
        let snapshot = self.snapshot().await;
        trace!(
            device_id = %event.device_id,
            event_name = %event.event_name,
            enabled_flows = snapshot.len(),
            "Routing event"
        );

        let event = Arc::new(event);
        snapshot
            .matching(&event)
            .map(|flow| {
                debug!(flow_id = %flow.id, event_name = %event.event_name, "Flow triggered");
                let flow = Arc::clone(flow);
                let event = Arc::clone(&event);
                let executor = Arc::clone(&self.executor);
                let recorder = Arc::clone(&self.recorder);
                tokio::spawn(async move { Self::run_flow(&executor, &recorder, &flow, &event).await })
            })
            .collect()
    }

    /// Route an event and wait for every run it started
    pub async fn route(&self, event: DeviceEvent) -> Vec<FlowRun> {
        let handles = self.on_event(event).await;
        join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(run) => Some(run),
                Err(e) => {
                    error!(error = %e, "Flow run task failed");
                    None
                }
            })
            .collect()
    }

    async fn run_flow(
        executor: &FlowExecutor,
        recorder: &RunRecorder,
        flow: &Flow,
        event: &DeviceEvent,
    ) -> FlowRun {
        let run = FlowRun::start(&flow.id);
        recorder.record_started(&run).await;
        let run = executor.execute(run, flow, event).await;
        recorder.record_finished(&run).await;
        run
    }

    /// Subscribe to the event bus and route every event until stopped
    pub fn start(self: &Arc<Self>, event_bus: &EventBus) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Flow router already running");
            return;
        }

        info!("Starting flow router");

        let mut event_rx = event_bus.subscribe_all();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let router = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event_result = event_rx.recv() => {
                        match event_result {
                            Ok(event) => {
                                // Runs are detached; their outcome goes through the recorder
                                router.on_event(event).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Flow router lagged by {} events", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                info!("Event bus closed, stopping flow router");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Flow router received shutdown signal");
                        break;
                    }
                }
            }

            router.running.store(false, Ordering::SeqCst);
        });
    }

    /// Stop routing events; runs already started are not cancelled
    pub fn stop(&self) {
        info!("Stopping flow router");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRegistry;
    use iot_core::DeviceResponse;
    use iot_flow::{Edge, FlowGraph, Node, RunStatus};
    use iot_storage::{FlowStore, MemoryFlowStore};
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryFlowStore>, Arc<FlowRouter>) {
        let store = Arc::new(MemoryFlowStore::new());
        let registry = Arc::new(CommandRegistry::new());
        registry.register("lamp", |cmd| async move { DeviceResponse::ok(&cmd, json!(null)) });

        let executor = Arc::new(FlowExecutor::new(registry));
        let recorder = Arc::new(RunRecorder::new(store.clone()));
        let router = Arc::new(FlowRouter::new(store.clone(), executor, recorder));
        (store, router)
    }

    fn flow(device: &str, enabled: bool) -> Flow {
        let mut flow = Flow::new(
            format!("on {device}"),
            FlowGraph::new(
                vec![
                    Node::trigger("t", Some(device), None),
                    Node::action("a", "lamp", "turnOn", json!({})),
                ],
                vec![Edge::new("e", "t", "a")],
            ),
        );
        flow.enabled = enabled;
        flow
    }

    #[tokio::test]
    async fn test_reload_only_takes_enabled_flows() {
        let (store, router) = setup();
        store.save_flow(&flow("d1", true)).await.unwrap();
        store.save_flow(&flow("d2", false)).await.unwrap();

        assert_eq!(router.reload().await.unwrap(), 1);
        assert_eq!(router.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_one_run_per_matching_flow() {
        let (store, router) = setup();
        let a = flow("d1", true);
        let b = flow("d1", true);
        store.save_flow(&a).await.unwrap();
        store.save_flow(&b).await.unwrap();
        store.save_flow(&flow("d2", true)).await.unwrap();
        router.reload().await.unwrap();

        let runs = router.route(DeviceEvent::new("d1", "x", json!({}))).await;
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == RunStatus::Completed));

        let mut flow_ids: Vec<_> = runs.iter().map(|r| r.flow_id.clone()).collect();
        flow_ids.sort();
        let mut expected = vec![a.id.clone(), b.id.clone()];
        expected.sort();
        assert_eq!(flow_ids, expected);

        assert_eq!(store.list_runs(&a.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_event_starts_nothing() {
        let (store, router) = setup();
        store.save_flow(&flow("d1", true)).await.unwrap();
        router.reload().await.unwrap();

        assert!(router
            .on_event(DeviceEvent::new("d9", "x", json!({})))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_start_routes_bus_events_until_stopped() {
        let (store, router) = setup();
        let f = flow("d1", true);
        store.save_flow(&f).await.unwrap();
        router.reload().await.unwrap();

        let bus = EventBus::new();
        let mut notifications = router.recorder().subscribe();
        router.start(&bus);
        assert!(router.is_running());

        bus.fire(DeviceEvent::new("d1", "x", json!({})));

        let finished = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(crate::RunNotification::Completed { flow_id, .. }) =
                    notifications.recv().await
                {
                    break flow_id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(finished, f.id);

        router.stop();
        tokio::time::timeout(Duration::from_secs(2), async {
            while router.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
