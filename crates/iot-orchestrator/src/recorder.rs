//! Run recorder
//!
//! Forwards run records to the flow store and announces run transitions to
//! any listeners. Persistence failures are logged, never propagated, so a
//! broken store cannot take the router down with it.

use iot_flow::{FlowRun, RunStatus};
use iot_storage::SharedFlowStore;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Capacity of the notification channel
const NOTIFICATION_CAPACITY: usize = 256;

/// A run state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum RunNotification {
    #[serde(rename = "flow:started", rename_all = "camelCase")]
    Started { flow_id: String, run_id: String },

    #[serde(rename = "flow:completed", rename_all = "camelCase")]
    Completed { flow_id: String, run_id: String },

    #[serde(rename = "flow:failed", rename_all = "camelCase")]
    Failed {
        flow_id: String,
        run_id: String,
        error: String,
    },
}

impl RunNotification {
    fn for_run(run: &FlowRun) -> Self {
        let flow_id = run.flow_id.clone();
        let run_id = run.id.clone();
        match run.status {
            RunStatus::Running => RunNotification::Started { flow_id, run_id },
            RunStatus::Completed => RunNotification::Completed { flow_id, run_id },
            RunStatus::Failed => RunNotification::Failed {
                flow_id,
                run_id,
                error: run.error.clone().unwrap_or_default(),
            },
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            RunNotification::Started { run_id, .. }
            | RunNotification::Completed { run_id, .. }
            | RunNotification::Failed { run_id, .. } => run_id,
        }
    }
}

/// Hands run records to persistence
pub struct RunRecorder {
    store: SharedFlowStore,
    notifications: broadcast::Sender<RunNotification>,
}

impl RunRecorder {
    pub fn new(store: SharedFlowStore) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            store,
            notifications,
        }
    }

    /// Subscribe to run transitions
    pub fn subscribe(&self) -> broadcast::Receiver<RunNotification> {
        self.notifications.subscribe()
    }

    /// Persist a run that has just started
    pub async fn record_started(&self, run: &FlowRun) {
        self.persist(run).await;
    }

    /// Persist a run that has reached its terminal status
    pub async fn record_finished(&self, run: &FlowRun) {
        debug_assert!(run.is_terminal());
        self.persist(run).await;
    }

    async fn persist(&self, run: &FlowRun) {
        debug!(
            flow_id = %run.flow_id,
            run_id = %run.id,
            status = ?run.status,
            entries = run.log.len(),
            "Recording run"
        );

        if let Err(e) = self.store.save_run(run).await {
            error!(
                flow_id = %run.flow_id,
                run_id = %run.id,
                error = %e,
                "Failed to persist run"
            );
        }

        // No receivers is fine
        let _ = self.notifications.send(RunNotification::for_run(run));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iot_storage::{FlowStore, MemoryFlowStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_started_then_finished() {
        let store = Arc::new(MemoryFlowStore::new());
        let recorder = RunRecorder::new(store.clone());
        let mut rx = recorder.subscribe();

        let run = FlowRun::start("f1");
        recorder.record_started(&run).await;
        assert_eq!(
            store.list_runs("f1", 10).await.unwrap()[0].status,
            RunStatus::Running
        );

        let run = run.fail("Command timeout");
        recorder.record_finished(&run).await;

        let stored = store.list_runs("f1", 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, RunStatus::Failed);
        assert_eq!(stored[0].log, run.log);

        assert!(matches!(rx.recv().await.unwrap(), RunNotification::Started { .. }));
        match rx.recv().await.unwrap() {
            RunNotification::Failed { error, run_id, .. } => {
                assert_eq!(error, "Command timeout");
                assert_eq!(run_id, run.id);
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_notification_wire_format() {
        let n = RunNotification::Completed {
            flow_id: "f".to_string(),
            run_id: "r".to_string(),
        };
        let wire = serde_json::to_value(&n).unwrap();
        assert_eq!(wire["type"], "flow:completed");
        assert_eq!(wire["flowId"], "f");
        assert_eq!(n.run_id(), "r");
    }
}
