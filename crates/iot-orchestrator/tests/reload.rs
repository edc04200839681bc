//! Router reloads racing with flow edits

use async_trait::async_trait;
use iot_flow::{Flow, FlowGraph, FlowRun, Node};
use iot_orchestrator::{CommandRegistry, FlowExecutor, FlowRouter, RunRecorder};
use iot_storage::{FlowStore, MemoryFlowStore, StoreResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Memory store whose first `list_flows` answers late with what it read
#[derive(Default)]
struct LaggingStore {
    inner: MemoryFlowStore,
    lists: AtomicUsize,
    first_read: Notify,
}

#[async_trait]
impl FlowStore for LaggingStore {
    async fn list_flows(&self) -> StoreResult<Vec<Flow>> {
        let flows = self.inner.list_flows().await?;
        if self.lists.fetch_add(1, Ordering::SeqCst) == 0 {
            self.first_read.notify_one();
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        Ok(flows)
    }

    async fn get_flow(&self, id: &str) -> StoreResult<Option<Flow>> {
        self.inner.get_flow(id).await
    }

    async fn save_flow(&self, flow: &Flow) -> StoreResult<()> {
        self.inner.save_flow(flow).await
    }

    async fn delete_flow(&self, id: &str) -> StoreResult<bool> {
        self.inner.delete_flow(id).await
    }

    async fn save_run(&self, run: &FlowRun) -> StoreResult<()> {
        self.inner.save_run(run).await
    }

    async fn list_runs(&self, flow_id: &str, limit: usize) -> StoreResult<Vec<FlowRun>> {
        self.inner.list_runs(flow_id, limit).await
    }
}

fn enabled_flow(device: &str) -> Flow {
    let mut flow = Flow::new(
        format!("on {device}"),
        FlowGraph::new(vec![Node::trigger("t", Some(device), None)], vec![]),
    );
    flow.enabled = true;
    flow
}

fn router(store: Arc<LaggingStore>) -> Arc<FlowRouter> {
    let executor = Arc::new(FlowExecutor::new(Arc::new(CommandRegistry::new())));
    let recorder = Arc::new(RunRecorder::new(store.clone()));
    Arc::new(FlowRouter::new(store, executor, recorder))
}

#[tokio::test]
async fn test_later_reload_wins_over_slower_earlier_one() {
    let store = Arc::new(LaggingStore::default());
    store.save_flow(&enabled_flow("d1")).await.unwrap();
    let router = router(store.clone());

    let earlier = tokio::spawn({
        let router = Arc::clone(&router);
        async move { router.reload().await.unwrap() }
    });

    // The earlier reload has read one enabled flow and is still in flight
    store.first_read.notified().await;
    let added = enabled_flow("d2");
    store.save_flow(&added).await.unwrap();

    let later = router.reload().await.unwrap();
    assert_eq!(earlier.await.unwrap(), 1);
    assert_eq!(later, 2);

    let snapshot = router.snapshot().await;
    assert_eq!(snapshot.len(), store.list_enabled_flows().await.unwrap().len());
    assert!(snapshot.ids().contains(&added.id));
}
