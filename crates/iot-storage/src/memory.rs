//! In-memory flow store

use async_trait::async_trait;
use iot_flow::{Flow, FlowRun};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::{FlowStore, StoreResult};

/// Runs kept per flow unless configured otherwise
pub const DEFAULT_RUN_HISTORY_LIMIT: usize = 50;

/// Everything a store holds, in its serialized form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub flows: Vec<Flow>,
    #[serde(default)]
    pub runs: Vec<FlowRun>,
}

#[derive(Debug, Default)]
struct State {
    flows: HashMap<String, Flow>,
    /// Runs per flow id, oldest first
    runs: HashMap<String, Vec<FlowRun>>,
    /// Deleted flow ids; late runs for them are dropped
    deleted: HashSet<String>,
}

/// Flow store backed by process memory
#[derive(Debug)]
pub struct MemoryFlowStore {
    state: RwLock<State>,
    run_limit: usize,
}

impl MemoryFlowStore {
    /// Create an empty store with the default run retention
    pub fn new() -> Self {
        Self::with_run_limit(DEFAULT_RUN_HISTORY_LIMIT)
    }

    /// Create an empty store keeping at most `run_limit` runs per flow
    pub fn with_run_limit(run_limit: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            run_limit: run_limit.max(1),
        }
    }

    /// Create a store pre-populated from serialized data
    pub fn from_data(data: StoreData, run_limit: usize) -> Self {
        let run_limit = run_limit.max(1);
        let mut state = State::default();
        for flow in data.flows {
            state.flows.insert(flow.id.clone(), flow);
        }
        for run in data.runs {
            state.insert_run(run, run_limit);
        }

        Self {
            state: RwLock::new(state),
            run_limit,
        }
    }

    /// Copy out the store contents
    pub async fn snapshot(&self) -> StoreData {
        let state = self.state.read().await;
        StoreData {
            flows: state.flows.values().cloned().collect(),
            runs: state.runs.values().flatten().cloned().collect(),
        }
    }
}

impl Default for MemoryFlowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn insert_run(&mut self, run: FlowRun, limit: usize) {
        if self.deleted.contains(&run.flow_id) {
            debug!(flow_id = %run.flow_id, run_id = %run.id, "Dropping run of deleted flow");
            return;
        }

        let runs = self.runs.entry(run.flow_id.clone()).or_default();

        if let Some(existing) = runs.iter_mut().find(|r| r.id == run.id) {
            *existing = run;
            return;
        }

        runs.push(run);
        runs.sort_by(|a, b| (a.started_at, &a.id).cmp(&(b.started_at, &b.id)));
        if runs.len() > limit {
            let excess = runs.len() - limit;
            runs.drain(..excess);
            trace!(excess, "Pruned old runs");
        }
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn list_flows(&self) -> StoreResult<Vec<Flow>> {
        let state = self.state.read().await;
        let mut flows: Vec<Flow> = state.flows.values().cloned().collect();
        flows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));
        Ok(flows)
    }

    async fn get_flow(&self, id: &str) -> StoreResult<Option<Flow>> {
        Ok(self.state.read().await.flows.get(id).cloned())
    }

    async fn save_flow(&self, flow: &Flow) -> StoreResult<()> {
        debug!(flow_id = %flow.id, enabled = flow.enabled, "Saving flow");
        let mut state = self.state.write().await;
        state.deleted.remove(&flow.id);
        state.flows.insert(flow.id.clone(), flow.clone());
        Ok(())
    }

    async fn delete_flow(&self, id: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        state.runs.remove(id);
        let existed = state.flows.remove(id).is_some();
        if existed {
            state.deleted.insert(id.to_string());
        }
        Ok(existed)
    }

    async fn save_run(&self, run: &FlowRun) -> StoreResult<()> {
        trace!(run_id = %run.id, status = ?run.status, "Saving run");
        self.state
            .write()
            .await
            .insert_run(run.clone(), self.run_limit);
        Ok(())
    }

    async fn list_runs(&self, flow_id: &str, limit: usize) -> StoreResult<Vec<FlowRun>> {
        let state = self.state.read().await;
        Ok(state
            .runs
            .get(flow_id)
            .map(|runs| runs.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use iot_flow::FlowGraph;

    fn run_at(flow_id: &str, offset_secs: i64) -> FlowRun {
        let mut run = FlowRun::start(flow_id);
        run.started_at += Duration::seconds(offset_secs);
        run
    }

    #[tokio::test]
    async fn test_flow_crud() {
        let store = MemoryFlowStore::new();
        let mut flow = Flow::new("Lights", FlowGraph::default());

        store.save_flow(&flow).await.unwrap();
        assert_eq!(store.get_flow(&flow.id).await.unwrap(), Some(flow.clone()));
        assert!(store.list_enabled_flows().await.unwrap().is_empty());

        flow.enabled = true;
        store.save_flow(&flow).await.unwrap();
        assert_eq!(store.list_enabled_flows().await.unwrap().len(), 1);

        assert!(store.delete_flow(&flow.id).await.unwrap());
        assert!(!store.delete_flow(&flow.id).await.unwrap());
        assert!(store.get_flow(&flow.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_late_run_of_deleted_flow_is_dropped() {
        let store = MemoryFlowStore::new();
        let flow = Flow::new("Lights", FlowGraph::default());
        store.save_flow(&flow).await.unwrap();

        let run = FlowRun::start(&flow.id);
        store.save_run(&run).await.unwrap();
        assert!(store.delete_flow(&flow.id).await.unwrap());

        store.save_run(&run.complete()).await.unwrap();
        assert!(store.list_runs(&flow.id, 10).await.unwrap().is_empty());
        assert!(store.snapshot().await.runs.is_empty());

        // Re-importing the same id takes runs again
        store.save_flow(&flow).await.unwrap();
        store.save_run(&FlowRun::start(&flow.id)).await.unwrap();
        assert_eq!(store.list_runs(&flow.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_flows_most_recently_updated_first() {
        let store = MemoryFlowStore::new();
        let older = Flow::new("a", FlowGraph::default());
        let mut newer = Flow::new("b", FlowGraph::default());
        newer.updated_at = older.updated_at + Duration::seconds(5);

        store.save_flow(&older).await.unwrap();
        store.save_flow(&newer).await.unwrap();

        let names: Vec<_> = store
            .list_flows()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_runs_most_recent_first_and_upserted() {
        let store = MemoryFlowStore::new();
        let first = run_at("f", 0);
        let second = run_at("f", 10);

        store.save_run(&second).await.unwrap();
        store.save_run(&first).await.unwrap();
        store.save_run(&first.clone().complete()).await.unwrap();

        let runs = store.list_runs("f", 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert_eq!(runs[1].id, first.id);
        assert!(runs[1].is_terminal());

        assert_eq!(store.list_runs("f", 1).await.unwrap().len(), 1);
        assert!(store.list_runs("other", 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_run_retention() {
        let store = MemoryFlowStore::with_run_limit(3);
        let runs: Vec<_> = (0..5).map(|i| run_at("f", i)).collect();

        let kept: Vec<_> = tokio_test::block_on(async {
            for run in &runs {
                tokio_test::assert_ok!(store.save_run(run).await);
            }
            store.list_runs("f", 10).await.unwrap()
        })
        .into_iter()
        .map(|r| r.id)
        .collect();
        assert_eq!(kept, vec![runs[4].id.clone(), runs[3].id.clone(), runs[2].id.clone()]);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let store = MemoryFlowStore::new();
        let flow = Flow::new("x", FlowGraph::default());
        store.save_flow(&flow).await.unwrap();
        store.save_run(&FlowRun::start(&flow.id)).await.unwrap();

        let restored = MemoryFlowStore::from_data(store.snapshot().await, 10);
        assert!(restored.get_flow(&flow.id).await.unwrap().is_some());
        assert_eq!(restored.list_runs(&flow.id, 10).await.unwrap().len(), 1);
    }
}
