//! Flow store persisted to JSON files
//!
//! Flows and runs live in memory and are written through to two files in the
//! storage directory after every mutation:
//!
//! - `iot.flows` - flow definitions
//! - `iot.flow_runs` - retained run history

use async_trait::async_trait;
use iot_flow::{Flow, FlowRun};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::info;

use crate::memory::{MemoryFlowStore, StoreData};
use crate::storage::{Storage, StorageFile};
use crate::{FlowStore, StoreResult};

const FLOWS_KEY: &str = "iot.flows";
const RUNS_KEY: &str = "iot.flow_runs";
const VERSION: u32 = 1;
const MINOR_VERSION: u32 = 1;

/// JSON-file backed flow store
pub struct JsonFlowStore {
    storage: Storage,
    cache: MemoryFlowStore,
    /// Serializes write-through so files never interleave
    write_lock: Mutex<()>,
}

impl JsonFlowStore {
    /// Open (or create) a store in `dir`
    pub async fn open(dir: impl AsRef<Path>, run_limit: usize) -> StoreResult<Self> {
        let storage = Storage::new(dir);
        let flows: Vec<Flow> = storage
            .load(FLOWS_KEY, VERSION, MINOR_VERSION)
            .await?
            .unwrap_or_default();
        let runs: Vec<FlowRun> = storage
            .load(RUNS_KEY, VERSION, MINOR_VERSION)
            .await?
            .unwrap_or_default();

        info!(
            dir = %storage.dir().display(),
            flows = flows.len(),
            runs = runs.len(),
            "Opened flow store"
        );

        Ok(Self {
            storage,
            cache: MemoryFlowStore::from_data(StoreData { flows, runs }, run_limit),
            write_lock: Mutex::new(()),
        })
    }

    async fn persist_flows(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let data = self.cache.snapshot().await;
        self.storage
            .save(&StorageFile::new(FLOWS_KEY, data.flows, VERSION, MINOR_VERSION))
            .await
    }

    async fn persist_runs(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let data = self.cache.snapshot().await;
        self.storage
            .save(&StorageFile::new(RUNS_KEY, data.runs, VERSION, MINOR_VERSION))
            .await
    }
}

#[async_trait]
impl FlowStore for JsonFlowStore {
    async fn list_flows(&self) -> StoreResult<Vec<Flow>> {
        self.cache.list_flows().await
    }

    async fn get_flow(&self, id: &str) -> StoreResult<Option<Flow>> {
        self.cache.get_flow(id).await
    }

    async fn save_flow(&self, flow: &Flow) -> StoreResult<()> {
        self.cache.save_flow(flow).await?;
        self.persist_flows().await
    }

    async fn delete_flow(&self, id: &str) -> StoreResult<bool> {
        let existed = self.cache.delete_flow(id).await?;
        self.persist_flows().await?;
        self.persist_runs().await?;
        Ok(existed)
    }

    async fn save_run(&self, run: &FlowRun) -> StoreResult<()> {
        self.cache.save_run(run).await?;
        self.persist_runs().await
    }

    async fn list_runs(&self, flow_id: &str, limit: usize) -> StoreResult<Vec<FlowRun>> {
        self.cache.list_runs(flow_id, limit).await
    }
}
