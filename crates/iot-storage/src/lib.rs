//! Flow persistence
//!
//! The orchestrator only talks to the [`FlowStore`] trait. Two implementations
//! are provided:
//!
//! - [`MemoryFlowStore`] - process-local, used by tests and when no storage
//!   directory is configured
//! - [`JsonFlowStore`] - the in-memory store mirrored to versioned JSON files

pub mod json;
pub mod memory;
pub mod storage;

pub use json::JsonFlowStore;
pub use memory::{MemoryFlowStore, StoreData, DEFAULT_RUN_HISTORY_LIMIT};
pub use storage::{Storage, StorageFile};

use async_trait::async_trait;
use iot_flow::{Flow, FlowRun};
use std::sync::Arc;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Migration required for {key}: from {from} to {to}")]
    MigrationRequired { key: String, from: u32, to: u32 },
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for flows and their runs
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// All flows, most recently updated first
    async fn list_flows(&self) -> StoreResult<Vec<Flow>>;

    /// Enabled flows only
    async fn list_enabled_flows(&self) -> StoreResult<Vec<Flow>> {
        Ok(self
            .list_flows()
            .await?
            .into_iter()
            .filter(|f| f.enabled)
            .collect())
    }

    async fn get_flow(&self, id: &str) -> StoreResult<Option<Flow>>;

    /// Insert or replace a flow
    async fn save_flow(&self, flow: &Flow) -> StoreResult<()>;

    /// Remove a flow and its run history; returns whether it existed
    async fn delete_flow(&self, id: &str) -> StoreResult<bool>;

    /// Insert or replace a run, keyed by run id
    async fn save_run(&self, run: &FlowRun) -> StoreResult<()>;

    /// Runs of a flow, most recent first
    async fn list_runs(&self, flow_id: &str, limit: usize) -> StoreResult<Vec<FlowRun>>;
}

/// Shared handle to a store
pub type SharedFlowStore = Arc<dyn FlowStore>;
