//! Flow lifecycle management
//!
//! Create, update, enable/disable and delete flows. Graphs are validated
//! before they reach the store, and the router is reloaded after every change
//! so the enabled set always mirrors persistence.

use chrono::Utc;
use iot_flow::{lint, validate, Flow, FlowGraph, FlowRun, ValidationError};
use iot_storage::{SharedFlowStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::router::{FlowRouter, RouterError};

/// Flow management errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Flow not found: {0}")]
    NotFound(String),

    #[error("Invalid flow graph: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Result type for flow management
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Partial update of a flow; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct FlowUpdate {
    pub name: Option<String>,
    pub graph: Option<FlowGraph>,
    pub enabled: Option<bool>,
}

/// Flow CRUD on top of the store and the router
pub struct FlowManager {
    store: SharedFlowStore,
    router: Arc<FlowRouter>,
    run_history_limit: usize,
}

impl FlowManager {
    pub fn new(store: SharedFlowStore, router: Arc<FlowRouter>, run_history_limit: usize) -> Self {
        Self {
            store,
            router,
            run_history_limit,
        }
    }

    fn check(flow_name: &str, graph: &FlowGraph) -> ManagerResult<()> {
        validate(graph)?;
        for warning in lint(graph) {
            warn!(flow = %flow_name, "{}", warning);
        }
        Ok(())
    }

    /// Create a new flow; flows start disabled
    #[instrument(skip(self, name, graph))]
    pub async fn create(&self, name: impl Into<String>, graph: FlowGraph) -> ManagerResult<Flow> {
        let flow = Flow::new(name, graph);
        Self::check(&flow.name, &flow.graph)?;

        self.store.save_flow(&flow).await?;
        info!(flow_id = %flow.id, name = %flow.name, "Created flow");
        self.router.reload().await?;
        Ok(flow)
    }

    /// Insert or replace a complete flow definition, keeping its id
    pub async fn import(&self, mut flow: Flow) -> ManagerResult<Flow> {
        Self::check(&flow.name, &flow.graph)?;

        if let Some(existing) = self.store.get_flow(&flow.id).await? {
            flow.created_at = existing.created_at;
        }
        flow.updated_at = Utc::now();

        self.store.save_flow(&flow).await?;
        info!(flow_id = %flow.id, name = %flow.name, enabled = flow.enabled, "Imported flow");
        self.router.reload().await?;
        Ok(flow)
    }

    /// Apply a partial update; a new graph is validated first
    #[instrument(skip(self, update))]
    pub async fn update(&self, id: &str, update: FlowUpdate) -> ManagerResult<Flow> {
        let mut flow = self.require(id).await?;

        if let Some(graph) = update.graph {
            Self::check(&flow.name, &graph)?;
            flow.graph = graph;
        }
        if let Some(name) = update.name {
            flow.name = name;
        }
        if let Some(enabled) = update.enabled {
            flow.enabled = enabled;
        }
        flow.touch();

        self.store.save_flow(&flow).await?;
        info!(flow_id = %flow.id, "Updated flow");
        self.router.reload().await?;
        Ok(flow)
    }

    /// Enable or disable a flow
    #[instrument(skip(self))]
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> ManagerResult<Flow> {
        let mut flow = self.require(id).await?;
        flow.enabled = enabled;
        flow.touch();

        self.store.save_flow(&flow).await?;
        info!(
            flow_id = %flow.id,
            "{} flow",
            if enabled { "Enabled" } else { "Disabled" }
        );
        self.router.reload().await?;
        Ok(flow)
    }

    /// Delete a flow and its history
    ///
    /// Runs already in progress finish against the graph they started with.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> ManagerResult<()> {
        if !self.store.delete_flow(id).await? {
            return Err(ManagerError::NotFound(id.to_string()));
        }
        info!(flow_id = %id, "Deleted flow");
        self.router.reload().await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> ManagerResult<Option<Flow>> {
        Ok(self.store.get_flow(id).await?)
    }

    /// All flows, most recently updated first
    pub async fn list(&self) -> ManagerResult<Vec<Flow>> {
        Ok(self.store.list_flows().await?)
    }

    /// Run history of a flow, most recent first
    ///
    /// `limit` defaults to the configured history length.
    pub async fn runs(&self, id: &str, limit: Option<usize>) -> ManagerResult<Vec<FlowRun>> {
        self.require(id).await?;
        let limit = limit.unwrap_or(self.run_history_limit);
        Ok(self.store.list_runs(id, limit).await?)
    }

    async fn require(&self, id: &str) -> ManagerResult<Flow> {
        self.store
            .get_flow(id)
            .await?
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))
    }
}
