//! Run records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Node id used for log entries that belong to the run rather than a node
pub const SYSTEM_NODE_ID: &str = "system";

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One engine decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl LogEntry {
    fn new(node_id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            node_id: node_id.into(),
            level,
            message: message.into(),
            data: None,
        }
    }

    pub fn info(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(node_id, LogLevel::Info, message)
    }

    pub fn warn(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(node_id, LogLevel::Warn, message)
    }

    pub fn error(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(node_id, LogLevel::Error, message)
    }

    /// Attach structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// One execution of a flow
///
/// A run is owned by the engine while `Running`; once terminal it is no longer
/// mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRun {
    pub id: String,
    pub flow_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FlowRun {
    /// Begin a new run of `flow_id`
    pub fn start(flow_id: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            flow_id: flow_id.into(),
            status: RunStatus::Running,
            log: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }

    /// Append a log entry
    pub fn push(&mut self, entry: LogEntry) {
        self.log.push(entry);
    }

    /// Finish successfully
    pub fn complete(mut self) -> Self {
        self.status = RunStatus::Completed;
        self.ended_at = Some(Utc::now());
        self
    }

    /// Finish with an error, keeping the log collected so far
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        let error = error.into();
        self.push(LogEntry::error(
            SYSTEM_NODE_ID,
            format!("Flow execution failed: {error}"),
        ));
        self.status = RunStatus::Failed;
        self.ended_at = Some(Utc::now());
        self.error = Some(error);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Ids of the nodes that appear in the log, in order, without system entries
    pub fn visited_nodes(&self) -> Vec<&str> {
        self.log
            .iter()
            .filter(|e| e.node_id != SYSTEM_NODE_ID)
            .map(|e| e.node_id.as_str())
            .collect()
    }
}
