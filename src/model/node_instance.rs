//! `NodeInstance`: one execution of one node within one workflow instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::definition::NodeType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Whether a dependent node treats this as satisfying `dependsOn` (§4.5 step 4).
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: i64,
    pub workflow_instance_id: i64,
    pub node_id: String,
    pub parent_node_instance_id: Option<i64>,
    pub node_type: NodeType,
    pub status: NodeStatus,
    pub input_data: Value,
    pub output_data: Option<Value>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Append-only, non-decision-path record (§3: "used only for observability").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: i64,
    pub workflow_instance_id: i64,
    pub node_instance_id: Option<i64>,
    pub level: LogLevel,
    pub message: String,
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}
