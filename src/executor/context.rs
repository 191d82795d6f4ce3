//! [`ExecutionContext`] and [`ExecutionResult`]: what an executor sees and
//! returns (§4.4).

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::model::{NodeDefinition, NodeInstance, WorkflowInstance};

pub type ProgressCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// What the engine hands to an executor invocation. Read-mostly: executors
/// never write the database directly, only return an [`ExecutionResult`].
#[derive(Clone)]
pub struct ExecutionContext {
    pub workflow_instance: Arc<WorkflowInstance>,
    pub node_instance: Arc<NodeInstance>,
    pub node_definition: Arc<NodeDefinition>,
    pub previous_output: Option<Value>,
    /// Fully template-resolved `inputData` for this node.
    pub config: Value,
    pub progress: Option<ProgressCallback>,
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn report_progress(&self, payload: Value) {
        if let Some(cb) = &self.progress {
            cb(payload);
        }
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        use chrono::Utc;

        Self {
            workflow_instance: Arc::new(WorkflowInstance {
                id: 1,
                workflow_definition_id: 1,
                name: "test".into(),
                external_id: None,
                status: crate::model::WorkflowStatus::Running,
                input_data: Value::Null,
                output_data: None,
                context_data: Value::Null,
                current_node_id: None,
                checkpoint_data: None,
                business_key: None,
                mutex_key: None,
                priority: 0,
                retry_count: 0,
                max_retries: 0,
                scheduled_at: None,
                started_at: None,
                completed_at: None,
                interrupted_at: None,
                error_message: None,
                error_details: None,
                lock_owner: None,
                lock_acquired_at: None,
                last_heartbeat: None,
                assigned_engine_id: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                created_by: None,
            }),
            node_instance: Arc::new(NodeInstance {
                id: 1,
                workflow_instance_id: 1,
                node_id: "a".into(),
                parent_node_instance_id: None,
                node_type: crate::model::NodeType::Simple,
                status: crate::model::NodeStatus::Running,
                input_data: Value::Null,
                output_data: None,
                error_message: None,
                retry_count: 0,
                started_at: None,
                completed_at: None,
            }),
            node_definition: Arc::new(NodeDefinition::simple("a", "echo")),
            previous_output: None,
            config: Value::Null,
            progress: None,
            cancellation: CancellationToken::new(),
        }
    }
}

/// What an executor returns. Duration is measured by the engine, not the
/// executor (§4.4).
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub error_details: Option<Value>,
    pub should_retry: bool,
    pub retry_delay: Option<std::time::Duration>,
    pub logs: Vec<String>,
}

impl ExecutionResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>, should_retry: bool) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            should_retry,
            ..Default::default()
        }
    }
}
