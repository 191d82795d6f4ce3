//! `WorkflowInstance`: one run of one [`WorkflowDefinition`](super::definition::WorkflowDefinition).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Instance lifecycle status. Legal transitions are enforced by
/// [`WorkflowStatus::can_transition_to`], mirroring the state machine in
/// the engine design (§4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Scheduled,
    Running,
    Paused,
    Interrupted,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Whether this status admits no further status mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Scheduled)
                | (Scheduled, Running)
                | (Scheduled, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Interrupted)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Interrupted, Running)
                | (Interrupted, Cancelled)
                | (Failed, Running)
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Interrupted => "interrupted",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: i64,
    pub workflow_definition_id: i64,
    pub name: String,
    pub external_id: Option<String>,
    pub status: WorkflowStatus,
    pub input_data: Value,
    pub output_data: Option<Value>,
    pub context_data: Value,
    pub current_node_id: Option<String>,
    pub checkpoint_data: Option<Value>,
    pub business_key: Option<String>,
    pub mutex_key: Option<String>,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub interrupted_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub lock_owner: Option<Uuid>,
    pub lock_acquired_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub assigned_engine_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

impl WorkflowInstance {
    /// Key used in the Distributed Lock Manager to serialize advancement of
    /// this instance across engine replicas (§4.7).
    pub fn lock_key(&self) -> String {
        format!("workflow:instance:{}", self.id)
    }

    pub fn business_lock_key(&self) -> Option<String> {
        self.business_key.as_ref().map(|k| format!("business:{k}"))
    }

    pub fn mutex_lock_key(&self) -> Option<String> {
        self.mutex_key.as_ref().map(|k| format!("mutex:{k}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        assert!(WorkflowStatus::Pending.can_transition_to(WorkflowStatus::Running));
        assert!(WorkflowStatus::Running.can_transition_to(WorkflowStatus::Interrupted));
        assert!(WorkflowStatus::Failed.can_transition_to(WorkflowStatus::Running));
        assert!(WorkflowStatus::Interrupted.can_transition_to(WorkflowStatus::Running));
    }

    #[test]
    fn terminal_states_reject_everything() {
        for s in [WorkflowStatus::Pending, WorkflowStatus::Running, WorkflowStatus::Failed] {
            assert!(!WorkflowStatus::Completed.can_transition_to(s));
            assert!(!WorkflowStatus::Cancelled.can_transition_to(s));
        }
    }

    #[test]
    fn paused_cannot_go_straight_to_completed() {
        assert!(!WorkflowStatus::Paused.can_transition_to(WorkflowStatus::Completed));
    }

    #[test]
    fn is_terminal() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Interrupted.is_terminal());
    }
}
